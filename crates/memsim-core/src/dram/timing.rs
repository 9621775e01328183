//! JEDEC-style DRAM timing parameters, seeded from a DDR5-4800 profile.

use serde::{Deserialize, Serialize};

/// Whether an open row is left open after a CAS (`Open`) or implicitly
/// precharged (`Closed`), which selects between `READ`/`WRITE` and
/// `READ_PRECHARGE`/`WRITE_PRECHARGE` command types at schedule time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagePolicy {
    /// Leave the row open after an access.
    Open,
    /// Precharge automatically on every access.
    Closed,
}

/// All timing constraints needed by [`crate::dram::channel::DRAMChannel`],
/// in DRAM cycles.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DramTiming {
    /// CAS latency.
    pub cl: u64,
    /// RAS-to-CAS delay.
    pub trcd: u64,
    /// Row precharge time.
    pub trp: u64,
    /// Row active time.
    pub tras: u64,
    /// Read-to-precharge delay.
    pub trtp: u64,
    /// Write recovery time.
    pub twr: u64,
    /// CAS-to-CAS delay, same bank group.
    pub tccd_l: u64,
    /// CAS-to-CAS delay, different bank group.
    pub tccd_s: u64,
    /// Read-to-write turnaround, same bank group.
    pub tccd_l_rtw: u64,
    /// Read-to-write turnaround, different bank group.
    pub tccd_s_rtw: u64,
    /// Write-to-read turnaround, same bank group.
    pub tccd_l_wtr: u64,
    /// Write-to-read turnaround, different bank group.
    pub tccd_s_wtr: u64,
    /// Write-to-write turnaround, same bank group.
    pub tccd_l_wr: u64,
    /// Write-to-write turnaround, different bank group.
    pub tccd_s_wr: u64,
    /// Activate-to-activate delay, same bank group.
    pub trrd_l: u64,
    /// Activate-to-activate delay, different bank group.
    pub trrd_s: u64,
    /// Four-activate window.
    pub tfaw: u64,
    /// Refresh cycle time.
    pub trfc: u64,
    /// Average refresh interval.
    pub trefi: u64,
    /// Write CAS latency.
    pub cwl: u64,
    /// Page policy governing which command types are issued.
    pub page_policy: PagePolicy,
}

fn ceil_mul(f: f64, factor: f64) -> u64 {
    (f * factor).ceil() as u64
}

impl DramTiming {
    /// Builds the DDR5-4800 timing seed described in the external
    /// interfaces section, scaled by DRAM clock frequency `f` (in GHz).
    #[must_use]
    pub fn ddr5_4800(f_ghz: f64) -> Self {
        let trtp = ceil_mul(f_ghz, 7.5).max(12);
        let twr = ceil_mul(f_ghz, 30.0);
        let tccd_l = ceil_mul(f_ghz, 5.0).max(8);
        let tfaw = ceil_mul(f_ghz, 13.333).max(32);
        let trfc = ceil_mul(f_ghz, 410.0);
        let trefi = ceil_mul(f_ghz, 32_000.0 / 8192.0);
        Self {
            cl: 16,
            trcd: 16,
            trp: 16,
            tras: 32,
            trtp,
            twr,
            tccd_l,
            tccd_s: 4,
            tccd_l_rtw: tccd_l,
            tccd_s_rtw: 4,
            tccd_l_wtr: tccd_l,
            tccd_s_wtr: 4,
            tccd_l_wr: tccd_l,
            tccd_s_wr: 4,
            trrd_l: 8,
            trrd_s: 4,
            tfaw,
            trfc,
            trefi,
            cwl: 14,
            page_policy: PagePolicy::Open,
        }
    }
}

impl Default for DramTiming {
    fn default() -> Self {
        Self::ddr5_4800(2.4)
    }
}
