//! DRAM: address mapping, per-channel command scheduling, JEDEC timing, and
//! the CPU/DRAM clock-domain crossing that ties it all to the rest of the
//! hierarchy.

pub mod addr_map;
pub mod bank;
pub mod channel;
pub mod policy;
pub mod timing;

pub use addr_map::{AddressMap, AddressMapKind};
pub use bank::{DRAMBank, DRAMCommandType};
pub use channel::{ChannelStats, DRAMChannel};
pub use policy::ArbitrationPolicy;
pub use timing::{DramTiming, PagePolicy};

use crate::cache::controller::CacheController;
use crate::error::SimResult;

/// Burst length halved; every JEDEC formula in the external interfaces
/// section references `BL/2`. DDR5 bursts are 16 beats.
pub(crate) const BL_HALF: u64 = 8;

/// Full DRAM subsystem: `N` independent channels sharing one address map,
/// advanced on the CPU clock via [`Dram::tick`] which internally decides
/// whether a DRAM cycle elapses this call.
#[derive(Debug)]
pub struct Dram {
    channels: Vec<DRAMChannel>,
    map: AddressMap,
    dram_cycle: u64,
    leap: f64,
    leap_step: f64,
}

impl Dram {
    /// Builds a DRAM subsystem with `num_channels` identical channels.
    #[must_use]
    pub fn new(
        num_channels: usize,
        num_banks: usize,
        banks_per_group: usize,
        policy: ArbitrationPolicy,
        timing: DramTiming,
        map: AddressMap,
        rq_size: usize,
        wq_size: usize,
        f_cpu_ghz: f64,
        f_dram_ghz: f64,
    ) -> Self {
        let channels = (0..num_channels)
            .map(|_| DRAMChannel::new(num_banks, banks_per_group, policy, timing, rq_size, wq_size))
            .collect();
        Self {
            channels,
            map,
            dram_cycle: 0,
            leap: 0.0,
            leap_step: f_cpu_ghz / f_dram_ghz - 1.0,
        }
    }

    /// Advances DRAM state by at most one DRAM cycle, called once per CPU
    /// cycle. Drains every channel's completed reads back into `llc` via
    /// `mark_load_as_done`, `llc_next` being the same controller `llc`
    /// forwards its own misses into (the DRAM-sink staging controller).
    pub fn tick(&mut self, now_cpu: u64, llc: &mut CacheController, llc_next: &mut CacheController) -> SimResult<()> {
        if self.leap >= 1.0 {
            self.leap -= 1.0;
        } else {
            self.dram_cycle += 1;
            self.leap += self.leap_step;
            for channel in &mut self.channels {
                channel.tick(self.dram_cycle, &self.map)?;
            }
        }

        let dram_now = self.dram_cycle;
        for channel in &mut self.channels {
            for trans in channel.io.drain_ready(dram_now) {
                let addr = trans.address;
                llc.mark_load_as_done(addr, llc_next, now_cpu)?;
            }
        }
        Ok(())
    }

    /// The channel that owns `addr`, and the bank-group-local channel index.
    #[must_use]
    pub fn channel_for(&self, addr: u64) -> usize {
        self.map.channel(addr)
    }

    /// Routes an incoming transaction to its channel's IOBus.
    pub fn add_incoming(&mut self, trans: crate::transaction::Transaction, now: u64) -> bool {
        let ch = self.channel_for(trans.address);
        self.channels[ch].io.add_incoming(trans, now)
    }

    /// Whether `trans`'s target channel has room to accept it right now.
    /// Used by the driver as the `pred` when draining the LLC's staged
    /// outgoing traffic, so a popped transaction is never lost to
    /// backpressure it could have checked for first.
    #[must_use]
    pub fn has_capacity_for(&self, trans: &crate::transaction::Transaction) -> bool {
        let ch = self.channel_for(trans.address);
        self.channels[ch].io.has_room_for(trans.kind)
    }

    /// Read-only access to a channel's counters, for the stats renderer.
    #[must_use]
    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        self.channels.iter().map(DRAMChannel::stats).collect()
    }
}
