//! Per-channel command scheduler: bank array, FAW window, refresh, and
//! channel-wide ACT/RD/WR turnaround tracking.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::error::SimResult;
use crate::transaction::TransactionType;

use super::addr_map::AddressMap;
use super::bank::{DRAMBank, DRAMCommand, DRAMCommandType};
use super::policy::{self, ArbitrationPolicy, Selected};
use super::timing::{DramTiming, PagePolicy};
use crate::cache::IOBus;

/// Depth of the four-activate window.
const FAW_DEPTH: usize = 4;

/// Maximum commands a single bank may queue before the channel refuses to
/// schedule more work onto it.
const DRAM_CMDQ_SIZE: usize = 16;

/// Per-channel counters surfaced through [`crate::stats::SimStats`].
#[derive(Default, Debug, Clone, Copy)]
pub struct ChannelStats {
    pub row_buffer_hits: u64,
    pub demand_precharges: u64,
    pub refreshes: u64,
    pub reads_issued: u64,
    pub writes_issued: u64,
    pub activates: u64,
    /// Cycles with at least one bank mid-write-drain, approximating read
    /// service blocked behind queued writes.
    pub write_blocked_cycles: u64,
}

/// One DRAM channel: its banks, command queues, and the channel-wide
/// turnaround/refresh/FAW state layered on top of them.
#[derive(Debug)]
pub struct DRAMChannel {
    banks: Vec<DRAMBank>,
    banks_per_group: usize,
    policy: ArbitrationPolicy,
    timing: DramTiming,
    /// `[different-bank-group, same-bank-group]` read turnaround cycle.
    rd_ok_cycle: [u64; 2],
    /// `[different-bank-group, same-bank-group]` write turnaround cycle.
    wr_ok_cycle: [u64; 2],
    /// `[different-bank-group, same-bank-group]` activate turnaround cycle.
    act_ok_cycle: [u64; 2],
    faw: VecDeque<u64>,
    next_ref_cycle: u64,
    ref_done_cycle: u64,
    next_bank_with_cmd: usize,
    last_bank_group: Option<usize>,
    /// IOBus this channel is fed from and replies through. No prefetch
    /// queue: DRAM never originates or services prefetch-class traffic
    /// itself, it only carries what the LLC forwarded.
    pub io: IOBus,
    stats: ChannelStats,
}

impl DRAMChannel {
    /// Creates an idle channel with `num_banks` banks grouped
    /// `banks_per_group` to a bank group.
    #[must_use]
    pub fn new(
        num_banks: usize,
        banks_per_group: usize,
        policy: ArbitrationPolicy,
        timing: DramTiming,
        rq_size: usize,
        wq_size: usize,
    ) -> Self {
        Self {
            banks: (0..num_banks).map(|_| DRAMBank::new()).collect(),
            banks_per_group,
            policy,
            timing,
            rd_ok_cycle: [0; 2],
            wr_ok_cycle: [0; 2],
            act_ok_cycle: [0; 2],
            faw: VecDeque::new(),
            next_ref_cycle: timing.trefi,
            ref_done_cycle: 0,
            next_bank_with_cmd: 0,
            last_bank_group: None,
            io: IOBus::new(rq_size, wq_size, 0),
            stats: ChannelStats::default(),
        }
    }

    fn bank_index(&self, map: &AddressMap, addr: u64) -> usize {
        map.flat_bank(addr, self.banks_per_group)
    }

    fn bank_group_of(&self, bank_idx: usize) -> usize {
        bank_idx / self.banks_per_group.max(1)
    }

    /// Advances this channel by one DRAM cycle.
    pub fn tick(&mut self, now: u64, map: &AddressMap) -> SimResult<()> {
        self.prune_faw(now);
        self.maybe_refresh(now);
        if now >= self.ref_done_cycle {
            self.issue_next_cmd(now, map);
        }
        self.schedule_from_io(map);
        if self.banks.iter().any(|b| b.write_draining) {
            self.stats.write_blocked_cycles += 1;
        }
        Ok(())
    }

    fn prune_faw(&mut self, now: u64) {
        while let Some(&oldest) = self.faw.front() {
            if oldest + self.timing.tfaw <= now {
                let _ = self.faw.pop_front();
            } else {
                break;
            }
        }
    }

    fn maybe_refresh(&mut self, now: u64) {
        if now < self.next_ref_cycle {
            return;
        }
        let mut all_idle = true;
        for bank in &mut self.banks {
            if bank.open_row.is_some() {
                if now >= bank.pre_ok_cycle {
                    bank.open_row = None;
                    bank.num_cas_to_open_row = 0;
                    bank.act_ok_cycle = bank.act_ok_cycle.max(now + self.timing.trp);
                } else {
                    all_idle = false;
                }
            }
        }
        if all_idle {
            self.next_ref_cycle = now + self.timing.trefi;
            self.ref_done_cycle = now + self.timing.trfc;
            self.stats.refreshes += 1;
            trace!(now, "dram refresh scheduled");
        }
    }

    fn issue_next_cmd(&mut self, now: u64, map: &AddressMap) {
        let num_banks = self.banks.len();
        for _ in 0..num_banks {
            let bank_idx = self.next_bank_with_cmd;
            self.next_bank_with_cmd = (self.next_bank_with_cmd + 1) % num_banks;

            let Some(selected) =
                policy::select_next_command(&self.banks[bank_idx], self.policy, |a| map.row(a))
            else {
                continue;
            };
            let bg = self.bank_group_of(bank_idx);
            let ii = usize::from(self.last_bank_group == Some(bg));
            if self.try_issue(bank_idx, bg, ii, selected, now) {
                return;
            }
        }
    }

    fn try_issue(&mut self, bank_idx: usize, bg: usize, ii: usize, selected: Selected, now: u64) -> bool {
        match selected {
            Selected::Cas { index } => self.try_issue_cas(bank_idx, bg, ii, index, now),
            Selected::Precharge => self.try_issue_precharge(bank_idx, now),
            Selected::Activate { row } => self.try_issue_activate(bank_idx, bg, ii, row, now),
        }
    }

    fn try_issue_cas(&mut self, bank_idx: usize, bg: usize, ii: usize, index: usize, now: u64) -> bool {
        let cmd_type = self.banks[bank_idx].cmd_queue[index].cmd_type;
        let bank_ready = now >= self.banks[bank_idx].cas_ok_cycle;
        let channel_ready = if cmd_type.is_read() {
            now >= self.rd_ok_cycle[ii]
        } else {
            now >= self.wr_ok_cycle[ii]
        };
        if !(bank_ready && channel_ready) {
            return false;
        }

        // A cold open of an idle bank still counts as a row-buffer hit; only
        // the first CAS after a conflict-driven reopen does not.
        let is_row_hit = !(self.banks[bank_idx].num_cas_to_open_row == 0 && self.banks[bank_idx].act_was_conflict);

        let entry = self
            .banks[bank_idx]
            .cmd_queue
            .remove(index)
            .expect("index came from this same queue");
        self.apply_bank_cas_timing(bank_idx, cmd_type, now);
        self.apply_channel_cas_timing(cmd_type, now);

        if cmd_type.is_write() {
            self.banks[bank_idx].num_writes_in_cmdq = self.banks[bank_idx].num_writes_in_cmdq.saturating_sub(1);
            self.stats.writes_issued += 1;
        } else {
            self.stats.reads_issued += 1;
            let latency = self.timing.cl;
            self.io.add_outgoing(entry.trans, latency, now);
        }
        if is_row_hit {
            self.stats.row_buffer_hits += 1;
        }
        self.last_bank_group = Some(bg);
        debug!(cycle = now, bank = bank_idx, ?cmd_type, "dram cas issued");
        true
    }

    fn apply_bank_cas_timing(&mut self, bank_idx: usize, cmd_type: DRAMCommandType, now: u64) {
        let t = self.timing;
        let bank = &mut self.banks[bank_idx];
        match cmd_type {
            DRAMCommandType::Read => {
                bank.pre_ok_cycle = bank.pre_ok_cycle.max(now + t.trtp);
                bank.num_cas_to_open_row += 1;
            }
            DRAMCommandType::ReadPrecharge => {
                bank.act_ok_cycle = bank.act_ok_cycle.max(now + super::BL_HALF + t.trtp + t.trp);
                bank.open_row = None;
                bank.num_cas_to_open_row = 0;
            }
            DRAMCommandType::Write => {
                bank.pre_ok_cycle = bank.pre_ok_cycle.max(now + t.cwl + super::BL_HALF + t.twr);
                bank.num_cas_to_open_row += 1;
            }
            DRAMCommandType::WritePrecharge => {
                bank.act_ok_cycle = bank
                    .act_ok_cycle
                    .max(now + t.cwl + super::BL_HALF + t.twr + t.trp);
                bank.open_row = None;
                bank.num_cas_to_open_row = 0;
            }
            DRAMCommandType::Activate | DRAMCommandType::Precharge => unreachable!("not a CAS"),
        }
    }

    fn try_issue_precharge(&mut self, bank_idx: usize, now: u64) -> bool {
        let bank = &mut self.banks[bank_idx];
        if now < bank.pre_ok_cycle {
            return false;
        }
        bank.act_ok_cycle = bank.act_ok_cycle.max(now + self.timing.trp);
        bank.open_row = None;
        bank.num_cas_to_open_row = 0;
        bank.pending_conflict = true;
        self.stats.demand_precharges += 1;
        debug!(cycle = now, bank = bank_idx, "dram demand precharge");
        true
    }

    fn try_issue_activate(&mut self, bank_idx: usize, bg: usize, ii: usize, row: usize, now: u64) -> bool {
        if self.faw.len() >= FAW_DEPTH || now < self.act_ok_cycle[ii] {
            return false;
        }
        let bank = &mut self.banks[bank_idx];
        if now < bank.act_ok_cycle {
            return false;
        }
        bank.cas_ok_cycle = bank.cas_ok_cycle.max(now + self.timing.trcd);
        bank.pre_ok_cycle = bank.pre_ok_cycle.max(now + self.timing.tras);
        bank.open_row = Some(row);
        bank.num_cas_to_open_row = 0;
        bank.act_was_conflict = bank.pending_conflict;
        bank.pending_conflict = false;

        let (trrd_s, trrd_l) = (self.timing.trrd_s, self.timing.trrd_l);
        self.act_ok_cycle[0] = self.act_ok_cycle[0].max(now + trrd_s);
        self.act_ok_cycle[1] = self.act_ok_cycle[1].max(now + trrd_l);
        self.faw.push_back(now);
        self.last_bank_group = Some(bg);
        self.stats.activates += 1;
        debug!(cycle = now, bank = bank_idx, row, "dram activate");
        true
    }

    fn apply_channel_cas_timing(&mut self, cmd_type: DRAMCommandType, now: u64) {
        let t = self.timing;
        if cmd_type.is_read() {
            self.rd_ok_cycle[0] = self.rd_ok_cycle[0].max(now + t.tccd_s);
            self.rd_ok_cycle[1] = self.rd_ok_cycle[1].max(now + t.tccd_l);
            self.wr_ok_cycle[0] = self.wr_ok_cycle[0].max(now + t.tccd_s_rtw);
            self.wr_ok_cycle[1] = self.wr_ok_cycle[1].max(now + t.tccd_l_rtw);
        } else {
            self.wr_ok_cycle[0] = self.wr_ok_cycle[0].max(now + t.tccd_s_wr);
            self.wr_ok_cycle[1] = self.wr_ok_cycle[1].max(now + t.tccd_l_wr);
            self.rd_ok_cycle[0] = self.rd_ok_cycle[0].max(now + t.tccd_s_wtr);
            self.rd_ok_cycle[1] = self.rd_ok_cycle[1].max(now + t.tccd_l_wtr);
        }
    }

    fn schedule_from_io(&mut self, map: &AddressMap) {
        let banks_per_group = self.banks_per_group;
        let banks = &self.banks;
        let Some(trans) = self.io.get_next_incoming(|t| {
            let idx = map.flat_bank(t.address, banks_per_group);
            banks[idx].cmd_queue.len() < DRAM_CMDQ_SIZE
        }) else {
            return;
        };
        let bank_idx = self.bank_index(map, trans.address);
        let is_write = trans.kind == TransactionType::Write;
        let cmd_type = match (self.timing.page_policy, is_write) {
            (PagePolicy::Open, false) => DRAMCommandType::Read,
            (PagePolicy::Closed, false) => DRAMCommandType::ReadPrecharge,
            (PagePolicy::Open, true) => DRAMCommandType::Write,
            (PagePolicy::Closed, true) => DRAMCommandType::WritePrecharge,
        };
        let bank = &mut self.banks[bank_idx];
        if is_write {
            bank.num_writes_in_cmdq += 1;
            if bank.num_writes_in_cmdq == bank.cmd_queue.len() + 1 {
                bank.write_draining = true;
            }
        } else if bank.num_writes_in_cmdq == 0 {
            bank.write_draining = false;
        }
        bank.cmd_queue.push_back(DRAMCommand { trans, cmd_type });
    }

    /// Number of banks backing this channel.
    #[must_use]
    pub fn num_banks(&self) -> usize {
        self.banks.len()
    }

    /// Snapshot of this channel's counters.
    #[must_use]
    pub const fn stats(&self) -> ChannelStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::addr_map::AddressMapKind;
    use crate::transaction::Transaction;

    // Single bank, single bank group: row 5 is occupied by two requests
    // (A, B), followed by one to row 6 (C). FRFCFS must issue
    // ACT(5), READ(A), READ(B), PRE, ACT(6), READ(C), crediting two
    // row-buffer hits.
    #[test]
    fn frfcfs_row_hit_s4() {
        let timing = DramTiming::ddr5_4800(2.4);
        let map = AddressMap::new(AddressMapKind::Mop, 1, 1, 1, 1, 65536, 128);
        let mut chan = DRAMChannel::new(1, 1, ArbitrationPolicy::Frfcfs, timing, 128, 128);

        let row_shift = map.col_bits();
        let addr_in_row = |row: u64, col: u64| (row << row_shift) | col;
        let a = addr_in_row(5, 0);
        let b = addr_in_row(5, 1);
        let c = addr_in_row(6, 0);

        for addr in [a, b, c] {
            let t = Transaction::detached(0, crate::transaction::TransactionType::Read, addr);
            assert!(chan.io.add_incoming(t, 0));
        }

        let mut now = 0u64;
        for _ in 0..2000 {
            chan.tick(now, &map).expect("tick");
            now += 1;
            if chan.stats.reads_issued == 3 {
                break;
            }
        }

        assert_eq!(chan.stats.reads_issued, 3, "expected all three reads to eventually issue");
        assert_eq!(chan.stats.demand_precharges, 1, "only C's row conflict should need a precharge");
        assert_eq!(chan.stats.row_buffer_hits, 2, "A (cold open) and B (same row) are hits, C is not");
    }

    // Five distinct idle banks each need an ACT to open their row. The FAW
    // window caps four activates in any `tfaw`-length span, so the fifth
    // must wait for the first to age out of the window.
    #[test]
    fn faw_limits_four_activates_per_window_s5() {
        let timing = DramTiming::ddr5_4800(2.4);
        let map = AddressMap::new(AddressMapKind::Mop, 1, 1, 8, 1, 65536, 128);
        let mut chan = DRAMChannel::new(8, 8, ArbitrationPolicy::Frfcfs, timing, 128, 128);

        let bank_shift = map.col_bits();
        let addr_for_bank = |bank: u64| bank << bank_shift;

        for bank in 0..5u64 {
            let t = Transaction::detached(0, crate::transaction::TransactionType::Read, addr_for_bank(bank));
            assert!(chan.io.add_incoming(t, 0));
        }

        let mut activate_cycles = Vec::new();
        let mut prev_activates = 0u64;
        let mut now = 0u64;
        for _ in 0..2000 {
            chan.tick(now, &map).expect("tick");
            if chan.stats.activates > prev_activates {
                for _ in prev_activates..chan.stats.activates {
                    activate_cycles.push(now);
                }
                prev_activates = chan.stats.activates;
            }
            if activate_cycles.len() == 5 {
                break;
            }
            now += 1;
        }

        assert_eq!(activate_cycles.len(), 5, "all five activates should eventually issue");
        assert!(
            activate_cycles[4] >= activate_cycles[0] + timing.tfaw,
            "fifth activate at {} violated the four-activate window opened at {}",
            activate_cycles[4],
            activate_cycles[0]
        );
    }

    // Once a refresh arms (`next_ref_cycle` reached, every bank idle), no
    // bank may issue a command until `ref_done_cycle`.
    #[test]
    fn no_command_issues_during_refresh_window_property7() {
        let mut timing = DramTiming::ddr5_4800(2.4);
        timing.trefi = 30;
        timing.trfc = 12;
        let map = AddressMap::new(AddressMapKind::Mop, 1, 1, 1, 1, 65536, 128);
        let mut chan = DRAMChannel::new(1, 1, ArbitrationPolicy::Frfcfs, timing, 128, 128);

        let mut now = 0u64;
        let mut refresh_fired_at: Option<u64> = None;
        let mut stats_at_refresh = (0u64, 0u64);
        for _ in 0..200 {
            if chan.io.input_occupancy() == 0 {
                let t = Transaction::detached(0, crate::transaction::TransactionType::Read, 0);
                assert!(chan.io.add_incoming(t, now));
            }
            let refreshes_before = chan.stats.refreshes;
            chan.tick(now, &map).expect("tick");

            if chan.stats.refreshes > refreshes_before && refresh_fired_at.is_none() {
                refresh_fired_at = Some(now);
                stats_at_refresh = (chan.stats.activates, chan.stats.reads_issued);
            }
            if let Some(fire) = refresh_fired_at {
                if now < chan.ref_done_cycle {
                    assert_eq!(
                        (chan.stats.activates, chan.stats.reads_issued),
                        stats_at_refresh,
                        "a command issued between refresh arming at {fire} and ref_done_cycle {}",
                        chan.ref_done_cycle
                    );
                } else {
                    break;
                }
            }
            now += 1;
        }
        assert!(refresh_fired_at.is_some(), "test never observed a refresh fire");
    }
}
