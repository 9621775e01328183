//! Per-core page-table walker: resolves TLB misses against
//! [`crate::vmem::VirtualMemory`] and replays each level's table access
//! through the L1D, one at a time.

use std::collections::HashMap;

use tracing::trace;

use crate::cache::controller::CacheController;
use crate::error::SimResult;
use crate::transaction::{InstRef, Transaction, TransactionType};
use crate::vmem::{VirtualMemory, Walk};

use super::ptw_cache::PtwCache;

/// Per-walk state machine: `NeedAccess` means the current level's table
/// entry still needs to be read through the L1D; `WaitingOnAccess` means
/// that read is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtwState {
    NeedAccess,
    WaitingOnAccess,
}

/// One in-flight walk, keyed by VPN in [`PageTableWalker::ongoing`].
#[derive(Debug)]
struct PtwEntry {
    state: PtwState,
    walk: Walk,
    curr_level: u32,
    curr_walk_data_idx: usize,
    waiters: Vec<InstRef>,
    is_ip: bool,
    coreid: u8,
}

/// Per-core page-table walker.
#[derive(Debug)]
pub struct PageTableWalker {
    /// One LRU cache per non-leaf level (`pt_levels - 1` of them).
    caches: Vec<PtwCache>,
    ongoing: HashMap<u64, PtwEntry>,
    /// Maps a physical table-entry line address currently in flight at the
    /// L1D back to the VPN whose walk is waiting on it. A walk's current
    /// level only ever has one such address outstanding at a time, but two
    /// different VPNs' walks can share an address if they alias the same
    /// table entry, hence the same-address-different-vpn never collides:
    /// each walk issues its own `add_incoming` and is keyed by its own VPN
    /// here, one entry per in-flight request.
    outstanding: HashMap<u64, u64>,
    /// VPNs whose walk completed this tick; drained by the OS into the
    /// owning L2TLB's `mark_load_as_done`.
    pub completed: Vec<u64>,
    pt_levels: u32,
    fanout_bits: u32,
    pagesize: u64,
    ptesize: u64,
    linesize: u64,
}

impl PageTableWalker {
    /// Builds a walker for a `pt_levels`-deep, `fanout_bits`-wide page
    /// table, given the line/page/PTE sizes used to derive table-access
    /// addresses.
    #[must_use]
    pub fn new(
        pt_levels: u32,
        fanout_bits: u32,
        pagesize: u64,
        ptesize: u64,
        linesize: u64,
        ptw_cache_capacity: usize,
    ) -> Self {
        let num_non_leaf = pt_levels.saturating_sub(1) as usize;
        Self {
            caches: (0..num_non_leaf).map(|_| PtwCache::with_capacity(ptw_cache_capacity)).collect(),
            ongoing: HashMap::new(),
            outstanding: HashMap::new(),
            completed: Vec::new(),
            pt_levels,
            fanout_bits,
            pagesize,
            ptesize,
            linesize,
        }
    }

    fn starting_level(&mut self, vpn: u64) -> u32 {
        let mut start = self.pt_levels - 1;
        for level in (1..self.pt_levels).rev() {
            let key = vpn >> (u64::from(level) * u64::from(self.fanout_bits));
            if self.caches[(level - 1) as usize].access(key) {
                start = level - 1;
            } else {
                break;
            }
        }
        start
    }

    /// Begins a new walk for `vpn`, or attaches `inst` as an additional
    /// waiter if one is already in flight. Resolves the full walk up front
    /// through `vmem`.
    pub fn begin_walk(
        &mut self,
        vmem: &mut VirtualMemory,
        vpn: u64,
        coreid: u8,
        is_ip: bool,
        inst: InstRef,
    ) -> SimResult<()> {
        if let Some(entry) = self.ongoing.get_mut(&vpn) {
            entry.waiters.push(inst);
            return Ok(());
        }
        let walk = vmem.do_page_walk(vpn)?;
        let curr_level = self.starting_level(vpn);
        let curr_walk_data_idx = (self.pt_levels - 1 - curr_level) as usize;
        self.ongoing.insert(
            vpn,
            PtwEntry {
                state: PtwState::NeedAccess,
                walk,
                curr_level,
                curr_walk_data_idx,
                waiters: vec![inst],
                is_ip,
                coreid,
            },
        );
        Ok(())
    }

    fn line_addr_for_step(&self, table_pfn: u64, offset: usize) -> u64 {
        (table_pfn * self.pagesize + offset as u64 * self.ptesize) / self.linesize
    }

    /// Pushes every `NeedAccess` walk's current-level request to the L1D.
    pub fn tick(&mut self, l1d: &mut CacheController, now: u64) -> SimResult<()> {
        for (&vpn, entry) in &mut self.ongoing {
            if entry.state != PtwState::NeedAccess {
                continue;
            }
            let Some(&(table_pfn, offset)) = entry.walk.steps.get(entry.curr_walk_data_idx) else {
                continue;
            };
            let addr = self.line_addr_for_step(table_pfn, offset);
            let first_waiter = entry.waiters[0].clone();
            let t = Transaction::new(entry.coreid, TransactionType::Translation, addr, first_waiter);
            if l1d.io.add_incoming(t, now) {
                entry.state = PtwState::WaitingOnAccess;
                self.outstanding.insert(addr, vpn);
                trace!(vpn, level = entry.curr_level, "ptw table access issued");
            }
        }
        Ok(())
    }

    /// Called when the L1D's outgoing drain produced a TRANSLATION reply for
    /// physical line address `addr`. Looks up which walk's current level was
    /// waiting on it, then advances that walk by one level, or completes it
    /// if it was already at level 0.
    pub fn on_l1d_reply(&mut self, addr: u64) {
        let Some(vpn) = self.outstanding.remove(&addr) else {
            return;
        };
        let Some(entry) = self.ongoing.get_mut(&vpn) else {
            return;
        };
        if entry.curr_level == 0 {
            self.completed.push(vpn);
            let _ = self.ongoing.remove(&vpn);
        } else {
            entry.curr_level -= 1;
            entry.curr_walk_data_idx += 1;
            entry.state = PtwState::NeedAccess;
        }
    }

    /// Synchronous walk used during warmup: resolves through `vmem` and
    /// touches the PTW caches, without ever touching the L1D.
    pub fn warmup_walk(&mut self, vmem: &mut VirtualMemory, vpn: u64) -> SimResult<()> {
        let _ = vmem.do_page_walk(vpn)?;
        let _ = self.starting_level(vpn);
        Ok(())
    }

    /// Whether `inst` is a waiter on any in-flight walk (deadlock
    /// diagnostic support).
    #[must_use]
    pub fn holds_instruction(&self, inst: &InstRef) -> bool {
        self.ongoing
            .values()
            .any(|e| e.waiters.iter().any(|w| crate::transaction::inst_ref_eq(w, inst)))
    }
}
