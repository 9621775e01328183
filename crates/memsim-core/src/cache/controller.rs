//! Cache controller: wires a [`CacheArray`] and an [`IOBus`] together with
//! MSHR tracking, a writeback queue, and the next-level hop.

use std::collections::VecDeque;

use tracing::{debug, trace};

use super::array::CacheArray;
use super::iobus::IOBus;
use super::policy::ReplacementPolicy;
use crate::error::{SimError, SimResult};
use crate::transaction::{Transaction, TransactionType};

/// Compile-time-equivalent configuration for one cache level.
///
/// Realizes the "template trait classes" design note as a plain struct of
/// runtime values rather than const generics, because a cache level's
/// parameters are themselves [`crate::config::Config`]-driven rather than
/// fixed at compile time.
#[derive(Clone, Copy, Debug)]
pub struct ControllerConfig {
    /// Maximum number of in-flight MSHR + writeback entries.
    pub num_mshr: usize,
    /// Whether a write miss allocates a line (read-for-ownership) or is a
    /// silent write-no-allocate.
    pub write_allocate: bool,
    /// Whether a hit at this level invalidates the line (used to model
    /// exclusive-cache-like victim handling between L2 and LLC).
    pub invalidate_on_hit: bool,
    /// Whether the *next* level invalidates on hit (changes how this
    /// level's victims are pushed forward: recursively demand-filled rather
    /// than written back).
    pub next_is_invalidate_on_hit: bool,
    /// Read/write ports serviced per tick.
    pub num_rw_ports: usize,
    /// Fixed hit latency in cycles.
    pub cache_latency: u64,
    /// Read queue capacity.
    pub rq_size: usize,
    /// Write queue capacity.
    pub wq_size: usize,
    /// Prefetch queue capacity.
    pub pq_size: usize,
}

/// A miss tracked in the MSHR table, keyed externally by line address.
pub struct MshrEntry {
    /// The (possibly rewritten, see [`CacheController::handle_miss`])
    /// transaction that missed.
    pub trans: Transaction,
    /// Whether this entry has been forwarded to the next level yet.
    pub is_fired: bool,
    /// Whether this entry originated from a write-allocate miss (as
    /// opposed to a demand read).
    pub is_for_write_allocate: bool,
    /// Cycle at which this entry was inserted.
    pub cycle_fired: u64,
}

/// Per-level cache access/miss/traffic counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerStats {
    /// Total accesses (reads and, per the write-allocate access-counting
    /// decision in `SPEC_FULL.md` section 9, every write-allocate attempt).
    pub accesses: u64,
    /// Misses.
    pub misses: u64,
    /// Invalidate-on-hit invalidations.
    pub invalidates: u64,
    /// Write-allocate completions.
    pub write_allocations: u64,
    /// Sum of cycles between a miss firing and its completion.
    pub miss_penalty_cycles: u64,
    /// Writebacks successfully issued to the next level.
    pub writebacks: u64,
    /// Cycles the writeback queue was blocked waiting on the next level.
    pub writeback_blocked_cycles: u64,
}

/// Generic cache controller over a [`CacheArray`] and its [`IOBus`].
pub struct CacheController {
    /// Human-readable name for diagnostics (e.g. `"L1D"`).
    pub name: &'static str,
    cfg: ControllerConfig,
    array: CacheArray,
    /// This level's input/output bus. Public so the driver and sibling
    /// components (the page-table walker, the OS) can reach it directly, in
    /// lieu of an owning back-pointer.
    pub io: IOBus,
    mshr: Vec<(u64, MshrEntry)>,
    writeback_queue: VecDeque<u64>,
    pub stats: ControllerStats,
}

impl CacheController {
    /// Creates a controller over a fresh [`CacheArray`] of the given
    /// geometry.
    #[must_use]
    pub fn new(
        name: &'static str,
        cfg: ControllerConfig,
        num_sets: usize,
        ways: usize,
        policy: ReplacementPolicy,
    ) -> Self {
        Self {
            name,
            cfg,
            array: CacheArray::new(num_sets, ways, policy),
            io: IOBus::new(cfg.rq_size, cfg.wq_size, cfg.pq_size),
            mshr: Vec::new(),
            writeback_queue: VecDeque::new(),
            stats: ControllerStats::default(),
        }
    }

    fn curr_mshr_size(&self) -> usize {
        self.mshr.len() + self.writeback_queue.len()
    }

    /// Runs one tick's worth of MSHR-forward, writeback-drain, and
    /// port-access phases, forwarding to `next` where needed.
    pub fn tick(&mut self, next: &mut CacheController, now: u64) -> SimResult<()> {
        self.phase_mshr_forward(next, now);
        self.phase_writeback_drain(next, now);
        for _ in 0..self.cfg.num_rw_ports {
            self.phase_port_access(next, now)?;
        }
        Ok(())
    }

    fn phase_mshr_forward(&mut self, next: &mut CacheController, now: u64) {
        if let Some(idx) = self.mshr.iter().position(|(_, e)| !e.is_fired) {
            let addr = self.mshr[idx].0;
            let trans = self.mshr[idx].1.trans.clone();
            if next.io.add_incoming(trans, now) {
                self.mshr[idx].1.is_fired = true;
                trace!(level = self.name, address = addr, "mshr entry fired");
            }
        }
    }

    fn phase_writeback_drain(&mut self, next: &mut CacheController, now: u64) {
        if let Some(&addr) = self.writeback_queue.front() {
            if self.do_writeback(addr, next, now) {
                self.writeback_queue.pop_front();
            } else {
                self.stats.writeback_blocked_cycles += 1;
            }
        }
    }

    fn do_writeback(&mut self, addr: u64, next: &mut CacheController, now: u64) -> bool {
        let t = Transaction::detached(0, TransactionType::Write, addr);
        if next.io.add_incoming(t, now) {
            self.stats.writebacks += 1;
            true
        } else {
            false
        }
    }

    fn phase_port_access(&mut self, next: &mut CacheController, now: u64) -> SimResult<()> {
        if self.curr_mshr_size() >= self.cfg.num_mshr {
            return Ok(());
        }
        let Some(t) = self.io.get_next_incoming(|_| true) else {
            return Ok(());
        };
        match t.kind {
            TransactionType::Read | TransactionType::Translation | TransactionType::Prefetch => {
                self.stats.accesses += 1;
                if self.array.probe(t.address) {
                    self.io.add_outgoing(t.clone(), self.cfg.cache_latency, now);
                    if self.cfg.invalidate_on_hit {
                        self.array.invalidate(t.address);
                        self.stats.invalidates += 1;
                    }
                } else {
                    self.handle_miss(t, false, next, now);
                }
            }
            TransactionType::Write => {
                if self.cfg.write_allocate {
                    self.stats.accesses += 1;
                    if !self.array.probe(t.address) {
                        self.handle_miss(t, true, next, now);
                    }
                } else {
                    self.stats.accesses += 1;
                    let _ = self.array.mark_dirty(t.address);
                }
            }
        }
        Ok(())
    }

    /// Handles a miss: rewrites write-misses to reads on write-allocate,
    /// coalesces into an existing MSHR entry for the same address if one
    /// exists, otherwise forwards immediately and inserts a fresh entry.
    fn handle_miss(&mut self, mut t: Transaction, write_miss: bool, next: &mut CacheController, now: u64) {
        self.stats.misses += 1;
        if write_miss {
            t.kind = TransactionType::Read;
        }
        if let Some((_, existing)) = self.mshr.iter_mut().find(|(a, _)| *a == t.address) {
            existing.trans.merge_waiters(&t);
            return;
        }
        let fired = next.io.add_incoming(t.clone(), now);
        self.mshr.push((
            t.address,
            MshrEntry {
                trans: t,
                is_fired: fired,
                is_for_write_allocate: write_miss,
                cycle_fired: now,
            },
        ));
    }

    /// Called when the next level signals completion for `addr`. Releases
    /// every coalesced MSHR waiter. `next` is the same controller the miss
    /// was forwarded to, needed so a victim evicted by this fill can be
    /// recursively demand-filled into it when `next` is `invalidate_on_hit`.
    pub fn mark_load_as_done(&mut self, addr: u64, next: &mut CacheController, now: u64) -> SimResult<()> {
        let matching: Vec<usize> = self
            .mshr
            .iter()
            .enumerate()
            .filter(|(_, (a, _))| *a == addr)
            .map(|(i, _)| i)
            .collect();
        if matching.is_empty() {
            return Err(SimError::ZombieMshrWakeup {
                address: addr,
                level: self.name,
            });
        }

        if !self.cfg.invalidate_on_hit {
            let refcnt: u64 = matching
                .iter()
                .map(|&i| self.mshr[i].1.trans.inst_refs.len() as u64)
                .sum::<u64>()
                .max(1);
            let any_write_allocate = matching.iter().any(|&i| self.mshr[i].1.is_for_write_allocate);
            self.demand_fill(addr, refcnt, any_write_allocate, next, now);
        }

        for &i in &matching {
            let entry = &self.mshr[i].1;
            self.stats.miss_penalty_cycles += now.saturating_sub(entry.cycle_fired);
            if entry.is_for_write_allocate {
                let _ = self.array.mark_dirty(addr);
                self.stats.write_allocations += 1;
            } else {
                self.io.add_outgoing(entry.trans.clone(), self.cfg.cache_latency, now);
            }
        }
        self.mshr.retain(|(a, _)| *a != addr);
        debug!(level = self.name, address = addr, waiters = matching.len(), "mshr released");
        Ok(())
    }

    /// Installs `addr` into this level's array directly, optionally marking
    /// it dirty, and returns any victim evicted to make room.
    fn fill_line(&mut self, addr: u64, refcnt: u64, dirty: bool) -> Option<super::array::CacheEntry> {
        let evicted = self.array.fill(addr, refcnt);
        if dirty {
            let _ = self.array.mark_dirty(addr);
        }
        evicted
    }

    /// Fills `addr`, optionally marking it dirty, and pushes any evicted
    /// victim downstream: if `next` is itself `invalidate_on_hit` (an
    /// exclusive-cache-like level), the victim is recursively demand-filled
    /// straight into `next`'s array, propagating its dirty bit, instead of
    /// going through `next`'s ordinary write-allocate/MSHR path — a line
    /// evicted behind an exclusive next level belongs there unconditionally,
    /// not just when it happens to be dirty. Otherwise a dirty victim is
    /// pushed onto the local writeback queue as a plain detached write.
    fn demand_fill(&mut self, addr: u64, refcnt: u64, dirty: bool, next: &mut CacheController, _now: u64) {
        let Some(victim) = self.fill_line(addr, refcnt, dirty) else {
            return;
        };
        if self.cfg.next_is_invalidate_on_hit {
            if let Some(further_victim) = next.fill_line(victim.address, 1, victim.dirty) {
                next.writeback_queue.push_back(further_victim.address);
            }
        } else if victim.dirty {
            self.writeback_queue.push_back(victim.address);
        }
    }

    /// Untimed synchronous access used during the warmup phase: walks the
    /// hierarchy directly and recursively, with no cycle accounting or MSHR
    /// bookkeeping. `chain` holds the remaining levels below `self`, in
    /// order; an empty chain means `self` is the last cache level before
    /// DRAM, which this simulator does not warm (DRAM carries no tag
    /// state).
    pub fn warmup_access(&mut self, addr: u64, write: bool, chain: &mut [&mut CacheController]) {
        if self.array.probe(addr) {
            if write && self.cfg.write_allocate {
                let _ = self.array.mark_dirty(addr);
            }
            return;
        }
        let next_is_invalidate_on_hit = self.cfg.next_is_invalidate_on_hit;
        if let Some((next, rest)) = chain.split_first_mut() {
            next.warmup_access(addr, false, &mut *rest);
            let evicted = self.array.fill(addr, 1);
            if write {
                let _ = self.array.mark_dirty(addr);
            }
            if let Some(victim) = evicted {
                if victim.dirty && !next_is_invalidate_on_hit {
                    next.warmup_access(victim.address, true, &mut *rest);
                }
            }
        } else {
            let _ = self.array.fill(addr, 1);
            if write {
                let _ = self.array.mark_dirty(addr);
            }
        }
    }

    /// Total number of in-flight entries (MSHR + writeback queue), exposed
    /// for the deadlock diagnostic and tests.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.curr_mshr_size()
    }

    /// Searches the MSHR table and IOBus queues for any transaction
    /// referencing `inst`, for the deadlock diagnostic.
    #[must_use]
    pub fn holds_instruction(&self, inst: &crate::transaction::InstRef) -> bool {
        self.mshr
            .iter()
            .any(|(_, e)| e.trans.inst_refs.iter().any(|r| crate::transaction::inst_ref_eq(r, inst)))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::transaction::{InstRef, InstState, Instruction};

    fn cfg(num_mshr: usize, write_allocate: bool, wq_size: usize) -> ControllerConfig {
        ControllerConfig {
            num_mshr,
            write_allocate,
            invalidate_on_hit: false,
            next_is_invalidate_on_hit: false,
            num_rw_ports: 1,
            cache_latency: 1,
            rq_size: 8,
            wq_size,
            pq_size: 0,
        }
    }

    fn dummy_inst() -> InstRef {
        Rc::new(RefCell::new(Instruction {
            inst_num: 0,
            ip: 0,
            pip: None,
            v_lineaddr: None,
            p_lineaddr: None,
            is_write: false,
            state: InstState::WaitingOnAccess,
        }))
    }

    // Two reads to the same line, both missing before the first is
    // answered, must coalesce into a single MSHR entry: exactly one
    // transaction is forwarded downstream, and both waiters are released
    // together when it completes.
    #[test]
    fn duplicate_misses_coalesce_into_one_forwarded_transaction_s2() {
        let mut l1 = CacheController::new("L1", cfg(8, false, 8), 1, 4, ReplacementPolicy::Lru);
        let mut l2 = CacheController::new("L2", cfg(8, false, 8), 1, 4, ReplacementPolicy::Lru);

        let addr = 0x1000;
        let inst_a = dummy_inst();
        let inst_b = dummy_inst();
        assert!(l1.io.add_incoming(Transaction::new(0, TransactionType::Read, addr, inst_a), 0));
        assert!(l1.io.add_incoming(Transaction::new(0, TransactionType::Read, addr, inst_b), 0));

        // One read/write port: each tick's `phase_port_access` dequeues a
        // single transaction, so two ticks are needed to observe both.
        l1.tick(&mut l2, 0).expect("tick 1");
        l1.tick(&mut l2, 1).expect("tick 2");

        assert_eq!(l1.stats.misses, 2, "both the original miss and its coalesced duplicate are counted");
        assert_eq!(l1.in_flight_count(), 1, "the duplicate must join the existing MSHR entry, not add one");
        assert_eq!(l2.io.input_occupancy(), 1, "only the first miss is forwarded downstream");

        l1.mark_load_as_done(addr, &mut l2, 2).expect("release mshr");
        assert_eq!(l1.in_flight_count(), 0);
        let ready = l1.io.drain_ready(2 + cfg(8, false, 8).cache_latency);
        assert_eq!(ready.len(), 1, "one reply covering both waiters");
        assert_eq!(ready[0].inst_refs.len(), 2, "both coalesced waiters travel on the single reply");
    }

    // A dirty line evicted to make room for a new fill is pushed onto the
    // writeback queue and, once the next level has room, forwarded as a
    // detached WRITE.
    #[test]
    fn dirty_eviction_is_written_back_to_next_level_s6() {
        let mut l1 = CacheController::new("L1", cfg(8, true, 8), 1, 1, ReplacementPolicy::Lru);
        let mut l2 = CacheController::new("L2", cfg(8, false, 8), 1, 4, ReplacementPolicy::Lru);

        l1.demand_fill(0xA, 1, true, &mut l2, 0);
        assert!(l1.writeback_queue.is_empty(), "nothing evicted yet");

        l1.demand_fill(0xB, 1, false, &mut l2, 0);
        assert_eq!(l1.writeback_queue.len(), 1, "filling the lone way evicts the dirty line");
        assert_eq!(l1.writeback_queue[0], 0xA);

        l1.phase_writeback_drain(&mut l2, 0);

        assert!(l1.writeback_queue.is_empty());
        assert_eq!(l1.stats.writebacks, 1);
        assert_eq!(l2.io.pending_writes_for(0xA), 1, "the writeback lands in L2's write queue");
    }

    // If the next level has no room, the writeback stays queued and is
    // retried on a later tick rather than dropped.
    #[test]
    fn blocked_writeback_is_retried_not_dropped() {
        let mut l1 = CacheController::new("L1", cfg(8, true, 8), 1, 1, ReplacementPolicy::Lru);
        let mut l2_full = CacheController::new("L2", cfg(8, false, 0), 1, 4, ReplacementPolicy::Lru);

        l1.demand_fill(0xA, 1, true, &mut l2_full, 0);
        l1.demand_fill(0xB, 1, false, &mut l2_full, 0);
        assert_eq!(l1.writeback_queue.len(), 1);

        l1.phase_writeback_drain(&mut l2_full, 0);
        assert_eq!(l1.writeback_queue.len(), 1, "a full next-level write queue must not drop the writeback");
        assert_eq!(l1.stats.writeback_blocked_cycles, 1);
        assert_eq!(l1.stats.writebacks, 0);

        let mut l2_ready = CacheController::new("L2", cfg(8, false, 8), 1, 4, ReplacementPolicy::Lru);
        l1.phase_writeback_drain(&mut l2_ready, 1);
        assert!(l1.writeback_queue.is_empty(), "retrying against a level with room must drain it");
        assert_eq!(l1.stats.writebacks, 1);
    }

    // When the next level is itself `invalidate_on_hit` (exclusive-cache
    // victim handling), an evicted victim must be recursively demand-filled
    // straight into next's array — never queued as an ordinary writeback —
    // and a clean victim must make the trip too, not just a dirty one.
    #[test]
    fn victim_is_recursively_demand_filled_into_an_invalidate_on_hit_next_level() {
        let mut l1_cfg = cfg(8, true, 8);
        l1_cfg.next_is_invalidate_on_hit = true;
        let mut l1 = CacheController::new("L1", l1_cfg, 1, 1, ReplacementPolicy::Lru);
        let mut llc = CacheController::new("LLC", cfg(8, false, 8), 1, 4, ReplacementPolicy::Lru);

        l1.demand_fill(0xA, 1, false, &mut llc, 0);
        assert!(!llc.array.probe(0xA), "LLC must not yet hold a line L1 hasn't evicted");

        // Filling 0xB evicts the clean line at 0xA (the lone way in a
        // 1-set, 1-way array): it must land directly in the LLC's array,
        // not in L1's writeback queue.
        l1.demand_fill(0xB, 1, false, &mut llc, 0);

        assert!(l1.writeback_queue.is_empty(), "an invalidate_on_hit next level never uses the writeback queue");
        assert!(llc.array.probe(0xA), "the clean victim must be demand-filled into the LLC, not dropped");
    }
}
