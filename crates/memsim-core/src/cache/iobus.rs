//! Per-level input/output transaction queues.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use crate::transaction::{Transaction, TransactionType};

/// Minimum number of queued writes, with both read and prefetch queues
/// empty, before the bus unconditionally enters write-drain mode.
const DRAIN_THRESHOLD: usize = 8;

struct Outgoing {
    ready_cycle: u64,
    seq: u64,
    trans: Transaction,
}

impl PartialEq for Outgoing {
    fn eq(&self, other: &Self) -> bool {
        self.ready_cycle == other.ready_cycle && self.seq == other.seq
    }
}
impl Eq for Outgoing {}
impl PartialOrd for Outgoing {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Outgoing {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.ready_cycle, self.seq).cmp(&(other.ready_cycle, other.seq))
    }
}

/// Bounded read/write/prefetch input queues plus an unbounded outgoing
/// min-heap, with write-to-read forwarding and a write-drain arbitration
/// policy.
pub struct IOBus {
    read_queue: VecDeque<Transaction>,
    write_queue: VecDeque<Transaction>,
    prefetch_queue: VecDeque<Transaction>,
    outgoing: BinaryHeap<Reverse<Outgoing>>,
    pending_reads: HashMap<u64, usize>,
    pending_writes: HashMap<u64, usize>,
    rq_size: usize,
    wq_size: usize,
    pq_size: usize,
    draining: bool,
    next_seq: u64,
    /// Cycles spent serving a drained write while a read or prefetch was
    /// waiting behind it.
    pub stat_blocked_on_drain: u64,
}

impl IOBus {
    /// Creates a bus with the given per-queue capacities. `pq_size == 0`
    /// disables the prefetch queue entirely (used by [`crate::dram`]
    /// channels, which carry no prefetch traffic).
    #[must_use]
    pub fn new(rq_size: usize, wq_size: usize, pq_size: usize) -> Self {
        Self {
            read_queue: VecDeque::new(),
            write_queue: VecDeque::new(),
            prefetch_queue: VecDeque::new(),
            outgoing: BinaryHeap::new(),
            pending_reads: HashMap::new(),
            pending_writes: HashMap::new(),
            rq_size,
            wq_size,
            pq_size,
            draining: false,
            next_seq: 0,
            stat_blocked_on_drain: 0,
        }
    }

    /// Attempts to accept `t`. Returns `false` only as backpressure (the
    /// destination queue is full); this is the sole signal callers must
    /// respect.
    pub fn add_incoming(&mut self, t: Transaction, now: u64) -> bool {
        let pending_write = self.pending_writes.get(&t.address).copied().unwrap_or(0) > 0;
        if pending_write {
            if t.kind.is_read() {
                self.add_outgoing(t, 1, now);
            } else {
                *self.pending_writes.entry(t.address).or_insert(0) += 1;
            }
            return true;
        }
        match t.kind {
            TransactionType::Write => {
                if self.write_queue.len() >= self.wq_size {
                    return false;
                }
                *self.pending_writes.entry(t.address).or_insert(0) += 1;
                self.write_queue.push_back(t);
            }
            TransactionType::Prefetch => {
                if self.pq_size == 0 || self.prefetch_queue.len() >= self.pq_size {
                    return false;
                }
                self.prefetch_queue.push_back(t);
            }
            TransactionType::Read | TransactionType::Translation => {
                if self.read_queue.len() >= self.rq_size {
                    return false;
                }
                *self.pending_reads.entry(t.address).or_insert(0) += 1;
                self.read_queue.push_back(t);
            }
        }
        true
    }

    fn should_enter_drain(&self) -> bool {
        self.write_queue.len() >= self.wq_size
            || (self.read_queue.is_empty()
                && self.prefetch_queue.is_empty()
                && self.write_queue.len() > DRAIN_THRESHOLD)
    }

    /// Arbitrates among the three input queues. `pred` additionally gates
    /// whichever candidate is about to be returned (used by DRAM channels
    /// to check target-bank command-queue capacity).
    pub fn get_next_incoming(&mut self, pred: impl Fn(&Transaction) -> bool) -> Option<Transaction> {
        if self.should_enter_drain() {
            self.draining = true;
        }
        if self.draining {
            let waiters_present = !self.read_queue.is_empty() || !self.prefetch_queue.is_empty();
            if let Some(idx) = self.write_queue.iter().position(|t| {
                self.pending_reads.get(&t.address).copied().unwrap_or(0) == 0 && pred(t)
            }) {
                // SAFETY-relevant invariant: `idx` was found by scanning
                // `self.write_queue` immediately above.
                let t = self.write_queue.remove(idx).unwrap_or_else(|| {
                    unreachable!("index returned by position() is always in bounds")
                });
                if let Some(count) = self.pending_writes.get_mut(&t.address) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.pending_writes.remove(&t.address);
                    }
                }
                if waiters_present {
                    self.stat_blocked_on_drain += 1;
                }
                return Some(t);
            }
            // Blocked for a whole scan: drop out of drain mode.
            self.draining = false;
        }
        if let Some(t) = self.read_queue.front() {
            if pred(t) {
                let t = self
                    .read_queue
                    .pop_front()
                    .unwrap_or_else(|| unreachable!("front() just returned Some"));
                if let Some(count) = self.pending_reads.get_mut(&t.address) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.pending_reads.remove(&t.address);
                    }
                }
                return Some(t);
            }
            return None;
        }
        if let Some(t) = self.prefetch_queue.front() {
            if pred(t) {
                return self.prefetch_queue.pop_front();
            }
        }
        None
    }

    /// Schedules `t` onto the outgoing min-heap at `now + latency`. Only
    /// reads and translations are ever returned to a requester; writes and
    /// completed prefetches are fire-and-forget.
    pub fn add_outgoing(&mut self, t: Transaction, latency: u64, now: u64) {
        if !matches!(t.kind, TransactionType::Read | TransactionType::Translation) {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outgoing.push(Reverse(Outgoing {
            ready_cycle: now + latency,
            seq,
            trans: t,
        }));
    }

    /// Pops and returns every outgoing transaction whose ready cycle has
    /// arrived, in ready-cycle order.
    pub fn drain_ready(&mut self, now: u64) -> Vec<Transaction> {
        let mut out = Vec::new();
        while let Some(Reverse(top)) = self.outgoing.peek() {
            if top.ready_cycle > now {
                break;
            }
            let Reverse(entry) = self
                .outgoing
                .pop()
                .unwrap_or_else(|| unreachable!("peek() just returned Some"));
            out.push(entry.trans);
        }
        out
    }

    /// Number of pending reads on `addr` (used by DRAM write-drain hazard
    /// checks in other components and by tests).
    #[must_use]
    pub fn pending_reads_for(&self, addr: u64) -> usize {
        self.pending_reads.get(&addr).copied().unwrap_or(0)
    }

    /// Number of pending writes on `addr`.
    #[must_use]
    pub fn pending_writes_for(&self, addr: u64) -> usize {
        self.pending_writes.get(&addr).copied().unwrap_or(0)
    }

    /// Total occupancy across the three bounded input queues.
    #[must_use]
    pub fn input_occupancy(&self) -> usize {
        self.read_queue.len() + self.write_queue.len() + self.prefetch_queue.len()
    }

    /// Whether the write queue is completely full.
    #[must_use]
    pub fn write_queue_full(&self) -> bool {
        self.write_queue.len() >= self.wq_size
    }

    /// Whether `kind`'s destination queue has room for one more entry.
    ///
    /// A conservative pre-check for callers (the driver's LLC-to-DRAM
    /// staging drain) that must decide whether to pop a transaction from
    /// some other queue before knowing `add_incoming` will accept it. Unlike
    /// `add_incoming`, this ignores the pending-write forwarding shortcut, so
    /// it can under-report room for a read that would actually be forwarded
    /// straight to outgoing; that only costs a cycle of delay, never
    /// correctness.
    #[must_use]
    pub fn has_room_for(&self, kind: TransactionType) -> bool {
        match kind {
            TransactionType::Write => self.write_queue.len() < self.wq_size,
            TransactionType::Prefetch => self.pq_size > 0 && self.prefetch_queue.len() < self.pq_size,
            TransactionType::Read | TransactionType::Translation => self.read_queue.len() < self.rq_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use std::cell::RefCell;
    use std::rc::Rc;
    use crate::transaction::{InstState, Instruction};

    fn dummy_inst() -> crate::transaction::InstRef {
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

    #[test]
    fn forwarding_read_after_pending_write_s3() {
        let mut bus = IOBus::new(8, 8, 8);
        let w = Transaction::detached(0, TransactionType::Write, 0x3000);
        assert!(bus.add_incoming(w, 0));
        assert_eq!(bus.pending_writes_for(0x3000), 1);

        let r = Transaction::new(0, TransactionType::Read, 0x3000, dummy_inst());
        assert!(bus.add_incoming(r, 0));
        // Must not have entered the read queue.
        assert!(bus.get_next_incoming(|_| true).is_none());
        let ready = bus.drain_ready(1);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].address, 0x3000);
    }

    #[test]
    fn write_drain_blocks_reads_until_drained() {
        let mut bus = IOBus::new(8, 2, 8);
        assert!(bus.add_incoming(Transaction::detached(0, TransactionType::Write, 0x10), 0));
        assert!(bus.add_incoming(Transaction::detached(0, TransactionType::Write, 0x20), 0));
        // WQ is now full; a third write is backpressured.
        assert!(!bus.add_incoming(Transaction::detached(0, TransactionType::Write, 0x30), 0));

        let r = Transaction::new(0, TransactionType::Read, 0x99, dummy_inst());
        // Read queue accept still succeeds (separate queue).
        assert!(bus.add_incoming(r, 0));

        // Draining mode must prefer a write over the queued read.
        let next = bus.get_next_incoming(|_| true);
        assert!(matches!(next.unwrap().kind, TransactionType::Write));
    }
}
