//! DRAM command-arbitration policies.
//!
//! Grounded in the free-function-per-policy shape of the redesigned bank
//! scheduler: each policy scans a bank's command queue and proposes the
//! next command to attempt, without itself checking timing legality (that
//! is `cmd_is_issuable`'s job, applied by the caller).

use serde::{Deserialize, Serialize};

use super::bank::DRAMBank;

/// Which DRAM command-arbitration policy a channel uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationPolicy {
    /// Only ever consider the head of the queue.
    Fcfs,
    /// First-ready, first-come-first-served: prefer row hits anywhere in
    /// the queue, with a starvation cap on indefinitely deferring the head.
    Frfcfs,
    /// FRFCFS, but never selects a row-hit write ahead of a later row-hit
    /// read.
    Frrfcfs,
    /// FRFCFS with an explicit read/write phase split.
    Arrfcfs,
}

/// Starvation cap: once this many CAS commands have issued to the open row
/// without servicing the head-of-queue's row-miss entry, the head is
/// allowed to precharge regardless of pending same-row peers.
const STARVATION_CAP: u64 = 4;

/// A command proposed by [`select_next_command`], not yet checked for
/// timing legality.
#[derive(Clone, Copy, Debug)]
pub enum Selected {
    /// Issue the CAS already staged at `index` in the bank's queue.
    Cas { index: usize },
    /// Precharge the bank's currently open row.
    Precharge,
    /// Activate `row`.
    Activate { row: usize },
}

fn row_of(bank: &DRAMBank, row_fn: impl Fn(u64) -> usize, addr: u64) -> usize {
    row_fn(addr)
}

/// Scans `bank`'s command queue under `policy` and proposes the next
/// command to attempt, or `None` if the queue is empty.
pub fn select_next_command(
    bank: &DRAMBank,
    policy: ArbitrationPolicy,
    row_fn: impl Fn(u64) -> usize,
) -> Option<Selected> {
    if bank.cmd_queue.is_empty() {
        return None;
    }
    match policy {
        ArbitrationPolicy::Fcfs => select_fcfs(bank, row_fn),
        ArbitrationPolicy::Frfcfs => select_scan(bank, row_fn, false),
        ArbitrationPolicy::Frrfcfs => select_scan(bank, row_fn, true),
        ArbitrationPolicy::Arrfcfs => select_arrfcfs(bank, row_fn),
    }
}

fn select_fcfs(bank: &DRAMBank, row_fn: impl Fn(u64) -> usize) -> Option<Selected> {
    let head = bank.cmd_queue.front()?;
    let r = row_of(bank, &row_fn, head.trans.address);
    Some(match bank.open_row {
        Some(open) if open == r => Selected::Cas { index: 0 },
        Some(_) => Selected::Precharge,
        None => Selected::Activate { row: r },
    })
}

fn select_scan(bank: &DRAMBank, row_fn: impl Fn(u64) -> usize, forbid_write_ahead_of_read_hit: bool) -> Option<Selected> {
    let Some(open) = bank.open_row else {
        // Bank idle: activate the head's row.
        let head = bank.cmd_queue.front()?;
        return Some(Selected::Activate {
            row: row_of(bank, &row_fn, head.trans.address),
        });
    };
    for (idx, entry) in bank.cmd_queue.iter().enumerate() {
        let r = row_of(bank, &row_fn, entry.trans.address);
        if r == open {
            if forbid_write_ahead_of_read_hit && entry.cmd_type.is_write() {
                let blocked_by_later_read_hit = bank.cmd_queue.iter().skip(idx + 1).any(|later| {
                    later.cmd_type.is_read() && row_of(bank, &row_fn, later.trans.address) == open
                });
                if blocked_by_later_read_hit {
                    continue;
                }
            }
            return Some(Selected::Cas { index: idx });
        }
        // Only the head may propose a precharge; non-head row misses are
        // skipped entirely.
        if idx != 0 {
            continue;
        }
        let num_pending_same_row = bank
            .cmd_queue
            .iter()
            .skip(1)
            .filter(|c| row_of(bank, &row_fn, c.trans.address) == open)
            .count();
        if num_pending_same_row > 0 && bank.num_cas_to_open_row < STARVATION_CAP {
            continue;
        }
        return Some(Selected::Precharge);
    }
    None
}

fn select_arrfcfs(bank: &DRAMBank, row_fn: impl Fn(u64) -> usize) -> Option<Selected> {
    let Some(open) = bank.open_row else {
        let head = bank.cmd_queue.front()?;
        return Some(Selected::Activate {
            row: row_of(bank, &row_fn, head.trans.address),
        });
    };
    let draining = bank.write_draining;
    for (idx, entry) in bank.cmd_queue.iter().enumerate() {
        if entry.cmd_type.is_write() && !draining {
            continue;
        }
        let r = row_of(bank, &row_fn, entry.trans.address);
        if r == open {
            return Some(Selected::Cas { index: idx });
        }
        if idx != 0 {
            continue;
        }
        let num_pending_same_row = bank
            .cmd_queue
            .iter()
            .skip(1)
            .filter(|c| row_of(bank, &row_fn, c.trans.address) == open)
            .count();
        if num_pending_same_row > 0 && bank.num_cas_to_open_row < STARVATION_CAP {
            continue;
        }
        return Some(Selected::Precharge);
    }
    None
}
