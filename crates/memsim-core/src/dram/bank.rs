//! Per-bank state and command representation.

use std::collections::VecDeque;

use crate::transaction::Transaction;

/// The DRAM command issued to satisfy one transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DRAMCommandType {
    /// Read with the row left open.
    Read,
    /// Read with an automatic precharge.
    ReadPrecharge,
    /// Write with the row left open.
    Write,
    /// Write with an automatic precharge.
    WritePrecharge,
    /// Open a row.
    Activate,
    /// Close the open row.
    Precharge,
}

impl DRAMCommandType {
    /// True for `Read`/`ReadPrecharge`.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, DRAMCommandType::Read | DRAMCommandType::ReadPrecharge)
    }

    /// True for `Write`/`WritePrecharge`.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, DRAMCommandType::Write | DRAMCommandType::WritePrecharge)
    }

    /// True if this is a column access (`Read`/`Write`, with or without
    /// auto-precharge) as opposed to `Activate`/`Precharge`.
    #[must_use]
    pub const fn is_column_access(self) -> bool {
        self.is_read() || self.is_write()
    }
}

/// One entry in a bank's command queue: a transaction waiting on the
/// command needed to service it (ACT, PRE, or the CAS itself).
#[derive(Clone, Debug)]
pub struct DRAMCommand {
    /// The transaction this command ultimately services.
    pub trans: Transaction,
    /// The currently-selected command type for this queue entry. Updated
    /// in place as the bank transitions ACT → (PRE →) CAS.
    pub cmd_type: DRAMCommandType,
}

/// Per-bank open-row tracking and timing gates.
#[derive(Debug)]
pub struct DRAMBank {
    /// Currently open row, if any.
    pub open_row: Option<usize>,
    /// Number of CAS commands issued to the currently open row.
    pub num_cas_to_open_row: u64,
    /// Commands queued for this bank, oldest first.
    pub cmd_queue: VecDeque<DRAMCommand>,
    /// Number of queued writes (ARRFCFS phase tracking).
    pub num_writes_in_cmdq: usize,
    /// Whether this bank is currently in its write-drain phase (ARRFCFS).
    pub write_draining: bool,
    /// Cycle at which the next ACTIVATE is legal.
    pub act_ok_cycle: u64,
    /// Cycle at which the next PRECHARGE is legal.
    pub pre_ok_cycle: u64,
    /// Cycle at which the next CAS is legal.
    pub cas_ok_cycle: u64,
    /// Set right before an ACTIVATE that followed a row-conflict
    /// PRECHARGE; consumed by the first CAS to the newly-opened row to
    /// decide whether it counts as a row-buffer hit (a cold open of an
    /// idle bank still counts as a hit, a conflict reopen does not).
    pub act_was_conflict: bool,
    /// Transient: set when a conflict PRECHARGE is issued, carried into
    /// `act_was_conflict` by the following ACTIVATE.
    pub pending_conflict: bool,
}

impl DRAMBank {
    /// Creates a freshly-reset, closed bank.
    #[must_use]
    pub fn new() -> Self {
        Self {
            open_row: None,
            num_cas_to_open_row: 0,
            cmd_queue: VecDeque::new(),
            num_writes_in_cmdq: 0,
            write_draining: false,
            act_ok_cycle: 0,
            pre_ok_cycle: 0,
            cas_ok_cycle: 0,
            act_was_conflict: false,
            pending_conflict: false,
        }
    }
}

impl Default for DRAMBank {
    fn default() -> Self {
        Self::new()
    }
}
