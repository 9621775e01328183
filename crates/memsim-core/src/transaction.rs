//! The unit of work carried through the memory hierarchy.
//!
//! A [`Transaction`] is created once, by a core or by an internal component
//! (the page-table walker, a writeback), and is handed from level to level by
//! value until it either completes (an outgoing reply is scheduled) or is
//! coalesced into an existing in-flight request.

use std::cell::RefCell;
use std::rc::Rc;

/// The kind of memory operation a [`Transaction`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionType {
    /// A demand read. The only type ever forwarded back to a waiting
    /// instruction.
    Read,
    /// A store. Never scheduled onto an outgoing queue; fire-and-forget once
    /// accepted by a level.
    Write,
    /// A prefetch. Treated like a read for queueing purposes but never
    /// returned to the requester on completion.
    Prefetch,
    /// A page-table-walker access. Carries a physical line address (not a
    /// VPN) once it leaves the walker; only ever issued by a
    /// [`crate::mmu::PageTableWalker`].
    Translation,
}

impl TransactionType {
    /// True for every type except [`TransactionType::Write`].
    ///
    /// Matches the source convention that "is a read" is defined by
    /// exclusion rather than enumeration, so a newly added type defaults to
    /// read-like behavior unless explicitly carved out.
    #[must_use]
    pub const fn is_read(self) -> bool {
        !matches!(self, TransactionType::Write)
    }
}

/// State of an in-flight instruction as observed by the memory hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstState {
    /// Waiting on an address translation.
    WaitingOnTranslation,
    /// Translation complete, waiting on the data access.
    WaitingOnAccess,
    /// Data (or translation-only) access has completed.
    Ready,
}

/// A single in-flight trace instruction, as referenced by the transactions
/// issued on its behalf.
///
/// Cache controllers and the page-table walker never own an `Instruction`;
/// they hold [`InstRef`] handles cloned from the core that created it. The
/// instruction survives as long as any `InstRef` handle (including the
/// core's own bookkeeping) is alive.
#[derive(Debug)]
pub struct Instruction {
    /// Sequence number from the trace, used for human-readable diagnostics.
    pub inst_num: u64,
    /// Virtual instruction pointer.
    pub ip: u64,
    /// Physical instruction pointer, filled in once the ITLB replies.
    pub pip: Option<u64>,
    /// Virtual load/store line address, if this instruction accesses data.
    pub v_lineaddr: Option<u64>,
    /// Physical load/store line address, filled in once the DTLB replies.
    pub p_lineaddr: Option<u64>,
    /// Whether the data access (if any) is a store.
    pub is_write: bool,
    /// Current state of this instruction's in-flight accesses.
    pub state: InstState,
}

/// A reference-counted, interior-mutable handle to an in-flight
/// [`Instruction`].
///
/// This is the Rust realization of the "instruction references form a
/// graph" design note: a `Transaction` clones one of these per waiter rather
/// than holding a borrowed reference, so coalesced misses can be released
/// independently of the lifetime of any one originating call frame.
pub type InstRef = Rc<RefCell<Instruction>>;

/// Returns `true` if both handles point at the same underlying instruction.
///
/// Used by the deadlock diagnostic to compare by identity rather than by
/// value, per the decision recorded in `SPEC_FULL.md` section 9.
#[must_use]
pub fn inst_ref_eq(a: &InstRef, b: &InstRef) -> bool {
    Rc::ptr_eq(a, b)
}

/// Unit of work carried through the cache/TLB/DRAM hierarchy.
///
/// Immutable after construction except for `kind`, which is rewritten from
/// `Write` to `Read` when a write miss is converted into a read on
/// write-allocate.
#[derive(Clone, Debug)]
pub struct Transaction {
    /// Originating core.
    pub coreid: u8,
    /// Operation kind.
    pub kind: TransactionType,
    /// Line-granular address, except at the TLB input (a VPN) and the
    /// PTW-to-L1D hop (a physical line address derived from a page-table
    /// entry).
    pub address: u64,
    /// True if `address` denotes an instruction-fetch address rather than a
    /// load/store address (relevant only for TLB-level transactions).
    pub address_is_ip: bool,
    /// Instructions waiting on this transaction's completion. May contain
    /// more than one entry once coalesced with a duplicate in-flight
    /// request.
    pub inst_refs: Vec<InstRef>,
}

impl Transaction {
    /// Creates a new transaction with a single waiting instruction.
    #[must_use]
    pub fn new(coreid: u8, kind: TransactionType, address: u64, inst: InstRef) -> Self {
        Self {
            coreid,
            kind,
            address,
            address_is_ip: false,
            inst_refs: vec![inst],
        }
    }

    /// Creates a transaction with no waiting instruction (writebacks,
    /// internal PTW accesses).
    #[must_use]
    pub fn detached(coreid: u8, kind: TransactionType, address: u64) -> Self {
        Self {
            coreid,
            kind,
            address,
            address_is_ip: false,
            inst_refs: Vec::new(),
        }
    }

    /// Creates a TLB-bound translation request.
    #[must_use]
    pub fn translation_request(coreid: u8, vpn: u64, address_is_ip: bool, inst: InstRef) -> Self {
        Self {
            coreid,
            kind: TransactionType::Translation,
            address: vpn,
            address_is_ip,
            inst_refs: vec![inst],
        }
    }

    /// Merges another transaction's waiters into this one (MSHR
    /// coalescing).
    pub fn merge_waiters(&mut self, other: &Transaction) {
        self.inst_refs.extend(other.inst_refs.iter().cloned());
    }
}
