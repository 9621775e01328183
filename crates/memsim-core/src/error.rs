//! Crate-wide error types.
//!
//! Only the fatal categories of the error taxonomy are represented here;
//! backpressure (an IOBus full, an MSHR saturated) is never an error and is
//! represented by a plain `bool`/`Option` return at the call site instead.

use thiserror::Error;

/// Errors arising from opening or decoding a trace file.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The trace file could not be opened or read.
    #[error("failed to read trace file {path}: {source}")]
    Io {
        /// Path that failed to open.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file ended in the middle of a fixed-size record.
    #[error("truncated trace record in {path} at byte offset {offset}")]
    TruncatedRecord {
        /// Path of the offending trace.
        path: String,
        /// Byte offset at which decoding failed.
        offset: u64,
    },
    /// A Champsim record's register read/write bits did not match any
    /// documented branch pattern.
    #[error("unclassifiable branch pattern at instruction {inst_num}: {bits:#010b}")]
    UnclassifiableBranch {
        /// Sequence number of the offending instruction.
        inst_num: u64,
        /// The raw register-use bitmask that failed classification.
        bits: u8,
    },
    /// Neither the trace's filename nor a `--format` override identified
    /// its binary schema.
    #[error("cannot infer trace format for {path}; pass --format explicitly")]
    UnknownFormat {
        /// Path whose format could not be sniffed.
        path: String,
    },
}

/// Errors arising from parsing or validating a [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to open.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file was not valid JSON, or did not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A numeric field was out of range for its use (e.g. a non-power-of-two
    /// set count).
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable explanation.
        reason: String,
    },
}

/// Top-level simulator error.
///
/// Every fatal category in the error taxonomy maps to exactly one variant
/// here; the CLI matches on this type, prints its `Display` form, and exits
/// with status 1.
#[derive(Debug, Error)]
pub enum SimError {
    /// Trace file could not be opened, decoded, or classified.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The page-frame allocator exhausted its sampling budget.
    #[error("free list exhausted: {free} free of {total} page frames")]
    PageFrameExhausted {
        /// Free frames remaining at the time of failure.
        free: usize,
        /// Total frames managed by the allocator.
        total: usize,
    },

    /// An instruction made no progress for longer than the deadlock budget.
    #[error("deadlock detected on core {coreid} at cycle {cycle}: instruction {inst_num} stalled")]
    Deadlock {
        /// Global cycle at which the tripwire fired.
        cycle: u64,
        /// Core on which the stalled instruction is running.
        coreid: u8,
        /// Sequence number of the stalled instruction.
        inst_num: u64,
    },

    /// A completion signal arrived for a line address with no matching MSHR
    /// entry.
    #[error("zombie MSHR wakeup for address {address:#x} at level {level}")]
    ZombieMshrWakeup {
        /// The address the spurious completion targeted.
        address: u64,
        /// Human-readable name of the cache level that detected it.
        level: &'static str,
    },

    /// A completion signal targeted an instruction that no longer has any
    /// live handle.
    #[error("zombie instruction wakeup at cycle {cycle}")]
    ZombieInstructionWakeup {
        /// Global cycle at which the spurious wakeup was observed.
        cycle: u64,
    },
}

/// Convenience alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;
