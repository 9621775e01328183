//! Trace-driven, cycle-accurate simulator of a multi-core CPU memory
//! hierarchy.
//!
//! This crate models:
//! 1. **Cache:** a generic set-associative [`cache::controller::CacheController`]
//!    used for every level (L1I/L1D/L2/LLC, ITLB/DTLB/L2TLB), with MSHR
//!    coalescing, writeback, and write-allocate.
//! 2. **MMU:** lazily-built page tables ([`vmem`]) and a per-core page-table
//!    walker ([`mmu`]) that replays each level's table access through the L1D.
//! 3. **DRAM:** per-channel JEDEC command scheduling, bank timing, and
//!    arbitration policy ([`dram`]).
//! 4. **Driver:** [`driver::Simulator`] owns every component, runs the
//!    warmup/measured phases, and drives each core's fetch/translate/access
//!    stage machine one trace record at a time.

/// Generic set-associative cache: tag store, replacement policy, I/O queues,
/// and the controller that wires them to a next-level hop.
pub mod cache;
/// Global simulation clocks (CPU cycle and DRAM-domain-crossing counters).
pub mod clock;
/// Configuration system: hierarchical, `serde`-deserializable geometry and
/// timing parameters for the whole simulator.
pub mod config;
/// DRAM: address mapping, per-channel command scheduling, JEDEC timing.
pub mod dram;
/// The simulator driver: builds every component from a `Config` and runs
/// the warmup/measured phases.
pub mod driver;
/// Crate-wide error types.
pub mod error;
/// Address translation: the per-core page-table walker and its caches.
pub mod mmu;
/// The memory-management subsystem: per-core virtual memory, page-table
/// walker, and TLB hierarchy.
pub mod os;
/// Simulation statistics collection and reporting.
pub mod stats;
/// Trace-file decoding: two binary record schemas behind a uniform reader.
pub mod trace;
/// The unit of work carried through the memory hierarchy.
pub mod transaction;
/// Lazily-built page tables and the physical-frame allocator behind them.
pub mod vmem;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Top-level simulator; owns every component and runs the simulation.
pub use crate::driver::Simulator;
/// Crate-wide error and result types.
pub use crate::error::{SimError, SimResult};
/// Accumulated statistics from a completed run.
pub use crate::stats::SimStats;
