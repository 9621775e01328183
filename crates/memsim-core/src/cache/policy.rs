//! Replacement policy selection and per-entry replacement metadata.
//!
//! The specification enumerates four policies at runtime (a cache level's
//! policy is a [`crate::config::Config`] value, not a compile-time choice),
//! so rather than one monomorphized `CacheArray` type per policy this module
//! represents the policy as a small tagged enum with branch-on-tag in the
//! hot path, per the design note on runtime replacement policy dispatch.

use serde::{Deserialize, Serialize};

/// The fixed SRRIP re-reference prediction value ceiling.
pub const SRRIP_MAX: u8 = 7;

/// Which replacement policy a [`super::array::CacheArray`] uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// Evict the entry with the smallest LRU timestamp.
    Lru,
    /// Evict a uniformly random occupied way.
    Rand,
    /// Static re-reference interval prediction.
    Srrip,
    /// No storage; every probe hits and no victim is ever produced.
    Perfect,
}

/// Deterministic xorshift64 generator used by [`ReplacementPolicy::Rand`].
///
/// Grounded in the same LFSR construction used for cache-way selection
/// elsewhere in this codebase: avoids pulling in a full RNG crate for a
/// single per-array die roll, and keeps replay bit-identical across runs
/// given a fixed seed.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Creates a generator with the given nonzero seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    /// Produces the next pseudo-random 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Produces a value in `0..bound`.
    pub fn next_bounded(&mut self, bound: usize) -> usize {
        (self.next_u64() as usize) % bound
    }
}
