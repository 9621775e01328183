//! Global simulation clocks.
//!
//! `GL_CYCLE` and `GL_DRAM_CYCLE` are conceptually simulation-scoped
//! monotonic counters. Rather than process-wide mutable state, they live as
//! fields on a [`SimClock`] owned by the driver and threaded explicitly into
//! every component's tick.

/// CPU-cycle and DRAM-cycle counters, plus the clock-domain-crossing
/// accumulator that relates them.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimClock {
    /// Monotonic CPU cycle counter.
    pub cycle: u64,
    /// Monotonic DRAM cycle counter, advanced at a different rate than
    /// `cycle` via the `leap` accumulator.
    pub dram_cycle: u64,
    /// Fractional CPU-cycles-per-DRAM-cycle carry, accumulated by
    /// [`crate::dram::Dram::tick`].
    pub leap: f64,
}

impl SimClock {
    /// Creates a clock at cycle zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cycle: 0,
            dram_cycle: 0,
            leap: 0.0,
        }
    }

    /// Advances the CPU cycle counter by one.
    pub fn tick_cpu(&mut self) {
        self.cycle += 1;
    }
}
