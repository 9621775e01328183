//! Simulation statistics collection and reporting.
//!
//! Tracks per-core instruction/stall counters, per-cache-level
//! [`crate::cache::controller::ControllerStats`] (one set per core for
//! L1I/L1D/L2, one shared set for the LLC), and per-DRAM-channel
//! [`crate::dram::channel::ChannelStats`]. The driver owns one `SimStats`
//! for the measured phase and writes into its fields directly; this module
//! only renders the final report.

use std::time::Instant;

use crate::cache::controller::ControllerStats;
use crate::dram::ChannelStats;

/// Per-core counters outside of any single cache level: retirement,
/// memory-op issue counts, and cycles consumed approaching the deadlock
/// tripwire.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreStats {
    pub instructions_retired: u64,
    pub loads_issued: u64,
    pub stores_issued: u64,
    /// Cycles the core's oldest in-flight instruction spent making no
    /// forward progress, summed across every stall episode (not just the
    /// one that ultimately tripped the deadlock error, if any).
    pub stall_cycles: u64,
}

/// Full set of statistics accumulated over the measured phase.
#[derive(Debug, Clone)]
pub struct SimStats {
    start_time: Instant,
    /// Global cycles elapsed during the measured phase.
    pub cycles: u64,
    pub cores: Vec<CoreStats>,
    pub l1i: Vec<ControllerStats>,
    pub l1d: Vec<ControllerStats>,
    pub l2: Vec<ControllerStats>,
    pub llc: ControllerStats,
    pub channels: Vec<ChannelStats>,
}

/// Valid section identifiers for [`SimStats::print_sections`].
pub const STATS_SECTIONS: &[&str] = &["summary", "core", "cache", "dram"];

impl SimStats {
    /// Builds a zeroed set of statistics sized for `num_cores` cores and
    /// `num_channels` DRAM channels.
    #[must_use]
    pub fn new(num_cores: usize, num_channels: usize) -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            cores: vec![CoreStats::default(); num_cores],
            l1i: vec![ControllerStats::default(); num_cores],
            l1d: vec![ControllerStats::default(); num_cores],
            l2: vec![ControllerStats::default(); num_cores],
            llc: ControllerStats::default(),
            channels: vec![ChannelStats::default(); num_channels],
        }
    }

    fn cache_row(name: &str, s: &ControllerStats, instructions: u64) {
        let total = (s.accesses + s.misses).max(1);
        let miss_rate = 100.0 * s.misses as f64 / total as f64;
        let aat = if s.misses > 0 { s.miss_penalty_cycles as f64 / s.misses as f64 } else { 0.0 };
        let apki = 1000.0 * s.accesses as f64 / instructions.max(1) as f64;
        let mpki = 1000.0 * s.misses as f64 / instructions.max(1) as f64;
        println!(
            "  {name:<6} accesses: {:<10} misses: {:<10} miss_rate: {miss_rate:>6.2}% \
apki: {apki:>8.3} mpki: {mpki:>8.3} aat: {aat:>7.2} invalidates: {:<8} \
write_alloc: {:<8} writebacks: {:<8} write_blocked: {}",
            s.accesses, s.misses, s.invalidates, s.write_allocations, s.writebacks, s.writeback_blocked_cycles,
        );
    }

    fn channel_row(idx: usize, s: &ChannelStats) {
        let cas_total = (s.reads_issued + s.writes_issued).max(1);
        let row_hit_rate = 100.0 * s.row_buffer_hits as f64 / cas_total as f64;
        println!(
            "  ch{idx:<2} reads: {:<8} writes: {:<8} activates: {:<8} precharges: {:<8} \
refreshes: {:<6} row_hit_rate: {row_hit_rate:>6.2}% write_blocked_cycles: {}",
            s.reads_issued, s.writes_issued, s.activates, s.demand_precharges, s.refreshes, s.write_blocked_cycles,
        );
    }

    /// Prints only the requested sections. Valid names are
    /// [`STATS_SECTIONS`]; an empty slice prints all of them.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let seconds = self.start_time.elapsed().as_secs_f64();
        let cyc = self.cycles.max(1);

        println!("\n==========================================================");
        println!("MEMORY HIERARCHY SIMULATION STATISTICS");
        println!("==========================================================");

        if want("summary") {
            let total_instructions: u64 = self.cores.iter().map(|c| c.instructions_retired).sum();
            println!("host_seconds             {seconds:.4} s");
            println!("sim_cycles               {}", self.cycles);
            println!("sim_insts                {total_instructions}");
            println!("----------------------------------------------------------");
        }

        if want("core") {
            println!("PER-CORE");
            for (i, c) in self.cores.iter().enumerate() {
                let ipc = c.instructions_retired as f64 / cyc as f64;
                println!(
                    "  core{i:<2} insts: {:<10} ipc: {ipc:>6.4} loads: {:<10} stores: {:<10} stall_cycles: {}",
                    c.instructions_retired, c.loads_issued, c.stores_issued, c.stall_cycles,
                );
            }
            println!("----------------------------------------------------------");
        }

        if want("cache") {
            println!("CACHE HIERARCHY");
            let total_instructions: u64 = self.cores.iter().map(|c| c.instructions_retired).sum();
            for (i, s) in self.l1i.iter().enumerate() {
                Self::cache_row(&format!("L1I{i}"), s, self.cores[i].instructions_retired);
            }
            for (i, s) in self.l1d.iter().enumerate() {
                Self::cache_row(&format!("L1D{i}"), s, self.cores[i].instructions_retired);
            }
            for (i, s) in self.l2.iter().enumerate() {
                Self::cache_row(&format!("L2_{i}"), s, self.cores[i].instructions_retired);
            }
            Self::cache_row("LLC", &self.llc, total_instructions);
            println!("----------------------------------------------------------");
        }

        if want("dram") {
            println!("DRAM");
            for (i, s) in self.channels.iter().enumerate() {
                Self::channel_row(i, s);
            }
            println!("----------------------------------------------------------");
        }

        println!("==========================================================");
    }

    /// Prints every section. Equivalent to `print_sections(&[])`.
    pub fn print(&self) {
        self.print_sections(&[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sizes_vectors_to_core_and_channel_count() {
        let stats = SimStats::new(2, 4);
        assert_eq!(stats.cores.len(), 2);
        assert_eq!(stats.l1i.len(), 2);
        assert_eq!(stats.channels.len(), 4);
    }

    #[test]
    fn print_sections_accepts_every_documented_name() {
        let stats = SimStats::new(1, 1);
        let sections: Vec<String> = STATS_SECTIONS.iter().map(|s| s.to_string()).collect();
        stats.print_sections(&sections);
    }
}
