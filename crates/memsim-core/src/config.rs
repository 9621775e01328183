//! Configuration system for the memory-hierarchy simulator.
//!
//! A hierarchical, `serde`-deserializable structure holding every geometry
//! and timing parameter needed to build the cache/TLB/DRAM hierarchy: a
//! private `defaults` module of baseline constants, with `#[serde(default =
//! "...")]` on every field so a partial JSON config file only needs to name
//! the fields it overrides. `Config::default()` is the single-core,
//! DDR5-4800, FRFCFS/open-page, LRU-everywhere baseline used when no
//! `--config` file is given.

use serde::{Deserialize, Serialize};

use crate::cache::controller::ControllerConfig;
use crate::cache::policy::ReplacementPolicy;
use crate::dram::{AddressMapKind, ArbitrationPolicy, DramTiming, PagePolicy};

/// Default configuration constants for the simulator.
mod defaults {
    use crate::cache::policy::ReplacementPolicy;
    use crate::dram::{AddressMapKind, ArbitrationPolicy, PagePolicy};

    pub const WARMUP_INSTRUCTIONS: u64 = 10_000_000;
    pub const MEASURED_INSTRUCTIONS: u64 = 10_000_000;
    pub const NUM_CORES: usize = 1;
    pub const LINESIZE: u64 = 64;
    pub const PAGESIZE: u64 = 4096;
    pub const PT_LEVELS: u32 = 4;
    pub const FANOUT_BITS: u32 = 9;
    pub const PTESIZE: u64 = 8;
    pub const DEADLOCK_CYCLES: u64 = 500_000;
    pub const FREE_LIST_SEED: u64 = 0x5EED_F00D_C0FF_EE12;

    pub const POLICY: ReplacementPolicy = ReplacementPolicy::Lru;

    pub const L1I_SETS: usize = 64;
    pub const L1I_WAYS: usize = 8;
    pub const L1I_LATENCY: u64 = 4;

    pub const L1D_SETS: usize = 64;
    pub const L1D_WAYS: usize = 8;
    pub const L1D_LATENCY: u64 = 5;

    pub const L2_SETS: usize = 512;
    pub const L2_WAYS: usize = 8;
    pub const L2_LATENCY: u64 = 12;

    pub const LLC_SETS: usize = 2048;
    pub const LLC_WAYS: usize = 16;
    pub const LLC_LATENCY: u64 = 35;

    pub const CORE_NUM_MSHR: usize = 16;
    pub const CORE_RQ_SIZE: usize = 16;
    pub const CORE_WQ_SIZE: usize = 16;
    pub const CORE_PQ_SIZE: usize = 8;
    pub const CORE_NUM_RW_PORTS: usize = 2;

    pub const ITLB_SETS: usize = 16;
    pub const ITLB_WAYS: usize = 4;
    pub const ITLB_LATENCY: u64 = 1;

    pub const DTLB_SETS: usize = 16;
    pub const DTLB_WAYS: usize = 4;
    pub const DTLB_LATENCY: u64 = 1;

    pub const L2TLB_SETS: usize = 64;
    pub const L2TLB_WAYS: usize = 8;
    pub const L2TLB_LATENCY: u64 = 8;

    pub const TLB_NUM_MSHR: usize = 8;
    pub const TLB_RQ_SIZE: usize = 8;
    pub const TLB_WQ_SIZE: usize = 8;
    pub const TLB_NUM_RW_PORTS: usize = 1;

    pub const PTW_CACHE_ENTRIES: usize = 16;

    pub const DRAM_CHANNELS: usize = 2;
    pub const DRAM_RANKS: usize = 1;
    pub const DRAM_BANKGROUPS: usize = 8;
    pub const DRAM_BANKS_PER_GROUP: usize = 4;
    pub const DRAM_ROWS: usize = 65536;
    pub const DRAM_COLUMNS: usize = 128;
    pub const DRAM_BURST_LENGTH: usize = 16;
    pub const DRAM_RQ_SIZE: usize = 128;
    pub const DRAM_WQ_SIZE: usize = 128;
    pub const DRAM_ARBITRATION: ArbitrationPolicy = ArbitrationPolicy::Frfcfs;
    pub const DRAM_ADDRESS_MAP: AddressMapKind = AddressMapKind::Mop;
    pub const DRAM_PAGE_POLICY: PagePolicy = PagePolicy::Open;
    pub const F_CPU_GHZ: f64 = 4.0;
    pub const F_DRAM_GHZ: f64 = 2.4;
}

/// Top-level configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instruction counts, core count, and address-translation geometry.
    #[serde(default)]
    pub general: GeneralConfig,
    /// L1I/L1D/L2/LLC geometry and controller parameters.
    #[serde(default)]
    pub cache_hierarchy: CacheHierarchyConfig,
    /// ITLB/DTLB/L2TLB geometry and page-table-walker cache capacity.
    #[serde(default)]
    pub tlb_hierarchy: TlbHierarchyConfig,
    /// DRAM geometry, timing, arbitration, and address-map layout.
    #[serde(default)]
    pub dram: DramConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            cache_hierarchy: CacheHierarchyConfig::default(),
            tlb_hierarchy: TlbHierarchyConfig::default(),
            dram: DramConfig::default(),
        }
    }
}

/// Instruction counts, core count, and the address-translation constants
/// shared by every core's [`crate::vmem::VirtualMemory`] and
/// [`crate::mmu::PageTableWalker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Instructions executed before statistics collection begins.
    #[serde(default = "GeneralConfig::default_warmup_instructions")]
    pub warmup_instructions: u64,
    /// Instructions executed (after warmup) whose statistics are reported.
    #[serde(default = "GeneralConfig::default_measured_instructions")]
    pub measured_instructions: u64,
    /// Number of cores, each with its own MMU and L1 caches sharing one
    /// L2/LLC/DRAM.
    #[serde(default = "GeneralConfig::default_num_cores")]
    pub num_cores: usize,
    /// Cache line size in bytes.
    #[serde(default = "GeneralConfig::default_linesize")]
    pub linesize: u64,
    /// Page size in bytes.
    #[serde(default = "GeneralConfig::default_pagesize")]
    pub pagesize: u64,
    /// Page-table depth.
    #[serde(default = "GeneralConfig::default_pt_levels")]
    pub pt_levels: u32,
    /// Bits of virtual address consumed per page-table level.
    #[serde(default = "GeneralConfig::default_fanout_bits")]
    pub fanout_bits: u32,
    /// Page-table entry size in bytes.
    #[serde(default = "GeneralConfig::default_ptesize")]
    pub ptesize: u64,
    /// Cycles an instruction may stall with no forward progress before the
    /// deadlock tripwire fires.
    #[serde(default = "GeneralConfig::default_deadlock_cycles")]
    pub deadlock_cycles: u64,
}

impl GeneralConfig {
    fn default_warmup_instructions() -> u64 {
        defaults::WARMUP_INSTRUCTIONS
    }
    fn default_measured_instructions() -> u64 {
        defaults::MEASURED_INSTRUCTIONS
    }
    fn default_num_cores() -> usize {
        defaults::NUM_CORES
    }
    fn default_linesize() -> u64 {
        defaults::LINESIZE
    }
    fn default_pagesize() -> u64 {
        defaults::PAGESIZE
    }
    fn default_pt_levels() -> u32 {
        defaults::PT_LEVELS
    }
    fn default_fanout_bits() -> u32 {
        defaults::FANOUT_BITS
    }
    fn default_ptesize() -> u64 {
        defaults::PTESIZE
    }
    fn default_deadlock_cycles() -> u64 {
        defaults::DEADLOCK_CYCLES
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            warmup_instructions: defaults::WARMUP_INSTRUCTIONS,
            measured_instructions: defaults::MEASURED_INSTRUCTIONS,
            num_cores: defaults::NUM_CORES,
            linesize: defaults::LINESIZE,
            pagesize: defaults::PAGESIZE,
            pt_levels: defaults::PT_LEVELS,
            fanout_bits: defaults::FANOUT_BITS,
            ptesize: defaults::PTESIZE,
            deadlock_cycles: defaults::DEADLOCK_CYCLES,
        }
    }
}

/// Geometry and controller parameters for one cache (or TLB) level, shared
/// by both `cache_hierarchy` and `tlb_hierarchy` since both are built from
/// the same [`crate::cache::controller::CacheController`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheLevelConfig {
    pub sets: usize,
    pub ways: usize,
    pub policy: ReplacementPolicy,
    pub latency: u64,
    pub num_mshr: usize,
    pub rq_size: usize,
    pub wq_size: usize,
    pub pq_size: usize,
    pub write_allocate: bool,
    pub invalidate_on_hit: bool,
    pub num_rw_ports: usize,
}

impl CacheLevelConfig {
    /// Builds the [`ControllerConfig`] half of a
    /// [`crate::cache::controller::CacheController`] from this level's
    /// parameters, given whether the next level invalidates on hit.
    #[must_use]
    pub fn controller_config(&self, next_is_invalidate_on_hit: bool) -> ControllerConfig {
        ControllerConfig {
            num_mshr: self.num_mshr,
            write_allocate: self.write_allocate,
            invalidate_on_hit: self.invalidate_on_hit,
            next_is_invalidate_on_hit,
            num_rw_ports: self.num_rw_ports,
            cache_latency: self.latency,
            rq_size: self.rq_size,
            wq_size: self.wq_size,
            pq_size: self.pq_size,
        }
    }
}

/// L1I/L1D/L2/LLC geometry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheHierarchyConfig {
    #[serde(default = "CacheHierarchyConfig::default_l1i")]
    pub l1i: CacheLevelConfig,
    #[serde(default = "CacheHierarchyConfig::default_l1d")]
    pub l1d: CacheLevelConfig,
    #[serde(default = "CacheHierarchyConfig::default_l2")]
    pub l2: CacheLevelConfig,
    #[serde(default = "CacheHierarchyConfig::default_llc")]
    pub llc: CacheLevelConfig,
}

impl CacheHierarchyConfig {
    fn core_level(sets: usize, ways: usize, latency: u64, write_allocate: bool) -> CacheLevelConfig {
        CacheLevelConfig {
            sets,
            ways,
            policy: defaults::POLICY,
            latency,
            num_mshr: defaults::CORE_NUM_MSHR,
            rq_size: defaults::CORE_RQ_SIZE,
            wq_size: defaults::CORE_WQ_SIZE,
            pq_size: defaults::CORE_PQ_SIZE,
            write_allocate,
            invalidate_on_hit: false,
            num_rw_ports: defaults::CORE_NUM_RW_PORTS,
        }
    }

    fn default_l1i() -> CacheLevelConfig {
        Self::core_level(defaults::L1I_SETS, defaults::L1I_WAYS, defaults::L1I_LATENCY, false)
    }
    fn default_l1d() -> CacheLevelConfig {
        Self::core_level(defaults::L1D_SETS, defaults::L1D_WAYS, defaults::L1D_LATENCY, true)
    }
    fn default_l2() -> CacheLevelConfig {
        Self::core_level(defaults::L2_SETS, defaults::L2_WAYS, defaults::L2_LATENCY, true)
    }
    fn default_llc() -> CacheLevelConfig {
        Self::core_level(defaults::LLC_SETS, defaults::LLC_WAYS, defaults::LLC_LATENCY, true)
    }
}

impl Default for CacheHierarchyConfig {
    fn default() -> Self {
        Self {
            l1i: Self::default_l1i(),
            l1d: Self::default_l1d(),
            l2: Self::default_l2(),
            llc: Self::default_llc(),
        }
    }
}

/// Entries-per-level capacity for the small fully-associative page-walk
/// caches in [`crate::mmu::PageTableWalker`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PtwCacheConfig {
    #[serde(default = "PtwCacheConfig::default_entries_per_level")]
    pub entries_per_level: usize,
}

impl PtwCacheConfig {
    fn default_entries_per_level() -> usize {
        defaults::PTW_CACHE_ENTRIES
    }
}

impl Default for PtwCacheConfig {
    fn default() -> Self {
        Self { entries_per_level: defaults::PTW_CACHE_ENTRIES }
    }
}

/// ITLB/DTLB/L2TLB geometry and page-walk-cache capacity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TlbHierarchyConfig {
    #[serde(default = "TlbHierarchyConfig::default_itlb")]
    pub itlb: CacheLevelConfig,
    #[serde(default = "TlbHierarchyConfig::default_dtlb")]
    pub dtlb: CacheLevelConfig,
    #[serde(default = "TlbHierarchyConfig::default_l2tlb")]
    pub l2tlb: CacheLevelConfig,
    #[serde(default)]
    pub ptw_cache: PtwCacheConfig,
}

impl TlbHierarchyConfig {
    fn tlb_level(sets: usize, ways: usize, latency: u64) -> CacheLevelConfig {
        CacheLevelConfig {
            sets,
            ways,
            policy: defaults::POLICY,
            latency,
            num_mshr: defaults::TLB_NUM_MSHR,
            rq_size: defaults::TLB_RQ_SIZE,
            wq_size: defaults::TLB_WQ_SIZE,
            pq_size: 0,
            write_allocate: false,
            invalidate_on_hit: false,
            num_rw_ports: defaults::TLB_NUM_RW_PORTS,
        }
    }

    fn default_itlb() -> CacheLevelConfig {
        Self::tlb_level(defaults::ITLB_SETS, defaults::ITLB_WAYS, defaults::ITLB_LATENCY)
    }
    fn default_dtlb() -> CacheLevelConfig {
        Self::tlb_level(defaults::DTLB_SETS, defaults::DTLB_WAYS, defaults::DTLB_LATENCY)
    }
    fn default_l2tlb() -> CacheLevelConfig {
        Self::tlb_level(defaults::L2TLB_SETS, defaults::L2TLB_WAYS, defaults::L2TLB_LATENCY)
    }
}

impl Default for TlbHierarchyConfig {
    fn default() -> Self {
        Self {
            itlb: Self::default_itlb(),
            dtlb: Self::default_dtlb(),
            l2tlb: Self::default_l2tlb(),
            ptw_cache: PtwCacheConfig::default(),
        }
    }
}

/// DRAM geometry, queueing, arbitration, and timing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DramConfig {
    #[serde(default = "DramConfig::default_channels")]
    pub channels: usize,
    #[serde(default = "DramConfig::default_ranks")]
    pub ranks: usize,
    #[serde(default = "DramConfig::default_bankgroups")]
    pub bankgroups: usize,
    #[serde(default = "DramConfig::default_banks_per_group")]
    pub banks_per_group: usize,
    #[serde(default = "DramConfig::default_rows")]
    pub rows: usize,
    #[serde(default = "DramConfig::default_columns")]
    pub columns: usize,
    #[serde(default = "DramConfig::default_burst_length")]
    pub burst_length: usize,
    #[serde(default = "DramConfig::default_rq_size")]
    pub rq_size: usize,
    #[serde(default = "DramConfig::default_wq_size")]
    pub wq_size: usize,
    #[serde(default = "DramConfig::default_arbitration")]
    pub arbitration: ArbitrationPolicy,
    #[serde(default = "DramConfig::default_address_map")]
    pub address_map: AddressMapKind,
    #[serde(default = "DramConfig::default_page_policy")]
    pub page_policy: PagePolicy,
    /// CPU clock frequency in GHz, used to derive the DRAM/CPU clock-domain
    /// crossing ratio and the frequency-scaled JEDEC timing parameters.
    #[serde(default = "DramConfig::default_f_cpu_ghz")]
    pub f_cpu_ghz: f64,
    /// DRAM clock frequency in GHz.
    #[serde(default = "DramConfig::default_f_dram_ghz")]
    pub f_dram_ghz: f64,
}

impl DramConfig {
    fn default_channels() -> usize {
        defaults::DRAM_CHANNELS
    }
    fn default_ranks() -> usize {
        defaults::DRAM_RANKS
    }
    fn default_bankgroups() -> usize {
        defaults::DRAM_BANKGROUPS
    }
    fn default_banks_per_group() -> usize {
        defaults::DRAM_BANKS_PER_GROUP
    }
    fn default_rows() -> usize {
        defaults::DRAM_ROWS
    }
    fn default_columns() -> usize {
        defaults::DRAM_COLUMNS
    }
    fn default_burst_length() -> usize {
        defaults::DRAM_BURST_LENGTH
    }
    fn default_rq_size() -> usize {
        defaults::DRAM_RQ_SIZE
    }
    fn default_wq_size() -> usize {
        defaults::DRAM_WQ_SIZE
    }
    fn default_arbitration() -> ArbitrationPolicy {
        defaults::DRAM_ARBITRATION
    }
    fn default_address_map() -> AddressMapKind {
        defaults::DRAM_ADDRESS_MAP
    }
    fn default_page_policy() -> PagePolicy {
        defaults::DRAM_PAGE_POLICY
    }
    fn default_f_cpu_ghz() -> f64 {
        defaults::F_CPU_GHZ
    }
    fn default_f_dram_ghz() -> f64 {
        defaults::F_DRAM_GHZ
    }

    /// Resolves the frequency-scaled DDR5-4800 timing table, with this
    /// config's page policy substituted for the constructor's default.
    #[must_use]
    pub fn timing(&self) -> DramTiming {
        DramTiming { page_policy: self.page_policy, ..DramTiming::ddr5_4800(self.f_dram_ghz) }
    }
}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            channels: defaults::DRAM_CHANNELS,
            ranks: defaults::DRAM_RANKS,
            bankgroups: defaults::DRAM_BANKGROUPS,
            banks_per_group: defaults::DRAM_BANKS_PER_GROUP,
            rows: defaults::DRAM_ROWS,
            columns: defaults::DRAM_COLUMNS,
            burst_length: defaults::DRAM_BURST_LENGTH,
            rq_size: defaults::DRAM_RQ_SIZE,
            wq_size: defaults::DRAM_WQ_SIZE,
            arbitration: defaults::DRAM_ARBITRATION,
            address_map: defaults::DRAM_ADDRESS_MAP,
            page_policy: defaults::DRAM_PAGE_POLICY,
            f_cpu_ghz: defaults::F_CPU_GHZ,
            f_dram_ghz: defaults::F_DRAM_GHZ,
        }
    }
}

/// Loads a `Config` from a JSON file, falling back to
/// `Config::default()` field-by-field for anything the file omits.
pub fn load(path: &std::path::Path) -> Result<Config, crate::error::ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| crate::error::ConfigError::Io { path: path.display().to_string(), source })?;
    serde_json::from_str(&text).map_err(crate::error::ConfigError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.general.num_cores, cfg.general.num_cores);
        assert_eq!(back.dram.channels, cfg.dram.channels);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{"general": {"num_cores": 4}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.general.num_cores, 4);
        assert_eq!(cfg.general.warmup_instructions, defaults::WARMUP_INSTRUCTIONS);
        assert_eq!(cfg.cache_hierarchy.l1d.sets, defaults::L1D_SETS);
    }

    #[test]
    fn empty_json_object_yields_the_default_config() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.dram.arbitration, defaults::DRAM_ARBITRATION);
        assert_eq!(cfg.tlb_hierarchy.ptw_cache.entries_per_level, defaults::PTW_CACHE_ENTRIES);
    }

    #[test]
    fn dram_timing_honors_configured_page_policy() {
        let mut dram = DramConfig::default();
        dram.page_policy = PagePolicy::Closed;
        assert_eq!(dram.timing().page_policy, PagePolicy::Closed);
    }
}
