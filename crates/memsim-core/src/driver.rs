//! The simulator driver: owns every component, builds them from a `Config`,
//! and runs the warmup/measured phases described in `SPEC_FULL.md` section 5.

use std::path::Path;

use tracing::{error, info};

use crate::cache::controller::{CacheController, ControllerConfig};
use crate::cache::policy::ReplacementPolicy;
use crate::config::Config;
use crate::dram::{AddressMap, Dram};
use crate::error::{SimError, SimResult, TraceError};
use crate::mmu::PageTableWalker;
use crate::os::Os;
use crate::stats::{CoreStats, SimStats};
use crate::trace::{self, TraceFormat, TraceReader, TraceRecord};
use crate::transaction::{inst_ref_eq, InstRef, InstState, Instruction, Transaction, TransactionType};
use crate::vmem::{FreeList, VirtualMemory};

/// A representative load/store extracted from a trace record.
///
/// Only one data access per instruction is modeled, matching `Instruction`'s
/// singular `v_lineaddr`/`is_write` fields: the first load if the record has
/// any, else the first store, else the instruction touches no data memory.
#[derive(Clone, Copy, Debug)]
struct MemOp {
    v_lineaddr: u64,
    is_write: bool,
}

fn representative_mem_op(record: &TraceRecord) -> Option<MemOp> {
    if let Some(&addr) = record.loads.first() {
        Some(MemOp { v_lineaddr: addr, is_write: false })
    } else {
        record.stores.first().map(|&addr| MemOp { v_lineaddr: addr, is_write: true })
    }
}

/// Progress of the current front instruction through fetch translation,
/// fetch access, data translation, and data access. A core tracks exactly
/// one of these at a time; there is no reorder buffer (out of scope, see
/// `SPEC_FULL.md` section 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    FetchTranslate,
    FetchTranslateWait,
    FetchAccess,
    FetchAccessWait,
    DataTranslate,
    DataTranslateWait,
    DataAccess,
    DataAccessWait,
}

struct Front {
    inst: InstRef,
    mem: Option<MemOp>,
    stage: Stage,
    stall_since: u64,
}

/// One core's private L1I/L1D/L2, its trace stream, and its single
/// in-flight front instruction.
struct Core {
    coreid: u8,
    l1i: CacheController,
    l1d: CacheController,
    l2: CacheController,
    trace: Box<dyn TraceReader>,
    linesize: u64,
    front: Option<Front>,
    warmup_remaining: u64,
    measured_remaining: u64,
    done: bool,
}

impl Core {
    fn next_front(&mut self) -> SimResult<bool> {
        let Some(result) = self.trace.next() else {
            return Ok(false);
        };
        let record = result?;
        let ip = record.ip.map(|raw| raw / self.linesize);
        let mem = representative_mem_op(&record);
        let inst = Instruction {
            inst_num: record.inst_num,
            ip: ip.unwrap_or(0),
            pip: None,
            v_lineaddr: mem.map(|m| m.v_lineaddr),
            p_lineaddr: None,
            is_write: mem.is_some_and(|m| m.is_write),
            state: InstState::WaitingOnTranslation,
        };
        let stage = if ip.is_some() { Stage::FetchTranslate } else { Stage::DataTranslate };
        self.front = Some(Front {
            inst: std::rc::Rc::new(std::cell::RefCell::new(inst)),
            mem,
            stage,
            stall_since: 0,
        });
        Ok(true)
    }

    /// Synchronously warms this core's caches/TLBs/PTW for one trace record,
    /// with no cycle accounting. Returns `false` once the trace is exhausted.
    fn warmup_step(&mut self, os: &mut Os, llc: &mut CacheController) -> SimResult<bool> {
        let Some(result) = self.trace.next() else {
            return Ok(false);
        };
        let record = result?;
        if let Some(raw_ip) = record.ip {
            let ip = raw_ip / self.linesize;
            os.warmup_translate_ip(self.coreid, ip)?;
            self.l1i.warmup_access(ip, false, &mut [&mut self.l2, llc]);
        }
        if let Some(mem) = representative_mem_op(&record) {
            os.warmup_translate_ldst(self.coreid, mem.v_lineaddr)?;
            self.l1d.warmup_access(mem.v_lineaddr, mem.is_write, &mut [&mut self.l2, llc]);
        }
        Ok(true)
    }

    fn retire(&mut self, stats: &mut CoreStats) {
        let Some(front) = self.front.take() else {
            return;
        };
        stats.instructions_retired += 1;
        if let Some(mem) = front.mem {
            if mem.is_write {
                stats.stores_issued += 1;
            } else {
                stats.loads_issued += 1;
            }
        }
    }

    /// Advances the front instruction's stage machine by at most one step,
    /// submitting a fresh Transaction whenever a stage becomes issuable.
    /// Returns `true` if an instruction retired this tick.
    fn advance(&mut self, os: &mut Os, now: u64, deadlock_cycles: u64, stats: &mut CoreStats) -> SimResult<bool> {
        if self.front.is_none() {
            if !self.next_front()? {
                self.done = true;
                return Ok(false);
            }
            if let Some(front) = self.front.as_mut() {
                front.stall_since = now;
            }
        }
        let front = match self.front.as_mut() {
            Some(f) => f,
            None => unreachable!("front was just populated above"),
        };

        if now.saturating_sub(front.stall_since) > deadlock_cycles {
            let inst_num = front.inst.borrow().inst_num;
            error!(coreid = self.coreid, inst_num, cycle = now, "deadlock tripwire fired");
            return Err(SimError::Deadlock { cycle: now, coreid: self.coreid, inst_num });
        }

        let progressed = match front.stage {
            Stage::FetchTranslate => {
                if os.translate_ip(self.coreid, &front.inst, now) {
                    front.stage = Stage::FetchTranslateWait;
                    true
                } else {
                    false
                }
            }
            Stage::FetchTranslateWait => {
                let ready = front.inst.borrow().state == InstState::Ready;
                if ready {
                    front.inst.borrow_mut().state = InstState::WaitingOnAccess;
                    front.stage = Stage::FetchAccess;
                    true
                } else {
                    false
                }
            }
            Stage::FetchAccess => {
                let pip = match front.inst.borrow().pip {
                    Some(p) => p,
                    None => unreachable!("fetch access requires a resolved pip"),
                };
                let t = Transaction::new(self.coreid, TransactionType::Read, pip, front.inst.clone());
                if self.l1i.io.add_incoming(t, now) {
                    front.stage = Stage::FetchAccessWait;
                    true
                } else {
                    false
                }
            }
            Stage::FetchAccessWait => {
                let ready = front.inst.borrow().state == InstState::Ready;
                if !ready {
                    false
                } else if front.mem.is_some() {
                    front.inst.borrow_mut().state = InstState::WaitingOnTranslation;
                    front.stage = Stage::DataTranslate;
                    true
                } else {
                    self.retire(stats);
                    return Ok(true);
                }
            }
            Stage::DataTranslate => {
                let vln = match front.mem {
                    Some(m) => m.v_lineaddr,
                    None => unreachable!("data stages require a mem op"),
                };
                if os.translate_ldst(self.coreid, &front.inst, vln, now) {
                    front.stage = Stage::DataTranslateWait;
                    true
                } else {
                    false
                }
            }
            Stage::DataTranslateWait => {
                let ready = front.inst.borrow().state == InstState::Ready;
                if ready {
                    front.inst.borrow_mut().state = InstState::WaitingOnAccess;
                    front.stage = Stage::DataAccess;
                    true
                } else {
                    false
                }
            }
            Stage::DataAccess => {
                let mem = match front.mem {
                    Some(m) => m,
                    None => unreachable!("data stages require a mem op"),
                };
                let p_lineaddr = match front.inst.borrow().p_lineaddr {
                    Some(p) => p,
                    None => unreachable!("data access requires a resolved p_lineaddr"),
                };
                let kind = if mem.is_write { TransactionType::Write } else { TransactionType::Read };
                let t = Transaction::new(self.coreid, kind, p_lineaddr, front.inst.clone());
                if !self.l1d.io.add_incoming(t, now) {
                    false
                } else if mem.is_write {
                    self.retire(stats);
                    return Ok(true);
                } else {
                    front.stage = Stage::DataAccessWait;
                    true
                }
            }
            Stage::DataAccessWait => {
                let ready = front.inst.borrow().state == InstState::Ready;
                if ready {
                    self.retire(stats);
                    return Ok(true);
                }
                false
            }
        };

        if let Some(front) = self.front.as_mut() {
            if progressed {
                front.stall_since = now;
            }
        }
        if !progressed {
            stats.stall_cycles += 1;
        }
        Ok(false)
    }

    /// Ticks this core's private cache chain. Draining outgoing replies and
    /// routing them back to the front instruction is the driver's job (it
    /// alone can reach both a core's caches and the shared OS).
    fn tick_caches(&mut self, llc: &mut CacheController, now: u64) -> SimResult<()> {
        self.l1i.tick(&mut self.l2, now)?;
        self.l1d.tick(&mut self.l2, now)?;
        self.l2.tick(llc, now)?;
        Ok(())
    }
}

fn make_dram_sink() -> CacheController {
    let cfg = ControllerConfig {
        num_mshr: 64,
        write_allocate: false,
        invalidate_on_hit: false,
        next_is_invalidate_on_hit: false,
        num_rw_ports: 1,
        cache_latency: 0,
        rq_size: 64,
        wq_size: 64,
        pq_size: 0,
    };
    CacheController::new("DRAM_SINK", cfg, 1, 1, ReplacementPolicy::Lru)
}

fn dram_bytes(cfg: &Config) -> u64 {
    let d = &cfg.dram;
    (d.channels * d.ranks * d.bankgroups * d.banks_per_group * d.rows * d.columns) as u64 * cfg.general.linesize
}

fn build_core(coreid: u8, cfg: &Config, trace: Box<dyn TraceReader>) -> Core {
    let ch = &cfg.cache_hierarchy;
    let l1i = CacheController::new("L1I", ch.l1i.controller_config(ch.l2.invalidate_on_hit), ch.l1i.sets, ch.l1i.ways, ch.l1i.policy);
    let l1d = CacheController::new("L1D", ch.l1d.controller_config(ch.l2.invalidate_on_hit), ch.l1d.sets, ch.l1d.ways, ch.l1d.policy);
    let l2 = CacheController::new("L2", ch.l2.controller_config(ch.llc.invalidate_on_hit), ch.l2.sets, ch.l2.ways, ch.l2.policy);
    Core {
        coreid,
        l1i,
        l1d,
        l2,
        trace,
        linesize: cfg.general.linesize,
        front: None,
        warmup_remaining: cfg.general.warmup_instructions,
        measured_remaining: cfg.general.measured_instructions,
        done: false,
    }
}

/// Per-core free-list seed: the shared default XORed with the core index, so
/// sibling cores don't allocate identical page-frame sequences.
const FREE_LIST_SEED: u64 = 0x5EED_F00D_C0FF_EE12;

fn build_os(cfg: &Config) -> Os {
    let tl = &cfg.tlb_hierarchy;
    let bytes = dram_bytes(cfg);
    let mut per_core = Vec::with_capacity(cfg.general.num_cores);
    for coreid in 0..cfg.general.num_cores {
        let free_list = FreeList::new(bytes, cfg.general.pagesize, FREE_LIST_SEED ^ coreid as u64);
        let vmem = VirtualMemory::new(cfg.general.pt_levels, cfg.general.fanout_bits, free_list);
        let ptw = PageTableWalker::new(
            cfg.general.pt_levels,
            cfg.general.fanout_bits,
            cfg.general.pagesize,
            cfg.general.ptesize,
            cfg.general.linesize,
            tl.ptw_cache.entries_per_level,
        );
        let l2tlb = CacheController::new("L2TLB", tl.l2tlb.controller_config(false), tl.l2tlb.sets, tl.l2tlb.ways, tl.l2tlb.policy);
        let itlb = CacheController::new("ITLB", tl.itlb.controller_config(tl.l2tlb.invalidate_on_hit), tl.itlb.sets, tl.itlb.ways, tl.itlb.policy);
        let dtlb = CacheController::new("DTLB", tl.dtlb.controller_config(tl.l2tlb.invalidate_on_hit), tl.dtlb.sets, tl.dtlb.ways, tl.dtlb.policy);
        per_core.push((vmem, ptw, l2tlb, itlb, dtlb));
    }
    Os::new(per_core, cfg.general.linesize, cfg.general.pagesize.trailing_zeros())
}

fn build_dram(cfg: &Config) -> Dram {
    let d = &cfg.dram;
    let map = AddressMap::new(d.address_map, d.channels, d.bankgroups, d.banks_per_group, d.ranks, d.rows, d.columns);
    Dram::new(
        d.channels,
        d.banks_per_group * d.bankgroups,
        d.banks_per_group,
        d.arbitration,
        d.timing(),
        map,
        d.rq_size,
        d.wq_size,
        d.f_cpu_ghz,
        d.f_dram_ghz,
    )
}

/// Owns every simulator component and drives the warmup/measured phases.
pub struct Simulator {
    cores: Vec<Core>,
    os: Os,
    llc: CacheController,
    dram_sink: CacheController,
    dram: Dram,
    clock: crate::clock::SimClock,
    config: Config,
    rotate: usize,
    stats: SimStats,
}

impl Simulator {
    /// Builds the full hierarchy from `config`, opening one independent
    /// trace stream per core (every core replays the same trace file).
    pub fn new(config: Config, trace_path: &Path, format: Option<TraceFormat>) -> SimResult<Self> {
        let format = match format.or_else(|| TraceFormat::sniff(trace_path)) {
            Some(f) => f,
            None => return Err(SimError::Trace(TraceError::UnknownFormat { path: trace_path.display().to_string() })),
        };

        let ch = &config.cache_hierarchy;
        let llc = CacheController::new("LLC", ch.llc.controller_config(false), ch.llc.sets, ch.llc.ways, ch.llc.policy);
        let dram_sink = make_dram_sink();
        let dram = build_dram(&config);
        let os = build_os(&config);

        let mut cores = Vec::with_capacity(config.general.num_cores);
        for coreid in 0..config.general.num_cores {
            let reader = trace::open(trace_path, format, config.general.linesize)?;
            cores.push(build_core(coreid as u8, &config, reader));
        }

        let num_channels = config.dram.channels;
        let num_cores = config.general.num_cores;
        Ok(Self {
            cores,
            os,
            llc,
            dram_sink,
            dram,
            clock: crate::clock::SimClock::new(),
            config,
            rotate: 0,
            stats: SimStats::new(num_cores, num_channels),
        })
    }

    fn warmup(&mut self) -> SimResult<()> {
        for core in &mut self.cores {
            while core.warmup_remaining > 0 {
                if !core.warmup_step(&mut self.os, &mut self.llc)? {
                    break;
                }
                core.warmup_remaining -= 1;
            }
        }
        info!("warmup phase complete");
        Ok(())
    }

    fn drain_dram_sink(&mut self) {
        let now = self.clock.cycle;
        while let Some(t) = self.dram_sink.io.get_next_incoming(|t| self.dram.has_capacity_for(t)) {
            let _ = self.dram.add_incoming(t, now);
        }
    }

    fn drain_llc_outgoing(&mut self) -> SimResult<()> {
        let now = self.clock.cycle;
        for t in self.llc.io.drain_ready(now) {
            let coreid = t.coreid as usize;
            if let Some(core) = self.cores.get_mut(coreid) {
                core.l2.mark_load_as_done(t.address, &mut self.llc, now)?;
            }
        }
        Ok(())
    }

    /// Drains a just-ticked core's L1I/L1D outgoing replies: forwards
    /// TRANSLATION completions to the OS's page-table walker, and marks the
    /// front instruction ready for anything else that matches it.
    fn route_core_outgoing(&mut self, idx: usize, now: u64) {
        for t in self.cores[idx].l1i.io.drain_ready(now) {
            if let Some(front) = self.cores[idx].front.as_ref() {
                if t.inst_refs.iter().any(|r| inst_ref_eq(r, &front.inst)) {
                    front.inst.borrow_mut().state = InstState::Ready;
                }
            }
        }
        for t in self.cores[idx].l1d.io.drain_ready(now) {
            if t.kind == TransactionType::Translation {
                self.os.handle_l1d_outgoing(self.cores[idx].coreid, &t);
            } else if let Some(front) = self.cores[idx].front.as_ref() {
                if t.inst_refs.iter().any(|r| inst_ref_eq(r, &front.inst)) {
                    front.inst.borrow_mut().state = InstState::Ready;
                }
            }
        }
    }

    fn tick(&mut self) -> SimResult<()> {
        let now = self.clock.cycle;

        self.dram.tick(now, &mut self.llc, &mut self.dram_sink)?;
        self.llc.tick(&mut self.dram_sink, now)?;
        self.drain_dram_sink();

        for core in &mut self.cores {
            if !core.done {
                self.os.tick(core.coreid, &mut core.l1d, now)?;
            }
        }

        self.drain_llc_outgoing()?;

        let n = self.cores.len().max(1);
        for i in 0..self.cores.len() {
            let idx = (self.rotate + i) % n;
            if self.cores[idx].done {
                continue;
            }
            self.cores[idx].tick_caches(&mut self.llc, now)?;
            self.route_core_outgoing(idx, now);

            if self.cores[idx].measured_remaining == 0 {
                self.cores[idx].done = true;
                continue;
            }
            let coreid = self.cores[idx].coreid as usize;
            let deadlock_cycles = self.config.general.deadlock_cycles;
            let retired = self.cores[idx].advance(&mut self.os, now, deadlock_cycles, &mut self.stats.cores[coreid])?;
            if retired {
                self.cores[idx].measured_remaining -= 1;
                if self.cores[idx].measured_remaining == 0 {
                    self.cores[idx].done = true;
                }
            }
        }
        self.rotate = (self.rotate + 1) % n;
        self.clock.tick_cpu();
        Ok(())
    }

    /// Runs the warmup phase, then the measured phase until every core has
    /// retired its measured-instruction quota or exhausted its trace.
    pub fn run(mut self) -> SimResult<SimStats> {
        self.warmup()?;
        loop {
            if self.cores.iter().all(|c| c.done) {
                break;
            }
            self.tick()?;
        }
        self.stats.cycles = self.clock.cycle;
        for (i, core) in self.cores.iter().enumerate() {
            self.stats.l1i[i] = core.l1i.stats;
            self.stats.l1d[i] = core.l1d.stats;
            self.stats.l2[i] = core.l2.stats;
        }
        self.stats.llc = self.llc.stats;
        self.stats.channels = self.dram.channel_stats();
        info!(cycles = self.stats.cycles, "measured phase complete");
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::Config;

    const RECORD_SIZE: usize = 5 + 1 + 4;

    fn memsim_record(inst_num: u64, is_write: bool, v_lineaddr: u32) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..5].copy_from_slice(&inst_num.to_le_bytes()[..5]);
        buf[5] = u8::from(is_write);
        buf[6..10].copy_from_slice(&v_lineaddr.to_le_bytes());
        buf
    }

    fn write_memsim_trace(records: &[(u64, bool, u32)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp trace file");
        for &(inst_num, is_write, addr) in records {
            file.write_all(&memsim_record(inst_num, is_write, addr)).expect("write trace record");
        }
        file.flush().expect("flush temp trace file");
        file
    }

    fn small_config(warmup: u64, measured: u64) -> Config {
        let mut cfg = Config::default();
        cfg.general.num_cores = 1;
        cfg.general.warmup_instructions = warmup;
        cfg.general.measured_instructions = measured;
        cfg
    }

    #[test]
    fn single_load_retires_and_touches_l1d() {
        let trace = write_memsim_trace(&[(0, false, 0x10)]);
        let cfg = small_config(0, 1);
        let sim = Simulator::new(cfg, trace.path(), Some(TraceFormat::Memsim)).expect("build simulator");
        let stats = sim.run().expect("run simulator");

        assert_eq!(stats.cores[0].instructions_retired, 1);
        assert_eq!(stats.cores[0].loads_issued, 1);
        assert_eq!(stats.cores[0].stores_issued, 0);
        assert_eq!(stats.l1d[0].accesses, 1);
    }

    #[test]
    fn measured_phase_retires_exactly_its_quota_after_warmup() {
        let records: Vec<(u64, bool, u32)> =
            (0..8).map(|i| (i, i % 3 == 0, 0x100 + (i as u32) * 64)).collect();
        let trace = write_memsim_trace(&records);
        let cfg = small_config(3, 5);
        let sim = Simulator::new(cfg, trace.path(), Some(TraceFormat::Memsim)).expect("build simulator");
        let stats = sim.run().expect("run simulator");

        assert_eq!(stats.cores[0].instructions_retired, 5);
    }

    #[test]
    fn trace_shorter_than_measured_quota_still_completes() {
        let trace = write_memsim_trace(&[(0, false, 0x10), (1, true, 0x20)]);
        let cfg = small_config(0, 100);
        let sim = Simulator::new(cfg, trace.path(), Some(TraceFormat::Memsim)).expect("build simulator");
        let stats = sim.run().expect("run simulator");

        assert_eq!(stats.cores[0].instructions_retired, 2);
    }

    #[test]
    fn unknown_format_is_rejected_up_front() {
        let trace = write_memsim_trace(&[(0, false, 0x10)]);
        let cfg = small_config(0, 1);
        let err = Simulator::new(cfg, trace.path(), None).expect_err("unsniffable filename must fail");
        assert!(matches!(err, SimError::Trace(TraceError::UnknownFormat { .. })));
    }

    #[test]
    fn repeated_access_to_same_line_hits_in_l1d() {
        let trace = write_memsim_trace(&[(0, false, 0x10), (1, false, 0x10), (2, false, 0x10)]);
        let cfg = small_config(0, 3);
        let sim = Simulator::new(cfg, trace.path(), Some(TraceFormat::Memsim)).expect("build simulator");
        let stats = sim.run().expect("run simulator");

        assert_eq!(stats.cores[0].instructions_retired, 3);
        assert_eq!(stats.l1d[0].accesses, 3);
        assert_eq!(stats.l1d[0].misses, 1, "only the first access to a line should miss");
    }
}
