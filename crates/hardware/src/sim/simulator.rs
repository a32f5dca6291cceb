//! The simulator: N cores sharing an uncore, driven by one feeder.
//!
//! The master tick loop advances every core by one cycle, then the uncore
//! once per configured clock ratio. Everything runs on one thread; shared
//! uncore structures are touched only from `step_uncore`, which serializes
//! cross-core access by construction.

use std::io::Write;

use crate::common::error::{SimError, SimResult};
use crate::common::{Asid, Tick};
use crate::config::Config;
use crate::core::Core;
use crate::mem::MemorySystem;
use crate::mem::translate::v2p_translate;
use crate::oracle::feeder::Feeder;
use crate::stats::{CacheReport, SimStats};

/// The whole simulated machine.
pub struct Simulator {
    /// Configuration the machine was built from.
    pub config: Config,
    /// The cores.
    pub cores: Vec<Core>,
    /// The memory hierarchy.
    pub mem: MemorySystem,
    feeder: Box<dyn Feeder>,
    now: Tick,
    uncore_cycles: u64,
    slice: u64,
}

impl Simulator {
    /// Builds a simulator around a feeder.
    pub fn new(config: Config, feeder: Box<dyn Feeder>) -> SimResult<Self> {
        let num_cores = config.general.num_cores.max(1);
        let mem = MemorySystem::new(&config)?;
        let cores = (0..num_cores)
            .map(|id| Core::new(id, &config))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Self {
            config,
            cores,
            mem,
            feeder,
            now: 0,
            uncore_cycles: 0,
            slice: 0,
        })
    }

    /// Current core cycle.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Mutable access to the feeder (tests drive it directly).
    pub fn feeder_mut(&mut self) -> &mut dyn Feeder {
        self.feeder.as_mut()
    }

    /// Warms the LLC with one access, translated through the memory model.
    /// [`Simulator::run`] drains the feeder's warm list through this before
    /// timing starts.
    pub fn warm_llc(&mut self, asid: Asid, va: u64, is_write: bool) {
        self.mem.warm_llc(v2p_translate(asid, va), is_write);
    }

    /// Advances the machine one core cycle.
    pub fn tick(&mut self) -> SimResult<()> {
        let now = self.now;
        for core in &mut self.cores {
            core.tick(now, self.feeder.as_mut(), &mut self.mem);
        }
        if now % self.config.uncore.clock_ratio.max(1) == 0 {
            self.mem.step_uncore(now);
            self.uncore_cycles += 1;
        }

        for id in 0..self.cores.len() {
            if self.cores[id].deadlocked() {
                if self.config.general.flush_on_deadlock {
                    tracing::warn!(core = id, cycle = now, "force-flushing deadlocked core");
                    self.cores[id].complete_flush();
                } else {
                    return Err(SimError::Deadlock {
                        core: id,
                        cycle: now,
                        threshold: self.config.core.commit.deadlock_threshold,
                    });
                }
            }
        }
        self.now += 1;
        Ok(())
    }

    /// True when every core drained its stream.
    pub fn finished(&self) -> bool {
        self.cores.iter().all(Core::finished)
    }

    /// Runs to feeder exhaustion (or a configured limit), returning final
    /// statistics.
    pub fn run(&mut self) -> SimResult<SimStats> {
        for access in self.feeder.warm_accesses() {
            self.warm_llc(access.asid, access.va, access.write);
        }
        self.slice += 1;
        self.feeder.slice_start(self.slice);
        let max_cycles = self.config.general.max_cycles;
        let max_insts = self.config.general.max_insts;
        let interval = self.config.general.stats_interval;

        while !self.finished() {
            if max_cycles > 0 && self.now >= max_cycles {
                break;
            }
            if max_insts > 0
                && self
                    .cores
                    .iter()
                    .all(|c| c.stats.commit_insn >= max_insts)
            {
                break;
            }
            self.tick()?;
            if interval > 0 && self.now % interval == 0 {
                let stats = self.stats();
                let _ = stats.print_sections(&mut std::io::stderr(), &["summary".to_string()]);
            }
        }

        let insn = self.cores.first().map_or(0, |c| c.stats.commit_insn);
        self.feeder.slice_end(self.slice, insn, 1.0);
        Ok(self.stats())
    }

    /// Assembles the statistics report.
    pub fn stats(&self) -> SimStats {
        let mut cores = Vec::with_capacity(self.cores.len());
        for core in &self.cores {
            let mut s = core.stats.clone();
            s.bpred_lookups = core.bpred.stats.lookups;
            s.bpred_dir_hits = core.bpred.stats.dir_hits;
            s.bpred_addr_hits = core.bpred.stats.addr_hits;
            s.memdep_lookups = core.memdep_stats.lookups;
            s.memdep_updates = core.memdep_stats.updates;
            cores.push(s);
        }
        let caches = self
            .mem
            .all_caches()
            .iter()
            .map(|c| CacheReport {
                name: c.name.clone(),
                lookups: c.stats.lookups,
                hits: c.stats.hits,
                misses: c.stats.misses,
                writebacks: c.stats.writebacks,
                prefetches: c.stats.prefetches,
            })
            .collect();
        SimStats {
            cores,
            caches,
            fsb_busy_cycles: self.mem.bus(self.mem.fsb).busy_cycles,
            uncore_cycles: self.uncore_cycles,
        }
    }

    /// Writes final statistics to the configured sink (a file, or stderr).
    pub fn write_stats(&self) -> SimResult<()> {
        let stats = self.stats();
        match &self.config.general.stats_file {
            Some(path) => {
                let mut file = std::fs::File::create(path)?;
                stats.print(&mut file)?;
                file.flush()?;
            }
            None => stats.print(&mut std::io::stderr())?,
        }
        Ok(())
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("cores", &self.cores.len())
            .field("now", &self.now)
            .finish()
    }
}
