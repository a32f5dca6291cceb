//! The simulation harness: builds a single-core machine around a scripted
//! trace and drives it to completion.

use oosim_core::oracle::feeder::{MopSpec, Trace, TraceFeeder};
use oosim_core::stats::SimStats;
use oosim_core::{Config, Core, Simulator};

/// A machine plus the trace it is replaying.
pub struct TestContext {
    /// The machine under test.
    pub sim: Simulator,
}

impl TestContext {
    /// Single-core machine with the default configuration.
    pub fn new(mops: Vec<MopSpec>) -> Self {
        Self::with_config(Config::default(), mops)
    }

    /// Single-core machine with an adjusted configuration.
    pub fn with_config(config: Config, mops: Vec<MopSpec>) -> Self {
        Self::with_trace(
            config,
            Trace {
                repeat: 1,
                mops,
                ..Trace::default()
            },
        )
    }

    /// Single-core machine over a full trace (warm list included).
    pub fn with_trace(mut config: Config, trace: Trace) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        config.general.num_cores = 1;
        let feeder = TraceFeeder::new(trace, 1);
        let sim = Simulator::new(config, Box::new(feeder)).expect("machine build failed");
        Self { sim }
    }

    /// The core under test.
    pub fn core(&self) -> &Core {
        &self.sim.cores[0]
    }

    /// Ticks for a fixed number of cycles (panicking on simulator errors).
    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.sim.tick().expect("tick failed");
            if self.sim.finished() {
                break;
            }
        }
    }

    /// Runs until the stream fully drains; panics after `max_cycles`.
    pub fn run_to_completion(&mut self, max_cycles: u64) -> SimStats {
        let mut cycles = 0;
        while !self.sim.finished() {
            self.sim.tick().expect("tick failed");
            cycles += 1;
            assert!(
                cycles <= max_cycles,
                "simulation did not drain within {max_cycles} cycles \
                 (committed {} Mops)",
                self.core().stats.commit_insn
            );
        }
        self.sim.stats()
    }

    /// Reads a byte of architectural memory through the feeder.
    pub fn arch_mem(&mut self, paddr: u64) -> u8 {
        self.sim.feeder_mut().read_mem(paddr)
    }
}
