//! The feeder-facing interfaces driven end-to-end: LLC warming before
//! timing starts and commit-time address-space reconciliation.

use pretty_assertions::assert_eq;

use crate::common::{TestContext, alu, load};
use oosim_core::Config;
use oosim_core::oracle::feeder::{AsOp, Trace, WarmAccess};

fn miss_heavy_mops() -> Vec<oosim_core::oracle::feeder::MopSpec> {
    // eight loads spread over distinct lines so the LLC sees real traffic
    let mut mops = vec![alu(0x40_1000, 2, &[4], 4)];
    for i in 0..8u64 {
        mops.push(load(0x40_1002 + 4 * i, 4, 0x50_0000 + 64 * i, 4, 8));
    }
    mops
}

/// Warming the LLC with the trace's working set turns the run's LLC misses
/// into hits; an identical cold run keeps missing.
#[test]
fn llc_warming_serves_the_working_set() {
    let warm: Vec<WarmAccess> = (0..8u64)
        .map(|i| WarmAccess {
            asid: 0,
            va: 0x50_0000 + 64 * i,
            write: false,
        })
        .collect();

    let mut config = Config::default();
    config.general.max_cycles = 50_000;

    let mut warm_ctx = TestContext::with_trace(
        config.clone(),
        Trace {
            repeat: 1,
            warm,
            mops: miss_heavy_mops(),
        },
    );
    let warm_stats = warm_ctx.sim.run().expect("warm run failed");

    let mut cold_ctx = TestContext::with_config(config, miss_heavy_mops());
    let cold_stats = cold_ctx.sim.run().expect("cold run failed");

    let llc = |stats: &oosim_core::stats::SimStats| {
        stats
            .caches
            .iter()
            .find(|c| c.name == "LLC")
            .cloned()
            .unwrap()
    };
    let warm_llc = llc(&warm_stats);
    let cold_llc = llc(&cold_stats);

    assert_eq!(warm_stats.cores[0].commit_insn, 9);
    assert_eq!(cold_stats.cores[0].commit_insn, 9);
    // the warmed run hits where the cold one misses
    assert!(warm_llc.hits >= 8, "warmed LLC hits: {}", warm_llc.hits);
    assert!(
        warm_llc.misses < cold_llc.misses,
        "warming did not reduce LLC misses ({} vs {})",
        warm_llc.misses,
        cold_llc.misses
    );
}

/// A Mop carrying address-space events flows through the whole machine and
/// still commits; the events are reported to the feeder at retirement
/// (state assertions live with the oracle's unit tests).
#[test]
fn address_space_events_survive_the_pipeline() {
    let mut mops = vec![alu(0x40_1000, 2, &[4], 4)];
    let mut brk_mop = alu(0x40_1002, 2, &[4], 4);
    brk_mop.asops = vec![
        AsOp::Mmap {
            asid: 0,
            va: 0x60_0000,
            len: 0x2000,
            mod_brk: false,
        },
        AsOp::Brk {
            asid: 0,
            brk: 0x70_0000,
            do_mmap: false,
        },
    ];
    mops.push(brk_mop);
    mops.push(alu(0x40_1004, 2, &[4], 4));

    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);
    assert_eq!(stats.cores[0].commit_insn, 3);
}
