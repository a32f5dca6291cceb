//! End-to-end scenarios: one machine, one scripted trace, observable
//! timing and architectural outcomes.

use pretty_assertions::assert_eq;

use crate::common::{
    TestContext, alu, alu_block, cond_branch, indirect_jump, load, rep_movsb, store, trap,
};
use oosim_core::Config;
use oosim_core::common::error::SimError;
use oosim_core::config::FuConfig;
use oosim_core::core::units::fu::FuClass;
use oosim_core::mem::translate::v2p_translate;
use oosim_core::stats::FetchStall;

/// Load, modify, store on a cold cache: the miss walks the whole hierarchy
/// and the committed store lands in architectural memory.
#[test]
fn scenario_a_load_modify_store() {
    let va = 0xdead_bee0;
    let mops = vec![
        load(0x40_1000, 4, va, 4, 8),
        alu(0x40_1004, 3, &[8], 8),
        store(0x40_1007, 4, va, 4, 8, &[0x2a, 0, 0, 0]),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);

    assert_eq!(stats.cores[0].commit_insn, 3);
    assert_eq!(stats.cores[0].commit_loads, 1);
    // the cold load missed all the way down
    let dl1 = stats.caches.iter().find(|c| c.name == "DL1").unwrap();
    assert!(dl1.misses >= 1);
    let llc = stats.caches.iter().find(|c| c.name == "LLC").unwrap();
    assert!(llc.lookups >= 1);
    // the walk cannot be faster than the sum of the per-level latencies
    assert!(ctx.sim.now() >= 2 + 9 + 24);
    // round-trip law: the committed store is architectural memory now
    assert_eq!(ctx.arch_mem(v2p_translate(0, va)), 0x2a);
    assert_eq!(ctx.arch_mem(v2p_translate(0, va + 1)), 0);
}

/// A mispredicted taken branch: wrong-path Mops enter the shadow MopQ, the
/// jeclear rewinds them, and the committed stream equals the true path.
#[test]
fn scenario_b_mispredicted_branch() {
    let mut mops = alu_block(0x40_1000, 30);
    let branch_pc = 0x40_1000 + 60;
    mops.push(cond_branch(branch_pc, 5, 0x40_9000, true));
    mops.extend((0..4u64).map(|i| alu(0x40_9000 + 2 * i, 2, &[5], 5)));
    let expected = mops.len() as u64;

    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(50_000);

    // the cold predictor fell through, so the branch had to jeclear
    assert!(stats.cores[0].jeclears >= 1);
    // squashing and re-steering preserved the architectural stream
    assert_eq!(stats.cores[0].commit_insn, expected);
    assert_eq!(stats.cores[0].commit_branches, 1);
}

/// Two loads against a store with a late value: the overlapping load waits
/// and forwards; the non-overlapping one takes the cache path.
#[test]
fn scenario_c_forward_after_value_arrives() {
    let x = 0x40_2000;
    let mops = vec![
        alu(0x40_1000, 2, &[4], 9),
        // the divide delays the store's data half
        crate::common::idiv(0x40_1002, 3, &[9], 9),
        store(0x40_1005, 4, x, 4, 9, &[7, 7, 7, 7]),
        load(0x40_1009, 4, x, 4, 10),
        load(0x40_100d, 4, x + 4, 4, 11),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(50_000);

    assert_eq!(stats.cores[0].commit_insn, 5);
    // exactly the overlapping load forwarded from the STQ
    assert_eq!(stats.cores[0].loads_forwarded, 1);
}

/// REP MOVSB of 256 bytes: one Mop, 256 iterations, flow length 3×256.
#[test]
fn scenario_d_rep_movsb() {
    let mops = vec![
        rep_movsb(0x40_1000, 2, 0x50_0000, 0x60_0000, 256),
        alu(0x40_1002, 2, &[4], 4),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(200_000);

    assert_eq!(stats.cores[0].commit_insn, 2);
    assert_eq!(stats.cores[0].num_rep_insn, 1);
    assert_eq!(stats.cores[0].num_rep_iterations, 256);
    // the whole flow committed: 3 uops per iteration plus the trailing ALU
    assert_eq!(stats.cores[0].commit_eff_uops, 3 * 256 + 1);
}

/// A wrong-path fetch into the zero page is absorbed: a synthetic Mop, a
/// tagged stall, and a clean recovery. A cold return stack predicts a
/// return to address zero.
#[test]
fn scenario_e_page_zero_wrong_path() {
    let mops = vec![
        alu(0x40_1000, 2, &[4], 4),
        crate::common::ret_mop(0x40_1002, 1, 0x40_2000),
        alu(0x40_2000, 2, &[4], 4),
        alu(0x40_2002, 2, &[4], 4),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(50_000);

    assert!(stats.cores[0].fetch_stall[FetchStall::PageZero as usize] >= 1);
    assert!(stats.cores[0].jeclears >= 1);
    assert_eq!(stats.cores[0].commit_insn, 4);
}

/// With every functional unit disabled the watchdog must fire.
#[test]
fn scenario_f_deadlock_watchdog() {
    let mut config = Config::default();
    config.core.commit.deadlock_threshold = 500;
    config.core.exec.fu = vec![FuConfig {
        class: FuClass::Ieu,
        latency: 1,
        issue_rate: 0,
        ports: vec![0],
    }];
    let mops = vec![alu(0x40_1000, 2, &[4], 4)];
    let mut ctx = TestContext::with_config(config, mops);

    let mut saw_deadlock = false;
    for _ in 0..5_000 {
        match ctx.sim.tick() {
            Ok(()) => {}
            Err(SimError::Deadlock { core, .. }) => {
                assert_eq!(core, 0);
                saw_deadlock = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(saw_deadlock, "watchdog never fired");
    assert!(ctx.core().deadlocked());
    assert!(ctx.core().stats.deadlocked);
}

/// A trap drains the pipeline and the stream continues afterwards.
#[test]
fn trap_drains_and_resumes() {
    let mops = vec![
        alu(0x40_1000, 2, &[4], 4),
        trap(0x40_1002, 2),
        alu(0x40_1004, 2, &[4], 4),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(50_000);
    assert_eq!(stats.cores[0].commit_insn, 3);
    assert!(stats.cores[0].fetch_stall[FetchStall::TrapDrain as usize] >= 1);
}

/// An indirect branch mispredicting both direction and target costs one
/// jeclear and lands on the oracle's next PC.
#[test]
fn indirect_mispredict_single_jeclear() {
    let mops = vec![
        indirect_jump(0x40_1000, 5, 0x40_4000),
        alu(0x40_4000, 2, &[4], 4),
        alu(0x40_4002, 2, &[4], 4),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(50_000);
    assert_eq!(stats.cores[0].jeclears, 1);
    assert_eq!(stats.cores[0].commit_insn, 3);
}
