//! Front-end behavior: line effects, fusion, resteers, REP edge cases.

use pretty_assertions::assert_eq;

use crate::common::{TestContext, alu, fusable_load_op, fusable_store, nop, rep_movsb, uncond_jump};
use oosim_core::stats::FetchStall;

/// An instruction straddling two cache lines requests both lines and tags
/// the split stall.
#[test]
fn split_instruction_fetches_two_lines() {
    // byteq_linesize is 64; place a 4-byte Mop across 0x...3f/0x...40
    let mops = vec![
        alu(0x40_103e, 4, &[4], 4),
        alu(0x40_1042, 2, &[4], 4),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);

    assert_eq!(stats.cores[0].commit_insn, 2);
    assert!(stats.cores[0].fetch_stall[FetchStall::SplitInst as usize] >= 1);
    // both lines really went to the IL1
    let il1 = stats.caches.iter().find(|c| c.name == "IL1").unwrap();
    assert!(il1.lookups >= 2);
}

/// A REP with zero iterations is fetched once and commits with no memory
/// references.
#[test]
fn zero_iteration_rep() {
    let mops = vec![
        rep_movsb(0x40_1000, 2, 0x50_0000, 0x60_0000, 0),
        alu(0x40_1002, 2, &[4], 4),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);

    assert_eq!(stats.cores[0].commit_insn, 2);
    assert_eq!(stats.cores[0].num_rep_insn, 1);
    assert_eq!(stats.cores[0].num_rep_iterations, 0);
    assert_eq!(stats.cores[0].commit_refs, 0);
}

/// A fusable load+op forms one packet and still commits both uops.
#[test]
fn load_op_fusion() {
    let mops = vec![
        fusable_load_op(0x40_1000, 4, 0x50_0000, 4, 8),
        alu(0x40_1004, 2, &[8], 8),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);

    assert_eq!(stats.cores[0].num_fusions, 1);
    assert_eq!(stats.cores[0].commit_insn, 2);
    assert_eq!(stats.cores[0].commit_eff_uops, 3);
}

/// A fusable sta+std pair forms one packet.
#[test]
fn sta_std_fusion() {
    let mops = vec![
        alu(0x40_1000, 2, &[4], 9),
        fusable_store(0x40_1002, 4, 0x50_0000, 4, 9, &[1, 2, 3, 4]),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);

    assert_eq!(stats.cores[0].num_fusions, 1);
    assert_eq!(stats.cores[0].commit_insn, 2);
}

/// A direct jump with a cold BTB falls through at fetch and is corrected
/// by the decode-stage target validation, not a jeclear.
#[test]
fn direct_jump_target_resteer() {
    let mops = vec![
        uncond_jump(0x40_1000, 5, 0x40_3000),
        alu(0x40_3000, 2, &[4], 4),
        alu(0x40_3002, 2, &[4], 4),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);

    assert_eq!(stats.cores[0].target_resteers, 1);
    assert_eq!(stats.cores[0].jeclears, 0);
    assert_eq!(stats.cores[0].commit_insn, 3);
}

/// Jump targets keep resolving across repeated encounters: every dynamic
/// jump either hits the BTB, resteers at decode, or jeclears, and the
/// committed stream is intact either way.
#[test]
fn jumps_resolve_across_encounters() {
    let mops = vec![
        uncond_jump(0x40_1000, 5, 0x40_3000),
        uncond_jump(0x40_3000, 5, 0x40_1000),
        uncond_jump(0x40_1000, 5, 0x40_3000),
        uncond_jump(0x40_3000, 5, 0x40_5000),
        nop(0x40_5000, 2),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);

    assert_eq!(stats.cores[0].commit_insn, 5);
    assert!(stats.cores[0].target_resteers >= 2);
}

/// Wrong-path synthetic Mops are absorbed and never commit.
#[test]
fn bogus_wrong_path_mops_are_squashed() {
    let mops = vec![
        crate::common::cond_branch(0x40_1000, 2, 0x40_8000, true),
        alu(0x40_8000, 2, &[4], 4),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);

    assert!(stats.cores[0].fetch_stall[FetchStall::WrongPathInvalid as usize] >= 1);
    assert_eq!(stats.cores[0].commit_insn, 2);
}
