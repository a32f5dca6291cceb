//! Store-to-load forwarding, partial matches, and dependence speculation.

use pretty_assertions::assert_eq;

use crate::common::{TestContext, alu, idiv, load, store, store_delayed_addr};
use oosim_core::Config;
use oosim_core::mem::translate::v2p_translate;

/// A load fully covered by an older store with a known value forwards and
/// never waits for DRAM.
#[test]
fn full_cover_forwards() {
    let x = 0x50_1000;
    let mops = vec![
        alu(0x40_1000, 2, &[4], 9),
        store(0x40_1002, 4, x, 4, 9, &[9, 9, 9, 9]),
        load(0x40_1006, 4, x, 4, 10),
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(20_000);

    assert_eq!(stats.cores[0].loads_forwarded, 1);
    assert_eq!(stats.cores[0].commit_insn, 3);
}

/// A partially overlapping store never forwards: the load waits for the
/// store to leave the queue and then reads the cache.
#[test]
fn partial_match_stalls_and_reads_cache() {
    let x = 0x50_2000;
    let mops = vec![
        alu(0x40_1000, 2, &[4], 9),
        store(0x40_1002, 4, x, 2, 9, &[5, 5]), // 2-byte store
        load(0x40_1006, 4, x, 4, 10),          // 4-byte load overlapping it
    ];
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(50_000);

    assert_eq!(stats.cores[0].loads_forwarded, 0);
    assert_eq!(stats.cores[0].commit_insn, 3);
    // the load took the cache path in the end
    let dl1 = stats.caches.iter().find(|c| c.name == "DL1").unwrap();
    assert!(dl1.lookups >= 1);
}

/// Blind speculation past an unknown store address replays the load when
/// the store turns out to overlap, and the committed memory is still right.
#[test]
fn blind_speculation_replays_on_conflict() {
    let mut config = Config::default();
    config.core.exec.memdep = "blind".to_string();
    let x = 0x50_3000;
    let mops = vec![
        alu(0x40_1000, 2, &[4], 9),
        idiv(0x40_1002, 3, &[9], 9), // holds the store address hostage
        store_delayed_addr(0x40_1005, 4, x, 4, 9, 9, &[1, 2, 3, 4]),
        load(0x40_1009, 4, x, 4, 10),
    ];
    let mut ctx = TestContext::with_config(config, mops);
    let stats = ctx.run_to_completion(50_000);

    assert_eq!(stats.cores[0].commit_insn, 4);
    // the load issued blindly, replayed when the address resolved against
    // it, and forwarded in the end
    assert!(stats.cores[0].load_replays >= 1);
    assert_eq!(stats.cores[0].loads_forwarded, 1);
    assert_eq!(ctx.arch_mem(v2p_translate(0, x)), 1);
}

/// The conservative predictor refuses to pass unknown store addresses:
/// no replays can occur.
#[test]
fn conservative_memdep_never_replays() {
    let mut config = Config::default();
    config.core.exec.memdep = "none".to_string();
    let x = 0x50_4000;
    let mops = vec![
        alu(0x40_1000, 2, &[4], 9),
        store(0x40_1002, 4, x, 4, 9, &[1, 2, 3, 4]),
        load(0x40_1006, 4, x + 64, 4, 10), // unrelated address
    ];
    let mut ctx = TestContext::with_config(config, mops);
    let stats = ctx.run_to_completion(50_000);

    assert_eq!(stats.cores[0].commit_insn, 3);
    assert_eq!(stats.cores[0].load_replays, 0);
}

/// Committed stores drain through the senior queue in order and become
/// architectural memory exactly once.
#[test]
fn senior_stores_drain_in_order() {
    let base = 0x50_5000;
    let mut mops = vec![alu(0x40_1000, 2, &[4], 9)];
    for i in 0..8u64 {
        mops.push(store(
            0x40_1002 + 4 * i,
            4,
            base + 8 * i,
            1,
            9,
            &[i as u8 + 1],
        ));
    }
    let mut ctx = TestContext::new(mops);
    let stats = ctx.run_to_completion(50_000);

    assert_eq!(stats.cores[0].commit_insn, 9);
    for i in 0..8u64 {
        assert_eq!(ctx.arch_mem(v2p_translate(0, base + 8 * i)), i as u8 + 1);
    }
}
