//! Component option-string parsing and statistics output plumbing.

use rstest::rstest;

use crate::common::{TestContext, alu};
use oosim_core::Config;
use oosim_core::core::units::bpred::dir::DirComponent;
use oosim_core::core::units::memdep::MemDep;
use oosim_core::mem::cache::Cache;
use oosim_core::mem::mc::{DramModel, Mc};

#[rstest]
#[case("DL1:64:8:64:8:64:2:L:W:B:8:C")]
#[case("IL1:64:8:64:1:64:2:L:W:B:8:C")]
#[case("DL2:512:8:64:1:64:9:N:W:B:16:N")]
#[case("LLC:4096:16:64:4:64:24:M:W:T:32:C:32:const16")]
#[case("TINY:4:1:64:1:64:1:R:N:B:1:N")]
fn cache_strings_parse(#[case] opt: &str) {
    assert!(Cache::parse(opt, &[]).is_ok(), "{opt} should parse");
}

#[rstest]
#[case("DL1:63:8:64:8:64:2:L:W:B:8:C")] // sets not a power of two
#[case("DL1:64:8:64:8:64:2:X:W:B:8:C")] // bad replacement policy
#[case("DL1:64:8:64:8:64:2:L:Q:B:8:C")] // bad allocate policy
#[case("DL1:64:8:64:8:64:2:L:W:B:0:C")] // zero MSHRs
#[case("DL1:64:8")] // truncated
fn bad_cache_strings_fail(#[case] opt: &str) {
    assert!(Cache::parse(opt, &[]).is_err(), "{opt} should be rejected");
}

#[rstest]
#[case("bimod:b:2048")]
#[case("2lev:g:1:16384:12:1")]
#[case("gshare:gs:4096:10")]
#[case("taken:t")]
#[case("btfnt:bf")]
#[case("perfect:p")]
fn direction_strings_parse(#[case] opt: &str) {
    assert!(DirComponent::parse(opt).is_ok(), "{opt} should parse");
}

#[rstest]
#[case("none")]
#[case("blind")]
#[case("oracle")]
#[case("lwt:LWT:1024:32768")]
fn memdep_strings_parse(#[case] opt: &str) {
    assert!(MemDep::parse(opt).is_ok(), "{opt} should parse");
}

#[rstest]
#[case("ideal")]
#[case("simple:16:32")]
fn mc_strings_parse(#[case] opt: &str) {
    assert!(Mc::parse(opt).is_ok(), "{opt} should parse");
}

#[rstest]
#[case("const:90")]
#[case("page:14:14:14")]
fn dram_strings_parse(#[case] opt: &str) {
    assert!(DramModel::parse(opt).is_ok(), "{opt} should parse");
}

/// A bad component string surfaces as a terminal configuration error at
/// machine build time.
#[test]
fn bad_component_fails_machine_build() {
    let mut config = Config::default();
    config.core.exec.memdep = "psychic".to_string();
    config.general.num_cores = 1;
    let feeder = oosim_core::oracle::feeder::TraceFeeder::new(
        oosim_core::oracle::feeder::Trace {
            repeat: 1,
            mops: vec![],
            ..Default::default()
        },
        1,
    );
    let result = oosim_core::Simulator::new(config, Box::new(feeder));
    assert!(result.is_err());
}

/// Statistics write to a configured file instead of stderr.
#[test]
fn stats_file_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.out");

    let mut config = Config::default();
    config.general.stats_file = Some(path.to_string_lossy().into_owned());
    let mops = vec![alu(0x40_1000, 2, &[4], 4), alu(0x40_1002, 2, &[4], 4)];
    let mut ctx = TestContext::with_config(config, mops);
    let _ = ctx.run_to_completion(20_000);
    ctx.sim.write_stats().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("c0.commit_insn"));
    assert!(text.contains("MEMORY HIERARCHY"));
}
