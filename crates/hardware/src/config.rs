//! Configuration system for the timing simulator.
//!
//! This module defines all configuration structures used to parameterize a
//! simulation. It provides:
//! 1. **Defaults:** baseline machine constants (a 4-wide out-of-order core
//!    with a three-level cache hierarchy).
//! 2. **Structures:** hierarchical config for general, per-core, and uncore
//!    parameters, deserializable from JSON.
//! 3. **Component strings:** caches, TLBs, branch predictors, memory
//!    dependence predictors, memory controllers, and DRAM models are selected
//!    by colon-separated option strings (e.g. `DL1:64:8:64:8:64:2:L:W:B:8:C`)
//!    parsed by each component family's constructor.
//!
//! Configuration is supplied as JSON (`serde_json`) or via `Config::default()`.

use serde::Deserialize;

use crate::core::units::fu::FuClass;

/// Default configuration constants for the simulator.
mod defaults {
    /// Instruction fetch width (Mops per cycle into predecode).
    pub const FETCH_WIDTH: usize = 4;

    /// Byte queue capacity in line-sized entries.
    pub const BYTEQ_SIZE: usize = 4;

    /// Byte queue line size in bytes; usually the IL1 line size.
    pub const BYTEQ_LINESIZE: u64 = 64;

    /// Predecode pipeline depth in stages.
    pub const PREDECODE_DEPTH: usize = 2;

    /// Instruction queue (predecode → decode) capacity in Mops.
    pub const IQ_SIZE: usize = 8;

    /// Cycles between a back-end jeclear and the front-end resteer.
    pub const JECLEAR_DELAY: usize = 1;

    /// Decode width (Mops per cycle).
    pub const DECODE_WIDTH: usize = 4;

    /// Decode pipeline depth in stages.
    pub const DECODE_DEPTH: usize = 3;

    /// Decode stage at which branch targets are computed and validated.
    pub const BRANCH_AGEN_STAGE: usize = 2;

    /// Allocation width (uops per cycle into the back-end).
    pub const ALLOC_WIDTH: usize = 4;

    /// Number of execution ports.
    pub const NUM_PORTS: usize = 6;

    /// Reservation station entries.
    pub const RS_SIZE: usize = 36;

    /// Load queue entries.
    pub const LDQ_SIZE: usize = 32;

    /// Store queue entries.
    pub const STQ_SIZE: usize = 20;

    /// Store-queue search pipeline latency for load forwarding.
    pub const STQ_SEARCH_LATENCY: u64 = 2;

    /// Reorder buffer entries.
    pub const ROB_SIZE: usize = 96;

    /// Commit width (uops retired per cycle).
    pub const COMMIT_WIDTH: usize = 4;

    /// Maximum branches retired per cycle (0 = unlimited).
    pub const BRANCH_LIMIT: usize = 0;

    /// Cycles without a uop completion before the watchdog declares deadlock.
    pub const DEADLOCK_THRESHOLD: u64 = 50_000;

    /// Core cycles per uncore cycle.
    pub const UNCORE_RATIO: u64 = 2;

    /// Front-side bus width in bytes.
    pub const FSB_WIDTH: u64 = 8;

    /// L1 instruction cache option string.
    pub const IL1: &str = "IL1:64:8:64:1:64:2:L:W:B:8:C";

    /// Instruction TLB option string.
    pub const ITLB: &str = "ITLB:32:4:1:2:L:4";

    /// L1 data cache option string.
    pub const DL1: &str = "DL1:64:8:64:8:64:2:L:W:B:8:C";

    /// Data TLB option string.
    pub const DTLB: &str = "DTLB:64:4:1:2:L:4";

    /// Private L2 data cache option string.
    pub const DL2: &str = "DL2:512:8:64:1:64:9:L:W:B:16:C";

    /// Shared last-level cache option string.
    pub const LLC: &str = "LLC:4096:16:64:4:64:24:L:W:B:32:C:32:const16";

    /// Direction predictor component option strings.
    pub const BPRED: &[&str] = &["2lev:gshare:1:16384:12:1"];

    /// Fusion (meta-predictor) option string.
    pub const FUSION: &str = "none";

    /// Branch target buffer option string.
    pub const BTB: &str = "btac:BTB:512:4";

    /// Indirect branch target cache option string.
    pub const IBTB: &str = "tcache:iBTB:256";

    /// Return address stack option string.
    pub const RAS: &str = "stack:RAS:16";

    /// Memory dependence predictor option string.
    pub const MEMDEP: &str = "lwt:LWT:1024:32768";

    /// Memory controller option string.
    pub const MC: &str = "simple:16:32";

    /// DRAM timing model option string.
    pub const DRAM: &str = "page:14:14:14";
}

/// Root configuration for a simulation.
///
/// ```
/// use oosim_core::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.general.num_cores, 1);
/// assert_eq!(config.core.commit.rob_size, 96);
///
/// let json = r#"{
///     "general": { "num_cores": 2, "max_insts": 100000 },
///     "core": { "commit": { "rob_size": 128 } },
///     "uncore": { "fsb_width": 16 }
/// }"#;
/// let config: Config = serde_json::from_str(json).unwrap();
/// assert_eq!(config.general.num_cores, 2);
/// assert_eq!(config.core.commit.rob_size, 128);
/// assert_eq!(config.uncore.fsb_width, 16);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General simulation settings.
    pub general: GeneralConfig,
    /// Per-core pipeline parameters (all cores share one configuration).
    pub core: CoreConfig,
    /// Shared uncore (LLC, FSB, memory controller, DRAM) parameters.
    pub uncore: UncoreConfig,
}

/// General simulation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Number of simulated cores.
    pub num_cores: usize,

    /// Stop after this many committed instructions per core (0 = no limit).
    pub max_insts: u64,

    /// Stop after this many core cycles (0 = no limit).
    pub max_cycles: u64,

    /// Write final statistics to this file instead of stderr.
    pub stats_file: Option<String>,

    /// Emit intermediate statistics every N cycles (0 = only at the end).
    pub stats_interval: u64,

    /// On deadlock, force-flush the core and continue instead of aborting.
    pub flush_on_deadlock: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            num_cores: 1,
            max_insts: 0,
            max_cycles: 0,
            stats_file: None,
            stats_interval: 0,
            flush_on_deadlock: false,
        }
    }
}

/// All per-core pipeline parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Oracle (shadow MopQ) parameters.
    pub oracle: OracleConfig,
    /// Fetch stage (byte queue, predecode, IL1/ITLB).
    pub fetch: FetchConfig,
    /// Branch predictor composition.
    pub bpred: BpredConfig,
    /// Decode stage and uop fusion.
    pub decode: DecodeConfig,
    /// Allocation (rename) stage.
    pub alloc: AllocConfig,
    /// Execution core (RS, LDQ/STQ, ports, DL1/DTLB/DL2).
    pub exec: ExecConfig,
    /// Commit stage and watchdog.
    pub commit: CommitConfig,
}

/// Oracle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Shadow MopQ capacity (Mops executed ahead of commit).
    pub mopq_size: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self { mopq_size: 512 }
    }
}

/// Fetch stage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Mops fetched into predecode per cycle.
    pub width: usize,
    /// Byte queue capacity (cache-line-sized entries).
    pub byteq_size: usize,
    /// Byte queue line size in bytes.
    pub byteq_linesize: u64,
    /// Predecode pipeline depth in stages.
    pub predecode_depth: usize,
    /// Instruction queue capacity between predecode and decode.
    pub iq_size: usize,
    /// Cycles a jeclear spends in the resteer pipeline.
    pub jeclear_delay: usize,
    /// L1 instruction cache option string.
    pub il1: String,
    /// IL1 prefetcher option strings.
    pub il1_pf: Vec<String>,
    /// Instruction TLB option string.
    pub itlb: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            width: defaults::FETCH_WIDTH,
            byteq_size: defaults::BYTEQ_SIZE,
            byteq_linesize: defaults::BYTEQ_LINESIZE,
            predecode_depth: defaults::PREDECODE_DEPTH,
            iq_size: defaults::IQ_SIZE,
            jeclear_delay: defaults::JECLEAR_DELAY,
            il1: defaults::IL1.to_string(),
            il1_pf: vec!["nextline:1".to_string()],
            itlb: defaults::ITLB.to_string(),
        }
    }
}

/// Branch predictor composition: N direction components behind a fusion
/// selector, plus BTB, indirect BTB, and RAS.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BpredConfig {
    /// Direction predictor component option strings.
    pub components: Vec<String>,
    /// Fusion (meta) predictor option string.
    pub fusion: String,
    /// Branch target buffer option string.
    pub btb: String,
    /// Indirect target cache option string.
    pub ibtb: String,
    /// Return address stack option string.
    pub ras: String,
}

impl Default for BpredConfig {
    fn default() -> Self {
        Self {
            components: defaults::BPRED.iter().map(ToString::to_string).collect(),
            fusion: defaults::FUSION.to_string(),
            btb: defaults::BTB.to_string(),
            ibtb: defaults::IBTB.to_string(),
            ras: defaults::RAS.to_string(),
        }
    }
}

/// Decode stage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Mops decoded per cycle.
    pub width: usize,
    /// Decode pipeline depth in stages.
    pub depth: usize,
    /// Stage index (0-based) at which branch targets are validated.
    pub branch_agen_stage: usize,
    /// Allow load+op fusion.
    pub fuse_load_op: bool,
    /// Allow sta+std fusion.
    pub fuse_sta_std: bool,
    /// Allow load+op+store fusion (atomics).
    pub fuse_load_op_store: bool,
    /// Allow FP load+op fusion.
    pub fuse_fp_load_op: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            width: defaults::DECODE_WIDTH,
            depth: defaults::DECODE_DEPTH,
            branch_agen_stage: defaults::BRANCH_AGEN_STAGE,
            fuse_load_op: true,
            fuse_sta_std: true,
            fuse_load_op_store: true,
            fuse_fp_load_op: false,
        }
    }
}

/// Allocation (rename) stage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocConfig {
    /// Allocator slots per cycle.
    pub width: usize,
    /// When true, a trap drain stalls allocation until the ROB empties.
    pub drain_flush: bool,
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            width: defaults::ALLOC_WIDTH,
            drain_flush: true,
        }
    }
}

/// One functional unit instance bound to execution ports.
#[derive(Debug, Clone, Deserialize)]
pub struct FuConfig {
    /// Functional unit class.
    pub class: FuClass,
    /// Execution latency in cycles.
    pub latency: u64,
    /// Minimum cycles between issues to this unit (1 = fully pipelined).
    pub issue_rate: u64,
    /// Execution ports this unit is reachable from.
    pub ports: Vec<usize>,
}

/// Execution core configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Number of execution ports.
    pub num_ports: usize,
    /// Reservation station entries.
    pub rs_size: usize,
    /// Load queue entries.
    pub ldq_size: usize,
    /// Store queue entries.
    pub stq_size: usize,
    /// Store-queue search pipe latency for load forwarding.
    pub stq_search_latency: u64,
    /// Memory dependence predictor option string.
    pub memdep: String,
    /// L1 data cache option string.
    pub dl1: String,
    /// DL1 prefetcher option strings.
    pub dl1_pf: Vec<String>,
    /// Data TLB option string.
    pub dtlb: String,
    /// Optional private L2 data cache option string.
    pub dl2: Option<String>,
    /// DL2 prefetcher option strings.
    pub dl2_pf: Vec<String>,
    /// Functional unit pool. An empty list selects [`default_fu_pool`].
    pub fu: Vec<FuConfig>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            num_ports: defaults::NUM_PORTS,
            rs_size: defaults::RS_SIZE,
            ldq_size: defaults::LDQ_SIZE,
            stq_size: defaults::STQ_SIZE,
            stq_search_latency: defaults::STQ_SEARCH_LATENCY,
            memdep: defaults::MEMDEP.to_string(),
            dl1: defaults::DL1.to_string(),
            dl1_pf: vec!["IP:256:1".to_string()],
            dtlb: defaults::DTLB.to_string(),
            dl2: Some(defaults::DL2.to_string()),
            dl2_pf: vec!["nextline:2".to_string()],
            fu: Vec::new(),
        }
    }
}

/// Commit stage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Uops retired per cycle.
    pub width: usize,
    /// Reorder buffer entries.
    pub rob_size: usize,
    /// Maximum branches retired per cycle (0 = unlimited).
    pub branch_limit: usize,
    /// Watchdog threshold in cycles without a completion.
    pub deadlock_threshold: u64,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            width: defaults::COMMIT_WIDTH,
            rob_size: defaults::ROB_SIZE,
            branch_limit: defaults::BRANCH_LIMIT,
            deadlock_threshold: defaults::DEADLOCK_THRESHOLD,
        }
    }
}

/// Shared uncore configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UncoreConfig {
    /// Shared last-level cache option string.
    pub llc: String,
    /// LLC prefetcher option strings.
    pub llc_pf: Vec<String>,
    /// Core cycles per uncore cycle.
    pub clock_ratio: u64,
    /// Front-side bus width in bytes.
    pub fsb_width: u64,
    /// Double-pumped FSB (halves effective transfer cycles).
    pub fsb_ddr: bool,
    /// Memory controller option string.
    pub mc: String,
    /// DRAM timing model option string.
    pub dram: String,
}

impl Default for UncoreConfig {
    fn default() -> Self {
        Self {
            llc: defaults::LLC.to_string(),
            llc_pf: Vec::new(),
            clock_ratio: defaults::UNCORE_RATIO,
            fsb_width: defaults::FSB_WIDTH,
            fsb_ddr: true,
            mc: defaults::MC.to_string(),
            dram: defaults::DRAM.to_string(),
        }
    }
}

/// Returns the default functional unit pool for a 6-port core.
///
/// Port assignments follow the usual split: ports 0/1/5 for integer ALUs,
/// port 0 for multiplies and FP, port 1 for divides, ports 2/3 for load and
/// store-address AGUs, port 4 for store data, port 5 for jumps.
pub fn default_fu_pool() -> Vec<FuConfig> {
    let fu = |class, latency, issue_rate, ports: &[usize]| FuConfig {
        class,
        latency,
        issue_rate,
        ports: ports.to_vec(),
    };
    vec![
        fu(FuClass::Ieu, 1, 1, &[0, 1, 5]),
        fu(FuClass::Jeu, 1, 1, &[5]),
        fu(FuClass::Shift, 1, 1, &[0]),
        fu(FuClass::Imul, 3, 1, &[0]),
        fu(FuClass::Idiv, 20, 20, &[1]),
        fu(FuClass::Ld, 1, 1, &[2, 3]),
        fu(FuClass::Sta, 1, 1, &[2, 3]),
        fu(FuClass::Std, 1, 1, &[4]),
        fu(FuClass::Agen, 1, 1, &[2, 3]),
        fu(FuClass::Fadd, 3, 1, &[0]),
        fu(FuClass::Fmul, 5, 2, &[0]),
        fu(FuClass::Fdiv, 32, 24, &[0]),
        fu(FuClass::Fcplx, 58, 58, &[0]),
    ]
}

impl ExecConfig {
    /// Returns the configured FU pool, falling back to [`default_fu_pool`].
    pub fn fu_pool(&self) -> Vec<FuConfig> {
        if self.fu.is_empty() {
            default_fu_pool()
        } else {
            self.fu.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roundtrip() {
        let config = Config::default();
        assert_eq!(config.core.fetch.width, 4);
        assert_eq!(config.core.exec.ldq_size, 32);
        assert!(config.core.exec.dl2.is_some());
        assert_eq!(config.uncore.clock_ratio, 2);
    }

    #[test]
    fn partial_json_overrides() {
        let json = r#"{ "core": { "fetch": { "byteq_size": 2 } } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.core.fetch.byteq_size, 2);
        // untouched fields keep their defaults
        assert_eq!(config.core.fetch.width, 4);
        assert_eq!(config.core.decode.depth, 3);
    }

    #[test]
    fn fu_pool_defaults_when_empty() {
        let exec = ExecConfig::default();
        let pool = exec.fu_pool();
        assert!(pool.iter().any(|f| f.class == FuClass::Ld));
        assert!(pool.iter().any(|f| f.class == FuClass::Fdiv));
    }
}
