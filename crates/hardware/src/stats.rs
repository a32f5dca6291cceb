//! Simulation statistics collection and reporting.
//!
//! This module tracks performance metrics for the timing simulator:
//! 1. **Progress:** cycles, committed Mops/uops, IPC/uPC.
//! 2. **Stall distributions:** per-stage stall reasons (fetch, alloc,
//!    commit) recorded every cycle a stage cannot make progress.
//! 3. **Speculation:** jeclears, target resteers, load replays, forwarding.
//! 4. **Output:** `print_sections` writes to any `io::Write` (stderr by
//!    default, a file when configured), optionally at periodic intervals.

use std::io::{self, Write};

/// Why fetch stopped producing Mops this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStall {
    /// Byte queue full.
    ByteQFull,
    /// Stopped after a predicted-taken branch.
    TakenBranch,
    /// Ran off the end of the fetch line.
    EndOfLine,
    /// Instruction split across two lines.
    SplitInst,
    /// Trap waiting for pipeline drain.
    TrapDrain,
    /// REP instruction iterating.
    Rep,
    /// Wrong-path fetch into the zero page.
    PageZero,
    /// Oracle could not supply a Mop.
    OracleStall,
    /// Wrong-path bytes did not decode.
    WrongPathInvalid,
    /// Predecode pipe had no room.
    PredecodeFull,
    /// Jeclear in flight.
    Jeclear,
    /// Fetched the full width.
    Width,
}

impl FetchStall {
    /// Number of variants (distribution array size).
    pub const COUNT: usize = 12;

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ByteQFull => "byteQ_full",
            Self::TakenBranch => "taken_branch",
            Self::EndOfLine => "end_of_line",
            Self::SplitInst => "split_inst",
            Self::TrapDrain => "trap_drain",
            Self::Rep => "rep",
            Self::PageZero => "page_zero",
            Self::OracleStall => "oracle_stall",
            Self::WrongPathInvalid => "wrong_path_invalid",
            Self::PredecodeFull => "predecode_full",
            Self::Jeclear => "jeclear",
            Self::Width => "width",
        }
    }
}

/// Why an allocator slot stalled this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocStall {
    /// No uops from decode.
    NoUops,
    /// ROB full.
    RobFull,
    /// LDQ full.
    LdqFull,
    /// STQ full.
    StqFull,
    /// RS full.
    RsFull,
    /// Waiting for a trap drain.
    Drain,
    /// Allocated the full width.
    Width,
}

impl AllocStall {
    /// Number of variants (distribution array size).
    pub const COUNT: usize = 7;

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoUops => "no_uops",
            Self::RobFull => "ROB_full",
            Self::LdqFull => "LDQ_full",
            Self::StqFull => "STQ_full",
            Self::RsFull => "RS_full",
            Self::Drain => "drain",
            Self::Width => "width",
        }
    }
}

/// Why commit stopped retiring this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitStall {
    /// ROB empty.
    Empty,
    /// Head Mop not fully executed.
    NotReady,
    /// Head Mop partially committed.
    Partial,
    /// Head Mop has a jeclear in flight.
    Jeclear,
    /// Per-cycle branch retirement limit.
    BranchLimit,
    /// Senior STQ could not drain.
    StqDrain,
    /// Retired the full width.
    Width,
}

impl CommitStall {
    /// Number of variants (distribution array size).
    pub const COUNT: usize = 7;

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::NotReady => "not_ready",
            Self::Partial => "partial",
            Self::Jeclear => "jeclear",
            Self::BranchLimit => "branch_limit",
            Self::StqDrain => "STQ_drain",
            Self::Width => "width",
        }
    }
}

/// All fetch stall variants in display order.
pub const FETCH_STALLS: [FetchStall; FetchStall::COUNT] = [
    FetchStall::ByteQFull,
    FetchStall::TakenBranch,
    FetchStall::EndOfLine,
    FetchStall::SplitInst,
    FetchStall::TrapDrain,
    FetchStall::Rep,
    FetchStall::PageZero,
    FetchStall::OracleStall,
    FetchStall::WrongPathInvalid,
    FetchStall::PredecodeFull,
    FetchStall::Jeclear,
    FetchStall::Width,
];

/// All alloc stall variants in display order.
pub const ALLOC_STALLS: [AllocStall; AllocStall::COUNT] = [
    AllocStall::NoUops,
    AllocStall::RobFull,
    AllocStall::LdqFull,
    AllocStall::StqFull,
    AllocStall::RsFull,
    AllocStall::Drain,
    AllocStall::Width,
];

/// All commit stall variants in display order.
pub const COMMIT_STALLS: [CommitStall; CommitStall::COUNT] = [
    CommitStall::Empty,
    CommitStall::NotReady,
    CommitStall::Partial,
    CommitStall::Jeclear,
    CommitStall::BranchLimit,
    CommitStall::StqDrain,
    CommitStall::Width,
];

/// Per-core statistics.
#[derive(Clone, Debug)]
pub struct CoreStats {
    /// Core cycles simulated.
    pub cycles: u64,
    /// Mops committed.
    pub commit_insn: u64,
    /// Uop flow slots committed (including immediate carriers).
    pub commit_uops: u64,
    /// Real uops committed.
    pub commit_eff_uops: u64,
    /// Memory references committed.
    pub commit_refs: u64,
    /// Loads committed.
    pub commit_loads: u64,
    /// Branches committed.
    pub commit_branches: u64,
    /// REP instructions committed.
    pub num_rep_insn: u64,
    /// Total REP iterations committed.
    pub num_rep_iterations: u64,
    /// Fused packets formed at decode.
    pub num_fusions: u64,
    /// Mops fetched (true and wrong path).
    pub fetch_mops: u64,
    /// Uops allocated into the back-end.
    pub alloc_uops: u64,
    /// Uops issued to functional units.
    pub issued_uops: u64,
    /// Uops completed.
    pub completed_uops: u64,
    /// Load replays (scheduling or ordering).
    pub load_replays: u64,
    /// Loads forwarded from the STQ.
    pub loads_forwarded: u64,
    /// Jeclears enqueued.
    pub jeclears: u64,
    /// Decode-stage target resteers.
    pub target_resteers: u64,
    /// Predicted branches looked up.
    pub bpred_lookups: u64,
    /// Direction predicted correctly.
    pub bpred_dir_hits: u64,
    /// Next PC predicted correctly.
    pub bpred_addr_hits: u64,
    /// Memory dependence predictor lookups.
    pub memdep_lookups: u64,
    /// Memory dependence violations observed.
    pub memdep_updates: u64,
    /// Byte-queue occupancy accumulator (for averages).
    pub byteq_occupancy: u64,
    /// ROB occupancy accumulator.
    pub rob_occupancy: u64,
    /// RS occupancy accumulator.
    pub rs_occupancy: u64,
    /// LDQ occupancy accumulator.
    pub ldq_occupancy: u64,
    /// STQ occupancy accumulator.
    pub stq_occupancy: u64,
    /// Watchdog fired.
    pub deadlocked: bool,
    /// Fetch stall distribution.
    pub fetch_stall: [u64; FetchStall::COUNT],
    /// Alloc stall distribution.
    pub alloc_stall: [u64; AllocStall::COUNT],
    /// Commit stall distribution.
    pub commit_stall: [u64; CommitStall::COUNT],
}

impl Default for CoreStats {
    fn default() -> Self {
        Self {
            cycles: 0,
            commit_insn: 0,
            commit_uops: 0,
            commit_eff_uops: 0,
            commit_refs: 0,
            commit_loads: 0,
            commit_branches: 0,
            num_rep_insn: 0,
            num_rep_iterations: 0,
            num_fusions: 0,
            fetch_mops: 0,
            alloc_uops: 0,
            issued_uops: 0,
            completed_uops: 0,
            load_replays: 0,
            loads_forwarded: 0,
            jeclears: 0,
            target_resteers: 0,
            bpred_lookups: 0,
            bpred_dir_hits: 0,
            bpred_addr_hits: 0,
            memdep_lookups: 0,
            memdep_updates: 0,
            byteq_occupancy: 0,
            rob_occupancy: 0,
            rs_occupancy: 0,
            ldq_occupancy: 0,
            stq_occupancy: 0,
            deadlocked: false,
            fetch_stall: [0; FetchStall::COUNT],
            alloc_stall: [0; AllocStall::COUNT],
            commit_stall: [0; CommitStall::COUNT],
        }
    }
}

impl CoreStats {
    /// Records a fetch stall reason.
    #[inline]
    pub fn note_fetch_stall(&mut self, reason: FetchStall) {
        self.fetch_stall[reason as usize] += 1;
    }

    /// Records an alloc stall reason.
    #[inline]
    pub fn note_alloc_stall(&mut self, reason: AllocStall) {
        self.alloc_stall[reason as usize] += 1;
    }

    /// Records a commit stall reason.
    #[inline]
    pub fn note_commit_stall(&mut self, reason: CommitStall) {
        self.commit_stall[reason as usize] += 1;
    }
}

/// One cache's contribution to the memory section.
#[derive(Clone, Debug, Default)]
pub struct CacheReport {
    /// Cache name.
    pub name: String,
    /// Lookups.
    pub lookups: u64,
    /// Hits.
    pub hits: u64,
    /// Misses.
    pub misses: u64,
    /// Writebacks.
    pub writebacks: u64,
    /// Prefetches issued.
    pub prefetches: u64,
}

/// Valid section identifiers for selective output.
pub const STATS_SECTIONS: &[&str] = &["summary", "fetch", "alloc", "commit", "bpred", "memory"];

/// A fully assembled statistics report for one run.
#[derive(Clone, Debug, Default)]
pub struct SimStats {
    /// Per-core statistics.
    pub cores: Vec<CoreStats>,
    /// Per-cache reports, hierarchy order.
    pub caches: Vec<CacheReport>,
    /// FSB utilization numerator (busy cycles).
    pub fsb_busy_cycles: u64,
    /// Uncore cycles simulated.
    pub uncore_cycles: u64,
}

impl SimStats {
    /// Writes the requested sections (all when `sections` is empty).
    pub fn print_sections(&self, w: &mut dyn Write, sections: &[String]) -> io::Result<()> {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);

        writeln!(w, "\n==========================================================")?;
        writeln!(w, "X86 OUT-OF-ORDER TIMING SIMULATION STATISTICS")?;
        writeln!(w, "==========================================================")?;
        for (i, core) in self.cores.iter().enumerate() {
            let cyc = core.cycles.max(1);
            if want("summary") {
                let ipc = core.commit_insn as f64 / cyc as f64;
                let upc = core.commit_uops as f64 / cyc as f64;
                writeln!(w, "c{i}.sim_cycle            {}", core.cycles)?;
                writeln!(w, "c{i}.commit_insn          {}", core.commit_insn)?;
                writeln!(w, "c{i}.commit_uops          {}", core.commit_uops)?;
                writeln!(w, "c{i}.commit_IPC           {ipc:.4}")?;
                writeln!(w, "c{i}.commit_uPC           {upc:.4}")?;
                writeln!(w, "c{i}.num_fusions          {}", core.num_fusions)?;
                writeln!(w, "c{i}.num_rep_insn         {}", core.num_rep_insn)?;
                writeln!(w, "c{i}.num_rep_iterations   {}", core.num_rep_iterations)?;
                writeln!(w, "c{i}.jeclears             {}", core.jeclears)?;
                writeln!(w, "c{i}.target_resteers      {}", core.target_resteers)?;
                writeln!(w, "c{i}.load_replays         {}", core.load_replays)?;
                writeln!(w, "c{i}.loads_forwarded      {}", core.loads_forwarded)?;
                writeln!(w, "c{i}.ROB_avg              {:.2}", core.rob_occupancy as f64 / cyc as f64)?;
                writeln!(w, "c{i}.byteQ_avg            {:.2}", core.byteq_occupancy as f64 / cyc as f64)?;
                if core.deadlocked {
                    writeln!(w, "c{i}.DEADLOCKED           true")?;
                }
            }
            if want("fetch") {
                writeln!(w, "c{i}.fetch_stall distribution:")?;
                for reason in FETCH_STALLS {
                    let n = core.fetch_stall[reason as usize];
                    if n > 0 {
                        writeln!(w, "  {:<22} {n}", reason.name())?;
                    }
                }
            }
            if want("alloc") {
                writeln!(w, "c{i}.alloc_stall distribution:")?;
                for reason in ALLOC_STALLS {
                    let n = core.alloc_stall[reason as usize];
                    if n > 0 {
                        writeln!(w, "  {:<22} {n}", reason.name())?;
                    }
                }
            }
            if want("commit") {
                writeln!(w, "c{i}.commit_stall distribution:")?;
                for reason in COMMIT_STALLS {
                    let n = core.commit_stall[reason as usize];
                    if n > 0 {
                        writeln!(w, "  {:<22} {n}", reason.name())?;
                    }
                }
            }
            if want("bpred") {
                let lookups = core.bpred_lookups.max(1);
                writeln!(w, "c{i}.bpred_lookups        {}", core.bpred_lookups)?;
                writeln!(
                    w,
                    "c{i}.bpred_dir_rate       {:.4}",
                    core.bpred_dir_hits as f64 / lookups as f64
                )?;
                writeln!(
                    w,
                    "c{i}.bpred_addr_rate      {:.4}",
                    core.bpred_addr_hits as f64 / lookups as f64
                )?;
                writeln!(w, "c{i}.memdep_lookups       {}", core.memdep_lookups)?;
                writeln!(w, "c{i}.memdep_violations    {}", core.memdep_updates)?;
            }
            writeln!(w, "----------------------------------------------------------")?;
        }
        if want("memory") {
            writeln!(w, "MEMORY HIERARCHY")?;
            for cache in &self.caches {
                let total = cache.lookups.max(1);
                writeln!(
                    w,
                    "  {:<8} lookups: {:<10} misses: {:<10} miss_rate: {:.2}% WB: {} PF: {}",
                    cache.name,
                    cache.lookups,
                    cache.misses,
                    100.0 * cache.misses as f64 / total as f64,
                    cache.writebacks,
                    cache.prefetches,
                )?;
            }
            let ucyc = self.uncore_cycles.max(1);
            writeln!(
                w,
                "  FSB      utilization: {:.2}%",
                100.0 * self.fsb_busy_cycles as f64 / ucyc as f64
            )?;
        }
        writeln!(w, "==========================================================")?;
        Ok(())
    }

    /// Writes all sections.
    pub fn print(&self, w: &mut dyn Write) -> io::Result<()> {
        self.print_sections(w, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distributions_index_cleanly() {
        let mut stats = CoreStats::default();
        stats.note_fetch_stall(FetchStall::TakenBranch);
        stats.note_fetch_stall(FetchStall::TakenBranch);
        stats.note_alloc_stall(AllocStall::RobFull);
        stats.note_commit_stall(CommitStall::Empty);
        assert_eq!(stats.fetch_stall[FetchStall::TakenBranch as usize], 2);
        assert_eq!(stats.alloc_stall[AllocStall::RobFull as usize], 1);
        assert_eq!(stats.commit_stall[CommitStall::Empty as usize], 1);
    }

    #[test]
    fn print_produces_all_sections() {
        let stats = SimStats {
            cores: vec![CoreStats {
                cycles: 100,
                commit_insn: 50,
                ..CoreStats::default()
            }],
            caches: vec![CacheReport {
                name: "DL1".to_string(),
                lookups: 10,
                hits: 8,
                misses: 2,
                ..CacheReport::default()
            }],
            fsb_busy_cycles: 5,
            uncore_cycles: 50,
        };
        let mut out = Vec::new();
        stats.print(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("c0.commit_IPC"));
        assert!(text.contains("DL1"));
        assert!(text.contains("FSB"));
    }

    #[test]
    fn selective_sections() {
        let stats = SimStats {
            cores: vec![CoreStats::default()],
            ..SimStats::default()
        };
        let mut out = Vec::new();
        stats
            .print_sections(&mut out, &["summary".to_string()])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("sim_cycle"));
        assert!(!text.contains("MEMORY HIERARCHY"));
    }
}
