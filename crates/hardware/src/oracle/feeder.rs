//! The instruction feeder interface and the trace feeder.
//!
//! The feeder is the oracle's upstream collaborator: it executes the program
//! architecturally and hands over one Mop at a time with its decoded uop
//! flow, register names, and effective addresses. Computation correctness
//! lives entirely on the feeder's side; the timing model only consumes
//! shapes and addresses.
//!
//! [`TraceFeeder`] replays a JSON-serialized dynamic Mop stream, applies
//! committed stores to its memory image, and can repeat a loop-shaped trace
//! a configured number of times.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::{Asid, Reg};
use crate::core::mop::{FusableFlags, MopFlags};
use crate::core::units::fu::FuClass;

/// One pre-simulation cache-warming access, delivered by the feeder and
/// applied to the LLC before timing starts.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct WarmAccess {
    /// Address space of the access.
    #[serde(default)]
    pub asid: Asid,
    /// Virtual address touched (translated by the memory model).
    pub va: u64,
    /// Write (dirties the warmed line).
    #[serde(default)]
    pub write: bool,
}

/// An address-space maintenance event. Events ride on the Mop that caused
/// them (an mmap/brk/stack-growth syscall) and are reported back to the
/// feeder when that Mop commits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AsOp {
    /// A region was mapped.
    Mmap {
        /// Address space.
        asid: Asid,
        /// Region base.
        va: u64,
        /// Region length in bytes.
        len: u64,
        /// The mapping moved the program break.
        #[serde(default)]
        mod_brk: bool,
    },
    /// A region was unmapped.
    Munmap {
        /// Address space.
        asid: Asid,
        /// Region base.
        va: u64,
        /// Region length in bytes.
        len: u64,
        /// The unmapping moved the program break.
        #[serde(default)]
        mod_brk: bool,
    },
    /// The program break moved.
    Brk {
        /// Address space.
        asid: Asid,
        /// New break.
        brk: u64,
        /// Also map the grown region.
        #[serde(default)]
        do_mmap: bool,
    },
    /// The stack grew.
    Stack {
        /// Address space.
        asid: Asid,
        /// New stack pointer.
        sp: u64,
        /// Bottom of stack.
        bos: u64,
    },
}

/// One memory operand of a Mop.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemRef {
    /// Store (true) or load (false).
    #[serde(default)]
    pub is_store: bool,
    /// Effective virtual address.
    pub va: u64,
    /// Access size in bytes.
    pub size: u8,
    /// Bytes written (stores; applied to memory at commit).
    #[serde(default)]
    pub bytes: Vec<u8>,
}

/// One uop of a Mop's flow, as cracked by the feeder's decoder.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UopSpec {
    /// Functional unit class.
    #[serde(default)]
    pub fu: FuClass,
    /// Load uop.
    #[serde(default)]
    pub load: bool,
    /// Store-address uop.
    #[serde(default)]
    pub sta: bool,
    /// Store-data uop.
    #[serde(default, rename = "std")]
    pub std_uop: bool,
    /// Control uop (resolves the branch).
    #[serde(default)]
    pub ctrl: bool,
    /// No-op.
    #[serde(default)]
    pub nop: bool,
    /// Fence.
    #[serde(default)]
    pub fence: bool,
    /// Floating-point op.
    #[serde(default)]
    pub fpop: bool,
    /// Carries an immediate (two carrier slots follow in the flow).
    #[serde(default)]
    pub has_imm: bool,
    /// Input register names (up to 3).
    #[serde(default)]
    pub idep: Vec<u8>,
    /// Output register names (up to 2).
    #[serde(default)]
    pub odep: Vec<u8>,
    /// Memory access size in bytes.
    #[serde(default)]
    pub mem_size: u8,
    /// Which [`MemRef`] of the Mop this uop covers.
    #[serde(default)]
    pub mem_op: Option<usize>,
    /// Fusion eligibility.
    #[serde(default)]
    pub fusable: FusableFlags,
}

impl UopSpec {
    /// Input register name for slot `i`.
    pub fn idep_reg(&self, i: usize) -> Reg {
        self.idep.get(i).copied().map_or(Reg::NONE, Reg)
    }

    /// Output register name for slot `i`.
    pub fn odep_reg(&self, i: usize) -> Reg {
        self.odep.get(i).copied().map_or(Reg::NONE, Reg)
    }
}

/// One architectural Mop as delivered by the feeder.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MopSpec {
    /// Instruction address.
    pub pc: u64,
    /// Architecturally-true next PC.
    pub npc: u64,
    /// Instruction length in bytes.
    pub len: u8,
    /// Raw instruction bytes (may be empty in synthetic traces).
    #[serde(default)]
    pub bytes: Vec<u8>,
    /// Decoded instruction flags.
    #[serde(default)]
    pub flags: MopFlags,
    /// Decoded direct branch target (0 when not applicable).
    #[serde(default)]
    pub target_pc: u64,
    /// REP iteration count.
    #[serde(default)]
    pub rep_iterations: u32,
    /// Address space of this Mop.
    #[serde(default)]
    pub asid: Asid,
    /// The uop flow (immediate carriers are added by the oracle).
    pub uops: Vec<UopSpec>,
    /// Memory operands, in uop `mem_op` order.
    #[serde(default)]
    pub mem: Vec<MemRef>,
    /// Address-space events this Mop performs, reported at commit.
    #[serde(default)]
    pub asops: Vec<AsOp>,
}

/// Feeder response to a Mop request.
#[derive(Clone, Debug)]
pub enum FeederResponse {
    /// The next architectural Mop.
    Mop(Box<MopSpec>),
    /// Not ready this cycle (e.g. waiting on the producing process).
    NotReady,
    /// The instruction stream is exhausted; drain and finish.
    Exhausted,
}

/// The oracle's upstream collaborator.
///
/// The address-space notifications are driven by the commit stage: a Mop
/// carrying [`AsOp`]s reports them here when it retires, so the feeder's
/// mapping state stays reconciled with architectural progress.
pub trait Feeder {
    /// Requests the next architectural Mop for `core`.
    fn next_mop(&mut self, core: usize) -> FeederResponse;

    /// Applies a committed store to architectural memory.
    fn commit_store(&mut self, core: usize, paddr: u64, size: u8, bytes: &[u8]);

    /// Reads one byte of architectural memory (oracle-side load values).
    fn read_mem(&self, paddr: u64) -> u8;

    /// A region was mapped.
    fn notify_mmap(&mut self, _asid: Asid, _va: u64, _len: u64, _mod_brk: bool) {}

    /// A region was unmapped.
    fn notify_munmap(&mut self, _asid: Asid, _va: u64, _len: u64, _mod_brk: bool) {}

    /// The program break moved.
    fn update_brk(&mut self, _asid: Asid, _brk: u64, _do_mmap: bool) {}

    /// The stack was extended.
    fn map_stack(&mut self, _asid: Asid, _sp: u64, _bos: u64) {}

    /// Drains the pre-simulation LLC warming accesses. Called once per
    /// slice before timing starts.
    fn warm_accesses(&mut self) -> Vec<WarmAccess> {
        Vec::new()
    }

    /// A simulation slice begins.
    fn slice_start(&mut self, _slice: u64) {}

    /// A simulation slice ends.
    fn slice_end(&mut self, _slice: u64, _feeder_length: u64, _weight: f64) {}
}

/// A trace file: shared header plus the dynamic Mop stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Trace {
    /// Times to replay the stream (requires a loop-shaped trace for >1).
    #[serde(default = "Trace::default_repeat")]
    pub repeat: u64,
    /// Pre-simulation LLC warming accesses.
    #[serde(default)]
    pub warm: Vec<WarmAccess>,
    /// The dynamic Mop stream.
    pub mops: Vec<MopSpec>,
}

impl Trace {
    fn default_repeat() -> u64 {
        1
    }
}

/// Replays a recorded dynamic instruction stream.
///
/// Beyond serving Mops, the feeder maintains the architectural side state
/// the notifications describe: committed stores land in its memory image,
/// and commit-time address-space events update its mapping table, program
/// break, and stack floor.
pub struct TraceFeeder {
    trace: Trace,
    pos: Vec<usize>,
    rounds_left: Vec<u64>,
    memory: HashMap<u64, u8>,
    warm: Vec<WarmAccess>,
    mappings: HashMap<Asid, Vec<(u64, u64)>>,
    brk: HashMap<Asid, u64>,
    stack_floor: HashMap<Asid, u64>,
}

impl TraceFeeder {
    /// Creates a feeder serving `trace` to `num_cores` cores (each core
    /// replays the same stream independently).
    pub fn new(trace: Trace, num_cores: usize) -> Self {
        let repeat = trace.repeat.max(1);
        let warm = trace.warm.clone();
        Self {
            trace,
            pos: vec![0; num_cores],
            rounds_left: vec![repeat; num_cores],
            memory: HashMap::new(),
            warm,
            mappings: HashMap::new(),
            brk: HashMap::new(),
            stack_floor: HashMap::new(),
        }
    }

    /// Parses a JSON trace.
    pub fn from_json(json: &str, num_cores: usize) -> serde_json::Result<Self> {
        let trace: Trace = serde_json::from_str(json)?;
        Ok(Self::new(trace, num_cores))
    }

    /// Total Mops a single core will be served.
    pub fn stream_len(&self) -> u64 {
        self.trace.repeat.max(1) * self.trace.mops.len() as u64
    }

    /// Bytes currently mapped in `asid`.
    pub fn mapped_bytes(&self, asid: Asid) -> u64 {
        self.mappings
            .get(&asid)
            .map_or(0, |regions| regions.iter().map(|&(_, len)| len).sum())
    }

    /// The program break of `asid`, if one was reported.
    pub fn brk(&self, asid: Asid) -> Option<u64> {
        self.brk.get(&asid).copied()
    }

    /// The lowest stack pointer reported for `asid`.
    pub fn stack_floor(&self, asid: Asid) -> Option<u64> {
        self.stack_floor.get(&asid).copied()
    }
}

impl Feeder for TraceFeeder {
    fn next_mop(&mut self, core: usize) -> FeederResponse {
        if self.trace.mops.is_empty() {
            return FeederResponse::Exhausted;
        }
        if self.pos[core] >= self.trace.mops.len() {
            if self.rounds_left[core] > 1 {
                self.rounds_left[core] -= 1;
                self.pos[core] = 0;
            } else {
                return FeederResponse::Exhausted;
            }
        }
        let spec = self.trace.mops[self.pos[core]].clone();
        self.pos[core] += 1;
        FeederResponse::Mop(Box::new(spec))
    }

    fn commit_store(&mut self, _core: usize, paddr: u64, size: u8, bytes: &[u8]) {
        for i in 0..size as usize {
            let byte = bytes.get(i).copied().unwrap_or(0);
            let _ = self.memory.insert(paddr + i as u64, byte);
        }
    }

    fn read_mem(&self, paddr: u64) -> u8 {
        self.memory.get(&paddr).copied().unwrap_or(0)
    }

    fn notify_mmap(&mut self, asid: Asid, va: u64, len: u64, _mod_brk: bool) {
        self.mappings.entry(asid).or_default().push((va, len));
    }

    fn notify_munmap(&mut self, asid: Asid, va: u64, len: u64, _mod_brk: bool) {
        if let Some(regions) = self.mappings.get_mut(&asid) {
            regions.retain(|&(base, rlen)| base + rlen <= va || va + len <= base);
        }
    }

    fn update_brk(&mut self, asid: Asid, brk: u64, do_mmap: bool) {
        let old = self.brk.insert(asid, brk);
        if do_mmap && let Some(old) = old
            && brk > old
        {
            self.mappings.entry(asid).or_default().push((old, brk - old));
        }
    }

    fn map_stack(&mut self, asid: Asid, sp: u64, _bos: u64) {
        let floor = self.stack_floor.entry(asid).or_insert(sp);
        *floor = (*floor).min(sp);
    }

    fn warm_accesses(&mut self) -> Vec<WarmAccess> {
        std::mem::take(&mut self.warm)
    }
}

impl std::fmt::Debug for TraceFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceFeeder")
            .field("mops", &self.trace.mops.len())
            .field("repeat", &self.trace.repeat)
            .finish()
    }
}
