//! Macro-op and micro-op structures and their arena.
//!
//! A Mop is one architectural x86 instruction; it expands into a flow of
//! uops, the unit of out-of-order scheduling. This module provides:
//! 1. **`Mop`/`Uop`:** per-stage state grouped the way the pipeline touches
//!    it (fetch, decode, alloc, oracle, exec, timing).
//! 2. **`UopArena`:** slab storage for uops and output-dependence links.
//!    The shadow MopQ owns Mop storage; everything else holds indices.
//!
//! Pointers between uops (dataflow edges) are arena indices: producers keep a
//! singly-linked list of consumer links, consumers keep producer back-indices,
//! and squash splices itself out of each producer's list via the back-indices.

use crate::common::{ActionId, MAX_IDEPS, MAX_ILEN, MAX_ODEPS, NEVER, Reg, Seq, Tick};
use crate::core::units::fu::FuClass;
use crate::oracle::feeder::AsOp;

/// Index of a uop in the per-core [`UopArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UopId(pub u32);

/// Index of a Mop slot in the oracle's shadow MopQ ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MopId(pub u32);

/// Index of an output-dependence link node in the arena.
type OdepIdx = u32;

/// Which fusions a uop may participate in (set by the cracker).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FusableFlags {
    /// May head/join a load+op fusion.
    #[serde(default)]
    pub load_op: bool,
    /// May head/join a sta+std fusion.
    #[serde(default)]
    pub sta_std: bool,
    /// May join a load+op+store fusion (atomics).
    #[serde(default)]
    pub load_op_store: bool,
    /// May head/join an FP load+op fusion.
    #[serde(default)]
    pub fp_load_op: bool,
}

/// Decode-time attributes of a uop, fixed once the Mop is cracked.
#[derive(Clone, Debug, Default)]
pub struct UopDecode {
    /// This uop carries an immediate in the following two flow slots.
    pub has_imm: bool,
    /// This slot is an immediate carrier, not a real uop.
    pub is_imm: bool,
    /// Register input dependency names.
    pub idep_name: [Reg; MAX_IDEPS],
    /// Register output dependency names.
    pub odep_name: [Reg; MAX_ODEPS],
    /// Memory access size in bytes (loads/stores).
    pub mem_size: u8,
    /// First uop of the Mop flow.
    pub bom: bool,
    /// Last uop of the Mop flow.
    pub eom: bool,
    /// Branch/jump/call.
    pub is_ctrl: bool,
    /// Load.
    pub is_load: bool,
    /// Store-address uop.
    pub is_sta: bool,
    /// Store-data uop.
    pub is_std: bool,
    /// No-op.
    pub is_nop: bool,
    /// Memory fence.
    pub is_fence: bool,
    /// Floating-point op.
    pub is_fpop: bool,
    /// Functional unit class.
    pub fu_class: FuClass,
    /// Fusion eligibility.
    pub fusable: FusableFlags,
    /// Member of a fused set.
    pub in_fusion: bool,
    /// First uop of a fused set.
    pub is_fusion_head: bool,
    /// Total uops in the fused set (heads only).
    pub fusion_size: u8,
    /// Head of this uop's fused set.
    pub fusion_head: Option<UopId>,
    /// Next uop in this fused set.
    pub fusion_next: Option<UopId>,
    /// Oracle sequence of the owning Mop.
    pub mop_seq: Seq,
    /// Unique uop sequence (Mop seq combined with flow index).
    pub uop_seq: Seq,
    /// Index of this uop within its Mop's flow.
    pub flow_index: u16,
}

/// Alloc-time resource indices.
#[derive(Clone, Debug, Default)]
pub struct UopAlloc {
    /// ROB slot, once allocated.
    pub rob_index: Option<usize>,
    /// RS slot, while scheduled.
    pub rs_index: Option<usize>,
    /// LDQ slot (loads).
    pub ldq_index: Option<usize>,
    /// STQ slot (sta/std).
    pub stq_index: Option<usize>,
    /// Bound execution port.
    pub port_assignment: Option<usize>,
    /// All members of a fused set have been allocated (heads only).
    pub full_fusion_allocated: bool,
}

/// Oracle ground truth recorded when the Mop was cracked.
#[derive(Clone, Debug, Default)]
pub struct UopOracle {
    /// Which memory operand of the Mop this uop covers (loads/sta/std).
    pub mem_op_index: Option<usize>,
    /// Effective virtual address.
    pub virt_addr: u64,
    /// Effective physical address.
    pub phys_addr: u64,
    /// Ground-truth producer uops per input slot, identified by arena id
    /// plus uop sequence (the sequence disambiguates recycled slots).
    pub idep_producer: [Option<(UopId, Seq)>; MAX_IDEPS],
    /// The next instruction is at the wrong PC (this uop must resteer).
    pub recover_inst: bool,
}

/// Dynamic execution state.
#[derive(Clone, Debug)]
pub struct UopExec {
    /// Cancellation tag; in-flight events carrying an older id are dropped.
    pub action_id: ActionId,
    /// Currently linked into a port's ready queue.
    pub in_ready_q: bool,
    /// Observed producers (dataflow back-pointers).
    pub idep_uop: [Option<UopId>; MAX_IDEPS],
    /// Head of the consumer (odep) list.
    pub odep_head: Option<OdepIdx>,
    /// Per-operand input value availability.
    pub ival_ready: [bool; MAX_IDEPS],
    /// Output value produced.
    pub oval_ready: bool,
    /// Load: when DL1 data arrived.
    pub when_data_loaded: Tick,
    /// Load/store: when the DTLB translation arrived.
    pub when_addr_translated: Tick,
    /// Times this uop re-entered the scheduler after a replay.
    pub num_replays: u32,
}

impl Default for UopExec {
    fn default() -> Self {
        Self {
            action_id: 0,
            in_ready_q: false,
            idep_uop: [None; MAX_IDEPS],
            odep_head: None,
            ival_ready: [false; MAX_IDEPS],
            oval_ready: false,
            when_data_loaded: NEVER,
            when_addr_translated: NEVER,
            num_replays: 0,
        }
    }
}

/// Per-uop timestamps, sentinel-initialized to [`NEVER`].
#[derive(Clone, Debug)]
pub struct UopTiming {
    /// Left the decode pipe.
    pub when_decoded: Tick,
    /// Entered ROB/RS.
    pub when_allocated: Tick,
    /// Per-input tag-ready times (scheduler view).
    pub when_itag_ready: [Tick; MAX_IDEPS],
    /// Output tag broadcast time.
    pub when_otag_ready: Tick,
    /// Per-input value-ready times (data view).
    pub when_ival_ready: [Tick; MAX_IDEPS],
    /// All inputs ready (max of itag readies).
    pub when_ready: Tick,
    /// Selected and sent to a functional unit.
    pub when_issued: Tick,
    /// Began execution.
    pub when_exec: Tick,
    /// Result available to consumers.
    pub when_completed: Tick,
}

impl Default for UopTiming {
    fn default() -> Self {
        Self {
            when_decoded: NEVER,
            when_allocated: NEVER,
            when_itag_ready: [NEVER; MAX_IDEPS],
            when_otag_ready: NEVER,
            when_ival_ready: [NEVER; MAX_IDEPS],
            when_ready: NEVER,
            when_issued: NEVER,
            when_exec: NEVER,
            when_completed: NEVER,
        }
    }
}

/// One micro-op.
#[derive(Clone, Debug, Default)]
pub struct Uop {
    /// Owning Mop slot in the shadow MopQ.
    pub mop: Option<MopId>,
    /// Decode-time attributes.
    pub decode: UopDecode,
    /// Alloc-time resource indices.
    pub alloc: UopAlloc,
    /// Oracle ground truth.
    pub oracle: UopOracle,
    /// Dynamic execution state.
    pub exec: UopExec,
    /// Timestamps.
    pub timing: UopTiming,
}

impl Uop {
    /// Resets dynamic state for re-execution from the shadow log, keeping
    /// decode/oracle attributes.
    pub fn reset_dynamic(&mut self) {
        self.alloc = UopAlloc::default();
        self.exec = UopExec::default();
        self.timing = UopTiming::default();
    }

    /// True when this slot is schedulable at all (not a nop or immediate).
    #[inline]
    pub fn executes(&self) -> bool {
        !self.decode.is_imm && !self.decode.is_nop
    }
}

/// Architectural flags of a Mop, as decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MopFlags {
    /// Control instruction.
    #[serde(default)]
    pub ctrl: bool,
    /// Unconditional control transfer.
    #[serde(default)]
    pub uncond: bool,
    /// Conditional control transfer.
    #[serde(default)]
    pub cond: bool,
    /// Memory access instruction.
    #[serde(default)]
    pub mem: bool,
    /// Has a load.
    #[serde(default)]
    pub load: bool,
    /// Has a store.
    #[serde(default)]
    pub store: bool,
    /// Trapping instruction (syscall etc.).
    #[serde(default)]
    pub trap: bool,
    /// Indirect control transfer.
    #[serde(default)]
    pub indirect: bool,
    /// Function call.
    #[serde(default)]
    pub call: bool,
    /// Subroutine return.
    #[serde(default)]
    pub ret: bool,
    /// Has a REP prefix.
    #[serde(default)]
    pub rep: bool,
    /// Atomic (lock prefix or XCHG).
    #[serde(default)]
    pub atomic: bool,
}

/// Fetch-side Mop state.
#[derive(Clone, Debug, Default)]
pub struct MopFetch {
    /// Instruction address.
    pub pc: u64,
    /// Predicted next PC.
    pub pred_npc: u64,
    /// Fall-through PC (`pc + len`).
    pub ft_pc: u64,
    /// Raw instruction bytes.
    pub code: [u8; MAX_ILEN],
    /// Instruction length in bytes.
    pub len: u64,
    /// Byte-queue request issued for the first byte's line.
    pub first_byte_requested: bool,
    /// Byte-queue request issued for the last byte's line.
    pub last_byte_requested: bool,
    /// Tag for squashable front-end actions on this Mop.
    pub jeclear_action_id: ActionId,
    /// Branch predictor state cache held until commit or recovery.
    pub bpred_state: Option<usize>,
}

/// Decode-side Mop state.
#[derive(Clone, Debug, Default)]
pub struct MopDecode {
    /// Decoded instruction flags.
    pub flags: MopFlags,
    /// Total flow slots, including immediate carriers.
    pub flow_length: usize,
    /// Index of the last real uop (≠ `flow_length - 1` when imms trail).
    pub last_uop_index: usize,
    /// Branch target, if decoded.
    pub target_pc: u64,
    /// Index of the next flow slot to hand to the allocator.
    pub last_stage_index: usize,
    /// REP iteration count recorded by the oracle.
    pub rep_iterations: u32,
}

/// Commit-side Mop state.
#[derive(Clone, Debug, Default)]
pub struct MopCommit {
    /// First flow index that has not completed execution.
    pub complete_index: usize,
    /// First flow index that has not committed.
    pub commit_index: usize,
    /// A jeclear for this Mop is still in the resteer pipe.
    pub jeclear_in_flight: bool,
}

/// Oracle-side Mop state.
#[derive(Clone, Debug, Default)]
pub struct MopOracle {
    /// True next PC.
    pub npc: u64,
    /// Oracle sequence number, strictly increasing.
    pub seq: Seq,
    /// REP with zero iterations.
    pub zero_rep: bool,
    /// Fetched on the wrong path.
    pub spec_mode: bool,
    /// Synthesized because the wrong-path bytes did not decode.
    pub bogus: bool,
    /// Taken branch per the oracle.
    pub taken_branch: bool,
    /// The predicted NPC of this Mop is wrong (misprediction source).
    pub recover_inst: bool,
}

/// Per-Mop timestamps.
#[derive(Clone, Debug)]
pub struct MopTiming {
    /// Byte-queue requests issued.
    pub when_fetch_started: Tick,
    /// All bytes and translations arrived.
    pub when_fetched: Tick,
    /// Entered the decode pipe.
    pub when_decode_started: Tick,
    /// Left the decode pipe.
    pub when_decode_finished: Tick,
    /// First uop committed.
    pub when_commit_started: Tick,
    /// Last uop committed.
    pub when_commit_finished: Tick,
}

impl Default for MopTiming {
    fn default() -> Self {
        Self {
            when_fetch_started: NEVER,
            when_fetched: NEVER,
            when_decode_started: NEVER,
            when_decode_finished: NEVER,
            when_commit_started: NEVER,
            when_commit_finished: NEVER,
        }
    }
}

/// Per-Mop statistics.
#[derive(Clone, Debug, Default)]
pub struct MopStat {
    /// Flow slots (including immediate carriers).
    pub num_uops: usize,
    /// Real scheduled uops.
    pub num_eff_uops: usize,
    /// Memory references.
    pub num_refs: usize,
    /// Loads.
    pub num_loads: usize,
    /// Branches.
    pub num_branches: usize,
}

/// A store this Mop performs, applied to architectural memory at commit.
#[derive(Clone, Debug, Default)]
pub struct StoreRecord {
    /// Effective virtual address.
    pub va: u64,
    /// Store size in bytes.
    pub size: u8,
    /// Bytes written.
    pub bytes: Vec<u8>,
}

/// One x86 macro-op.
#[derive(Clone, Debug, Default)]
pub struct Mop {
    /// Slot occupied.
    pub valid: bool,
    /// Fetch-side state.
    pub fetch: MopFetch,
    /// Decode-side state.
    pub decode: MopDecode,
    /// The uop flow backing this Mop (arena indices).
    pub uops: Vec<UopId>,
    /// Stores to apply at commit.
    pub stores: Vec<StoreRecord>,
    /// Address-space events to report to the feeder at commit.
    pub asops: Vec<AsOp>,
    /// Commit-side state.
    pub commit: MopCommit,
    /// Oracle-side state.
    pub oracle: MopOracle,
    /// Timestamps.
    pub timing: MopTiming,
    /// Statistics.
    pub stat: MopStat,
}

impl Mop {
    /// True when every uop of this Mop has completed execution.
    #[inline]
    pub fn all_complete(&self) -> bool {
        self.commit.complete_index >= self.decode.flow_length
    }
}

/// A node in a producer's consumer (odep) list.
#[derive(Clone, Copy, Debug)]
struct OdepLink {
    /// Consuming uop.
    consumer: UopId,
    /// Which input slot of the consumer.
    op_num: u8,
    /// Next link.
    next: Option<OdepIdx>,
}

/// Slab arena owning all uops of a core plus their dependence links.
///
/// Slots are recycled through free lists; the shadow MopQ frees a Mop's uops
/// when the Mop retires or is rewound. Stale `UopId`s held by in-flight
/// events are rendered harmless by action-id comparison, never by lookup.
pub struct UopArena {
    uops: Vec<Uop>,
    free: Vec<u32>,
    links: Vec<OdepLink>,
    link_free: Vec<u32>,
}

impl UopArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            uops: Vec::new(),
            free: Vec::new(),
            links: Vec::new(),
            link_free: Vec::new(),
        }
    }

    /// Number of live uops.
    pub fn live(&self) -> usize {
        self.uops.len() - self.free.len()
    }

    /// Allocates one zeroed uop slot.
    pub fn alloc_uop(&mut self) -> UopId {
        if let Some(slot) = self.free.pop() {
            self.uops[slot as usize] = Uop::default();
            UopId(slot)
        } else {
            self.uops.push(Uop::default());
            UopId((self.uops.len() - 1) as u32)
        }
    }

    /// Returns a uop slot to the free list. The uop is first spliced out of
    /// its producers' odep lists (so no producer ever walks into a freed
    /// consumer), then its own consumer links are dropped.
    pub fn free_uop(&mut self, id: UopId) {
        self.unlink_ideps(id);
        let mut link = self.uops[id.0 as usize].exec.odep_head.take();
        while let Some(idx) = link {
            link = self.links[idx as usize].next;
            self.link_free.push(idx);
        }
        self.uops[id.0 as usize] = Uop::default();
        self.free.push(id.0);
    }

    /// Immutable access.
    #[inline]
    pub fn get(&self, id: UopId) -> &Uop {
        &self.uops[id.0 as usize]
    }

    /// Mutable access.
    #[inline]
    pub fn get_mut(&mut self, id: UopId) -> &mut Uop {
        &mut self.uops[id.0 as usize]
    }

    /// Links `consumer`'s input slot `op_num` onto `producer`'s odep list and
    /// records the back-pointer.
    pub fn add_odep(&mut self, producer: UopId, consumer: UopId, op_num: usize) {
        let head = self.uops[producer.0 as usize].exec.odep_head;
        let idx = if let Some(slot) = self.link_free.pop() {
            self.links[slot as usize] = OdepLink {
                consumer,
                op_num: op_num as u8,
                next: head,
            };
            slot
        } else {
            self.links.push(OdepLink {
                consumer,
                op_num: op_num as u8,
                next: head,
            });
            (self.links.len() - 1) as u32
        };
        self.uops[producer.0 as usize].exec.odep_head = Some(idx);
        self.uops[consumer.0 as usize].exec.idep_uop[op_num] = Some(producer);
    }

    /// Splices `consumer`'s input slot `op_num` out of `producer`'s odep list.
    pub fn remove_odep(&mut self, producer: UopId, consumer: UopId, op_num: usize) {
        let mut prev: Option<OdepIdx> = None;
        let mut cur = self.uops[producer.0 as usize].exec.odep_head;
        while let Some(idx) = cur {
            let link = self.links[idx as usize];
            if link.consumer == consumer && link.op_num as usize == op_num {
                match prev {
                    None => self.uops[producer.0 as usize].exec.odep_head = link.next,
                    Some(p) => self.links[p as usize].next = link.next,
                }
                self.link_free.push(idx);
                return;
            }
            prev = cur;
            cur = link.next;
        }
    }

    /// Collects `(consumer, op_num)` pairs from a producer's odep list.
    pub fn odep_consumers(&self, producer: UopId) -> Vec<(UopId, usize)> {
        let mut out = Vec::new();
        let mut cur = self.uops[producer.0 as usize].exec.odep_head;
        while let Some(idx) = cur {
            let link = self.links[idx as usize];
            out.push((link.consumer, link.op_num as usize));
            cur = link.next;
        }
        out
    }

    /// Unlinks a consumer from all of its observed producers (squash path).
    pub fn unlink_ideps(&mut self, consumer: UopId) {
        for op_num in 0..MAX_IDEPS {
            if let Some(producer) = self.uops[consumer.0 as usize].exec.idep_uop[op_num] {
                self.remove_odep(producer, consumer, op_num);
                self.uops[consumer.0 as usize].exec.idep_uop[op_num] = None;
            }
        }
    }
}

impl Default for UopArena {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UopArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UopArena")
            .field("live", &self.live())
            .field("capacity", &self.uops.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_recycles_slots() {
        let mut arena = UopArena::new();
        let a = arena.alloc_uop();
        let b = arena.alloc_uop();
        assert_eq!(arena.live(), 2);
        arena.free_uop(a);
        let c = arena.alloc_uop();
        assert_eq!(c, a); // LIFO reuse
        assert_eq!(arena.live(), 2);
        arena.free_uop(b);
        arena.free_uop(c);
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn odep_link_and_splice() {
        let mut arena = UopArena::new();
        let prod = arena.alloc_uop();
        let c1 = arena.alloc_uop();
        let c2 = arena.alloc_uop();

        arena.add_odep(prod, c1, 0);
        arena.add_odep(prod, c2, 1);
        let consumers = arena.odep_consumers(prod);
        assert_eq!(consumers.len(), 2);
        assert_eq!(arena.get(c1).exec.idep_uop[0], Some(prod));

        arena.unlink_ideps(c1);
        let consumers = arena.odep_consumers(prod);
        assert_eq!(consumers, vec![(c2, 1)]);
        assert_eq!(arena.get(c1).exec.idep_uop[0], None);
    }

    #[test]
    fn free_uop_drops_dangling_links() {
        let mut arena = UopArena::new();
        let prod = arena.alloc_uop();
        let cons = arena.alloc_uop();
        arena.add_odep(prod, cons, 2);
        arena.free_uop(prod);
        // the link node is recycled
        let p2 = arena.alloc_uop();
        assert_eq!(p2, prod);
        assert!(arena.odep_consumers(p2).is_empty());
    }

    #[test]
    fn uop_timing_starts_never() {
        let uop = Uop::default();
        assert_eq!(uop.timing.when_ready, NEVER);
        assert_eq!(uop.timing.when_completed, NEVER);
        assert!(!uop.exec.oval_ready);
    }
}
