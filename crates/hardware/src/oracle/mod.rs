//! The oracle: functional execution running ahead of the timing model.
//!
//! The oracle owns the shadow MopQ, a bounded ring of Mops executed ahead of
//! commit. It provides:
//! 1. **Run-ahead:** `exec(pc)` hands the front-end the Mop at `pc`, pulling
//!    from the feeder on the true path and synthesizing wrong-path Mops once
//!    fetch diverges (from a static decode cache when the PC has been seen,
//!    a bogus nop otherwise).
//! 2. **Ground truth:** every cracked uop records its true effective
//!    addresses and producer uops, giving alloc and exec oracle dataflow.
//! 3. **Recovery:** jeclears truncate the MopQ tail past the mispredicted
//!    Mop and rewind the speculative memory journal; `complete_flush`
//!    rewinds the hand-out pointer so surviving Mops re-execute from the
//!    shadow log instead of the (unrewindable) feeder.
//! 4. **Reconciliation:** commit pops the MopQ head and applies the Mop's
//!    stores to architectural memory through the feeder.

/// The feeder interface and trace feeder.
pub mod feeder;

use std::collections::HashMap;

use crate::common::{Asid, MAX_IDEPS, MAX_ILEN, MAX_ODEPS, Reg, Seq, is_page_zero};
use crate::core::mop::{Mop, MopId, StoreRecord, UopArena, UopId};
use crate::mem::translate::v2p_translate;
use crate::oracle::feeder::{AsOp, Feeder, FeederResponse, MopSpec, UopSpec};

/// Flow index bits inside a uop sequence number.
const UOP_SEQ_SHIFT: u32 = 12;

/// The bounded ring of in-flight Mops.
pub struct MopQ {
    slots: Vec<Mop>,
    head: usize,
    num: usize,
}

impl MopQ {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Mop::default);
        Self {
            slots,
            head: 0,
            num: 0,
        }
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slots.
    pub fn len(&self) -> usize {
        self.num
    }

    /// True when no Mops are in flight.
    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    fn is_full(&self) -> bool {
        self.num == self.slots.len()
    }

    /// Slot id at `offset` from the head (oldest = 0).
    pub fn index_at(&self, offset: usize) -> MopId {
        debug_assert!(offset < self.num);
        MopId(((self.head + offset) % self.slots.len()) as u32)
    }

    fn push(&mut self, mop: Mop) -> Option<MopId> {
        if self.is_full() {
            return None;
        }
        let slot = (self.head + self.num) % self.slots.len();
        self.slots[slot] = mop;
        self.num += 1;
        Some(MopId(slot as u32))
    }

    fn pop_head(&mut self) {
        debug_assert!(self.num > 0);
        self.slots[self.head].valid = false;
        self.head = (self.head + 1) % self.slots.len();
        self.num -= 1;
    }

    fn pop_tail(&mut self) {
        debug_assert!(self.num > 0);
        let slot = (self.head + self.num - 1) % self.slots.len();
        self.slots[slot].valid = false;
        self.num -= 1;
    }

    /// Shared access to a Mop.
    pub fn get(&self, id: MopId) -> &Mop {
        let mop = &self.slots[id.0 as usize];
        debug_assert!(mop.valid);
        mop
    }

    /// Shared access that tolerates a recycled slot (stale ids).
    pub fn get_checked(&self, id: MopId) -> Option<&Mop> {
        let mop = &self.slots[id.0 as usize];
        mop.valid.then_some(mop)
    }

    /// Mutable access to a Mop.
    pub fn get_mut(&mut self, id: MopId) -> &mut Mop {
        let mop = &mut self.slots[id.0 as usize];
        debug_assert!(mop.valid);
        mop
    }
}

impl std::fmt::Debug for MopQ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MopQ({}/{})", self.num, self.slots.len())
    }
}

/// Journaled speculative memory: wrong-path stores land here, never in
/// architectural memory, and recovery unwinds them newest-first.
#[derive(Debug, Default)]
pub struct SpecMem {
    map: HashMap<u64, u8>,
    journal: Vec<(Seq, u64, Option<u8>)>,
}

impl SpecMem {
    /// Records a speculative byte write tagged with the writing Mop's seq.
    pub fn write(&mut self, seq: Seq, addr: u64, byte: u8) {
        let prev = self.map.insert(addr, byte);
        self.journal.push((seq, addr, prev));
    }

    /// Reads a speculatively-written byte, if any.
    pub fn read(&self, addr: u64) -> Option<u8> {
        self.map.get(&addr).copied()
    }

    /// Unwinds all writes by Mops younger than `seq`.
    pub fn rewind(&mut self, seq: Seq) {
        while let Some(&(s, addr, prev)) = self.journal.last() {
            if s <= seq {
                break;
            }
            let _ = self.journal.pop();
            match prev {
                Some(byte) => {
                    let _ = self.map.insert(addr, byte);
                }
                None => {
                    let _ = self.map.remove(&addr);
                }
            }
        }
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.map.clear();
        self.journal.clear();
    }

    /// Outstanding journal entries.
    pub fn len(&self) -> usize {
        self.journal.len()
    }

    /// True when no speculative writes are outstanding.
    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }
}

/// State stripped from the pipeline by a recovery, for the core to release.
#[derive(Debug, Default)]
pub struct Squashed {
    /// Uops of the squashed Mops (still allocated; free after rollback).
    pub uops: Vec<UopId>,
    /// Branch predictor state caches to return to the pool.
    pub bpred_states: Vec<usize>,
}

/// The per-core oracle.
pub struct Oracle {
    /// The shadow MopQ.
    pub mopq: MopQ,
    /// Mops handed to fetch, counted from the head.
    handed: usize,
    spec_mode: bool,
    drain_pending: bool,
    started: bool,
    exhausted: bool,
    true_npc: u64,
    next_seq: Seq,
    core: usize,
    reg_map: HashMap<u8, UopId>,
    decode_cache: HashMap<u64, MopSpec>,
    /// Speculative memory side table.
    pub spec_mem: SpecMem,
}

impl Oracle {
    /// Creates an oracle with a shadow MopQ of `mopq_size` entries.
    pub fn new(core: usize, mopq_size: usize) -> Self {
        Self {
            mopq: MopQ::new(mopq_size.max(4)),
            handed: 0,
            spec_mode: false,
            drain_pending: false,
            started: false,
            exhausted: false,
            true_npc: 0,
            // seq 0 is reserved as "invalid" so recycled arena slots
            // (which read as sequence 0) never masquerade as live uops
            next_seq: 1,
            core,
            reg_map: HashMap::new(),
            decode_cache: HashMap::new(),
            spec_mem: SpecMem::default(),
        }
    }

    /// True when the oracle is running past a misprediction.
    pub fn spec_mode(&self) -> bool {
        self.spec_mode
    }

    /// True once the feeder reported end of stream and nothing is in flight.
    pub fn exhausted(&self) -> bool {
        self.exhausted && self.handed >= self.mopq.len()
    }

    /// True while a trap waits for the pipeline to drain.
    pub fn is_draining(&self) -> bool {
        self.drain_pending
    }

    /// Mops that will replay from the shadow log before the feeder is asked
    /// for anything new (nonzero exactly during a nuke/replay).
    pub fn num_mops_before_feeder(&self) -> usize {
        self.mopq.len() - self.handed
    }

    /// Shared access to a Mop.
    pub fn mop(&self, id: MopId) -> &Mop {
        self.mopq.get(id)
    }

    /// Mutable access to a Mop.
    pub fn mop_mut(&mut self, id: MopId) -> &mut Mop {
        self.mopq.get_mut(id)
    }

    /// Requests the Mop at `pc`. Returns `None` when the caller must wait:
    /// feeder not ready, trap draining, MopQ full, or stream exhausted.
    pub fn exec(
        &mut self,
        pc: u64,
        feeder: &mut dyn Feeder,
        arena: &mut UopArena,
    ) -> Option<MopId> {
        // an unconsumed Mop (or a shadow-log replay) is re-served as-is
        if self.handed < self.mopq.len() {
            return Some(self.mopq.index_at(self.handed));
        }
        if self.drain_pending || self.mopq.is_full() {
            return None;
        }

        let on_true_path = !self.spec_mode && (!self.started || pc == self.true_npc);
        if on_true_path {
            if self.exhausted {
                return None;
            }
            match feeder.next_mop(self.core) {
                FeederResponse::NotReady => None,
                FeederResponse::Exhausted => {
                    self.exhausted = true;
                    None
                }
                FeederResponse::Mop(spec) => {
                    self.started = true;
                    self.true_npc = spec.npc;
                    let is_trap = spec.flags.trap;
                    self.decode_cache.insert(spec.pc, (*spec).clone());
                    let id = self.crack(&spec, false, arena);
                    if is_trap {
                        self.drain_pending = true;
                    }
                    id
                }
            }
        } else {
            // wrong path: re-decode known code, otherwise a bogus Mop
            self.spec_mode = true;
            let (spec, bogus) = if is_page_zero(pc) {
                (Self::bogus_spec(pc), true)
            } else if let Some(known) = self.decode_cache.get(&pc) {
                (known.clone(), false)
            } else {
                (Self::bogus_spec(pc), true)
            };
            let id = self.crack(&spec, true, arena);
            if let Some(id) = id {
                self.mopq.get_mut(id).oracle.bogus = bogus;
            }
            id
        }
    }

    /// Builds a synthetic wrong-path Mop at `pc`.
    fn bogus_spec(pc: u64) -> MopSpec {
        MopSpec {
            pc,
            npc: pc + 2,
            len: 2,
            uops: vec![UopSpec {
                nop: true,
                ..UopSpec::default()
            }],
            ..MopSpec::default()
        }
    }

    /// Cracks a MopSpec into a Mop plus arena uops and appends it to the
    /// shadow MopQ.
    fn crack(&mut self, spec: &MopSpec, spec_mode: bool, arena: &mut UopArena) -> Option<MopId> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut mop = Mop {
            valid: true,
            ..Mop::default()
        };
        mop.fetch.pc = spec.pc;
        mop.fetch.ft_pc = spec.pc + u64::from(spec.len.max(1));
        mop.fetch.len = u64::from(spec.len.max(1));
        for (i, b) in spec.bytes.iter().take(MAX_ILEN).enumerate() {
            mop.fetch.code[i] = *b;
        }
        mop.decode.flags = spec.flags;
        mop.decode.target_pc = spec.target_pc;
        mop.decode.rep_iterations = spec.rep_iterations;
        mop.oracle.seq = seq;
        mop.oracle.npc = spec.npc;
        mop.oracle.spec_mode = spec_mode;
        mop.oracle.zero_rep = spec.flags.rep && spec.rep_iterations == 0;
        mop.oracle.taken_branch =
            (spec.flags.ctrl || spec.flags.rep) && spec.npc != mop.fetch.ft_pc;

        let uop_specs: Vec<UopSpec> = if spec.uops.is_empty() {
            vec![UopSpec {
                nop: true,
                ..UopSpec::default()
            }]
        } else {
            spec.uops.clone()
        };

        let asid = spec.asid;
        let mut flow: Vec<UopId> = Vec::new();
        let mut last_real = 0;
        for us in &uop_specs {
            let uid = arena.alloc_uop();
            last_real = flow.len();
            self.fill_uop(arena, uid, us, seq, flow.len(), asid, spec, spec_mode);
            flow.push(uid);
            if us.has_imm {
                for _ in 0..2 {
                    let imm = arena.alloc_uop();
                    let u = arena.get_mut(imm);
                    u.decode.is_imm = true;
                    u.decode.mop_seq = seq;
                    u.decode.flow_index = flow.len() as u16;
                    u.decode.uop_seq = (seq << UOP_SEQ_SHIFT) + flow.len() as u64;
                    flow.push(imm);
                }
            }
        }
        arena.get_mut(flow[0]).decode.bom = true;
        arena.get_mut(flow[last_real]).decode.eom = true;

        mop.decode.flow_length = flow.len();
        mop.decode.last_uop_index = last_real;
        mop.stat.num_uops = flow.len();
        mop.stat.num_eff_uops = flow.iter().filter(|&&u| arena.get(u).executes()).count();
        mop.stat.num_refs = spec.mem.len();
        mop.stat.num_loads = spec.mem.iter().filter(|m| !m.is_store).count();
        mop.stat.num_branches = usize::from(spec.flags.ctrl);
        mop.uops = flow.clone();
        if !spec_mode {
            // wrong-path Mops never reconcile address-space state
            mop.asops = spec.asops.clone();
        }

        // speculative stores go to the side table, never to the feeder;
        // true-path stores are recorded for application at commit
        for mem in spec.mem.iter().filter(|m| m.is_store) {
            if spec_mode {
                let pa = v2p_translate(asid, mem.va);
                for i in 0..u64::from(mem.size) {
                    let byte = mem.bytes.get(i as usize).copied().unwrap_or(0);
                    self.spec_mem.write(seq, pa + i, byte);
                }
            } else {
                mop.stores.push(StoreRecord {
                    va: mem.va,
                    size: mem.size,
                    bytes: mem.bytes.clone(),
                });
            }
        }

        let id = self.mopq.push(mop);
        match id {
            Some(id) => {
                for &uid in &flow {
                    arena.get_mut(uid).mop = Some(id);
                }
                // register the outputs of true-path uops as live producers
                if !spec_mode {
                    for &uid in &flow {
                        for slot in 0..MAX_ODEPS {
                            let reg = arena.get(uid).decode.odep_name[slot];
                            if reg.is_some() {
                                let _ = self.reg_map.insert(reg.0, uid);
                            }
                        }
                    }
                }
                Some(id)
            }
            None => {
                // ring full after all: undo the cracked flow
                for &uid in &flow {
                    arena.free_uop(uid);
                }
                self.next_seq -= 1;
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_uop(
        &mut self,
        arena: &mut UopArena,
        uid: UopId,
        us: &UopSpec,
        mop_seq: Seq,
        flow_index: usize,
        asid: Asid,
        spec: &MopSpec,
        spec_mode: bool,
    ) {
        let producers: Vec<Option<(UopId, Seq)>> = (0..MAX_IDEPS)
            .map(|i| {
                let reg = us.idep_reg(i);
                if reg.is_some() && !spec_mode {
                    self.reg_map
                        .get(&reg.0)
                        .map(|&p| (p, arena.get(p).decode.uop_seq))
                } else {
                    None
                }
            })
            .collect();

        let uop = arena.get_mut(uid);
        uop.decode.has_imm = us.has_imm;
        for i in 0..MAX_IDEPS {
            uop.decode.idep_name[i] = us.idep_reg(i);
            uop.oracle.idep_producer[i] = producers[i];
        }
        for i in 0..MAX_ODEPS {
            uop.decode.odep_name[i] = us.odep_reg(i);
        }
        uop.decode.mem_size = us.mem_size;
        uop.decode.is_ctrl = us.ctrl;
        uop.decode.is_load = us.load;
        uop.decode.is_sta = us.sta;
        uop.decode.is_std = us.std_uop;
        uop.decode.is_nop = us.nop;
        uop.decode.is_fence = us.fence;
        uop.decode.is_fpop = us.fpop;
        uop.decode.fu_class = us.fu;
        uop.decode.fusable = us.fusable;
        uop.decode.mop_seq = mop_seq;
        uop.decode.flow_index = flow_index as u16;
        uop.decode.uop_seq = (mop_seq << UOP_SEQ_SHIFT) + flow_index as u64;

        if let Some(mem_op) = us.mem_op
            && let Some(mem) = spec.mem.get(mem_op)
        {
            uop.oracle.mem_op_index = Some(mem_op);
            uop.oracle.virt_addr = mem.va;
            uop.oracle.phys_addr = v2p_translate(asid, mem.va);
            if uop.decode.mem_size == 0 {
                uop.decode.mem_size = mem.size;
            }
        }
    }

    /// Acknowledges that fetch accepted the Mop most recently returned by
    /// [`Oracle::exec`].
    pub fn consume(&mut self, id: MopId) {
        debug_assert_eq!(self.mopq.index_at(self.handed), id);
        self.handed += 1;
    }

    /// Reconciles one committed uop: retire its register outputs from the
    /// live producer map.
    pub fn commit_uop(&mut self, uid: UopId, arena: &UopArena) {
        let uop = arena.get(uid);
        for slot in 0..MAX_ODEPS {
            let reg = uop.decode.odep_name[slot];
            if reg.is_some()
                && self.reg_map.get(&reg.0) == Some(&uid)
            {
                let _ = self.reg_map.remove(&reg.0);
            }
        }
    }

    /// Commits the Mop at the MopQ head: applies its stores to architectural
    /// memory, reports its address-space events, frees its uops, clears a
    /// pending trap drain.
    pub fn commit(&mut self, id: MopId, arena: &mut UopArena, feeder: &mut dyn Feeder) {
        debug_assert_eq!(self.mopq.index_at(0), id);
        let core = self.core;
        let asid: Asid = 0;
        let (flags, stores, asops) = {
            let mop = self.mopq.get(id);
            debug_assert!(!mop.oracle.spec_mode);
            (mop.decode.flags, mop.stores.clone(), mop.asops.clone())
        };
        for store in stores {
            let pa = v2p_translate(asid, store.va);
            feeder.commit_store(core, pa, store.size, &store.bytes);
        }
        for op in asops {
            match op {
                AsOp::Mmap {
                    asid,
                    va,
                    len,
                    mod_brk,
                } => feeder.notify_mmap(asid, va, len, mod_brk),
                AsOp::Munmap {
                    asid,
                    va,
                    len,
                    mod_brk,
                } => feeder.notify_munmap(asid, va, len, mod_brk),
                AsOp::Brk {
                    asid,
                    brk,
                    do_mmap,
                } => feeder.update_brk(asid, brk, do_mmap),
                AsOp::Stack { asid, sp, bos } => feeder.map_stack(asid, sp, bos),
            }
        }
        if flags.trap {
            self.drain_pending = false;
        }
        for uid in self.mopq.get(id).uops.clone() {
            arena.free_uop(uid);
        }
        self.mopq.pop_head();
        self.handed = self.handed.saturating_sub(1);
    }

    /// Truncates the shadow MopQ to just past `id` (a jeclear reached the
    /// front-end). The squashed Mops' uops and branch predictor state
    /// caches are returned, still allocated, so the pipeline can roll back
    /// against live state before [`Oracle::recover_finish`] runs.
    pub fn recover(&mut self, id: MopId) -> Squashed {
        let keep_seq = self.mopq.get(id).oracle.seq;
        let mut squashed = Squashed::default();
        while self.mopq.len() > 0 {
            let tail = self.mopq.index_at(self.mopq.len() - 1);
            if self.mopq.get(tail).oracle.seq <= keep_seq {
                break;
            }
            let mop = self.mopq.get(tail);
            squashed.uops.extend(mop.uops.iter().copied());
            if let Some(state) = mop.fetch.bpred_state {
                squashed.bpred_states.push(state);
            }
            self.mopq.pop_tail();
        }
        self.handed = self.mopq.len();
        squashed
    }

    /// Second half of a jeclear recovery, run after the pipeline rolled
    /// back and the squashed uops were freed: leaves speculative mode,
    /// unwinds speculative memory, rebuilds the live producer map.
    pub fn recover_finish(&mut self, id: MopId, arena: &UopArena) {
        let keep_seq = self.mopq.get(id).oracle.seq;
        self.spec_mode = false;
        self.spec_mem.rewind(keep_seq);
        self.rebuild_reg_map(arena);
    }

    /// Drops all wrong-path Mops and rewinds the hand-out pointer so the
    /// surviving true-path Mops re-execute from the shadow log
    /// (nuke/replay). Returns the squashed wrong-path state for the caller
    /// to free; call [`Oracle::flush_finish`] afterwards.
    pub fn complete_flush(&mut self) -> Squashed {
        let mut squashed = Squashed::default();
        while self.mopq.len() > 0 {
            let tail = self.mopq.index_at(self.mopq.len() - 1);
            if !self.mopq.get(tail).oracle.spec_mode {
                break;
            }
            let mop = self.mopq.get(tail);
            squashed.uops.extend(mop.uops.iter().copied());
            if let Some(state) = mop.fetch.bpred_state {
                squashed.bpred_states.push(state);
            }
            self.mopq.pop_tail();
        }
        // survivors re-fetch and re-predict, so their state caches retire too
        for offset in 0..self.mopq.len() {
            let id = self.mopq.index_at(offset);
            if let Some(state) = self.mopq.get(id).fetch.bpred_state {
                squashed.bpred_states.push(state);
            }
        }
        squashed
    }

    /// Second half of a complete flush: resets the surviving Mops' dynamic
    /// state so they flow through the pipeline again.
    pub fn flush_finish(&mut self, arena: &mut UopArena) {
        for offset in 0..self.mopq.len() {
            let id = self.mopq.index_at(offset);
            let uops = self.mopq.get(id).uops.clone();
            for uid in uops {
                arena.unlink_ideps(uid);
                arena.get_mut(uid).reset_dynamic();
            }
            let mop = self.mopq.get_mut(id);
            mop.commit.complete_index = 0;
            mop.commit.commit_index = 0;
            mop.commit.jeclear_in_flight = false;
            mop.decode.last_stage_index = 0;
            mop.fetch.bpred_state = None;
        }
        self.handed = 0;
        self.spec_mode = false;
        self.spec_mem.clear();
        self.rebuild_reg_map(arena);
    }

    fn rebuild_reg_map(&mut self, arena: &UopArena) {
        self.reg_map.clear();
        for offset in 0..self.mopq.len() {
            let id = self.mopq.index_at(offset);
            for &uid in &self.mopq.get(id).uops {
                for slot in 0..MAX_ODEPS {
                    let reg = arena.get(uid).decode.odep_name[slot];
                    if reg.is_some() {
                        let _ = self.reg_map.insert(reg.0, uid);
                    }
                }
            }
        }
    }

    /// Looks up the live in-flight producer of `reg`, if any.
    pub fn live_producer(&self, reg: Reg) -> Option<UopId> {
        self.reg_map.get(&reg.0).copied()
    }
}

impl std::fmt::Debug for Oracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Oracle")
            .field("mopq", &self.mopq)
            .field("handed", &self.handed)
            .field("spec_mode", &self.spec_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::feeder::{MemRef, Trace, TraceFeeder};
    use super::*;

    fn alu_mop(pc: u64, len: u8, out: u8) -> MopSpec {
        MopSpec {
            pc,
            npc: pc + u64::from(len),
            len,
            uops: vec![UopSpec {
                fu: crate::core::units::fu::FuClass::Ieu,
                odep: vec![out],
                ..UopSpec::default()
            }],
            ..MopSpec::default()
        }
    }

    fn setup(mops: Vec<MopSpec>) -> (Oracle, TraceFeeder, UopArena) {
        let feeder = TraceFeeder::new(
            Trace {
                repeat: 1,
                mops,
                ..Trace::default()
            },
            1,
        );
        (Oracle::new(0, 64), feeder, UopArena::new())
    }

    #[test]
    fn exec_repeats_until_consumed() {
        let (mut oracle, mut feeder, mut arena) =
            setup(vec![alu_mop(0x1000, 2, 4), alu_mop(0x1002, 3, 5)]);
        let a = oracle.exec(0x1000, &mut feeder, &mut arena).unwrap();
        let b = oracle.exec(0x1000, &mut feeder, &mut arena).unwrap();
        assert_eq!(a, b);
        oracle.consume(a);
        let c = oracle.exec(0x1002, &mut feeder, &mut arena).unwrap();
        assert_ne!(a, c);
        assert_eq!(oracle.mop(c).fetch.pc, 0x1002);
    }

    #[test]
    fn wrong_pc_enters_spec_mode_and_recovers() {
        let (mut oracle, mut feeder, mut arena) =
            setup(vec![alu_mop(0x1000, 2, 4), alu_mop(0x1002, 3, 5)]);
        let a = oracle.exec(0x1000, &mut feeder, &mut arena).unwrap();
        oracle.consume(a);
        // fetch goes down the wrong path
        let w = oracle.exec(0x9000, &mut feeder, &mut arena).unwrap();
        oracle.consume(w);
        assert!(oracle.spec_mode());
        assert!(oracle.mop(w).oracle.spec_mode);

        let squashed = oracle.recover(a);
        for uid in squashed.uops {
            arena.free_uop(uid);
        }
        oracle.recover_finish(a, &arena);
        assert!(!oracle.spec_mode());
        assert_eq!(oracle.mopq.len(), 1);
        // the true path resumes
        let c = oracle.exec(0x1002, &mut feeder, &mut arena).unwrap();
        assert!(!oracle.mop(c).oracle.spec_mode);
    }

    #[test]
    fn dataflow_links_producers() {
        let producer = alu_mop(0x1000, 2, 7);
        let mut consumer = alu_mop(0x1002, 2, 8);
        consumer.uops[0].idep = vec![7];
        let (mut oracle, mut feeder, mut arena) = setup(vec![producer, consumer]);

        let a = oracle.exec(0x1000, &mut feeder, &mut arena).unwrap();
        oracle.consume(a);
        let b = oracle.exec(0x1002, &mut feeder, &mut arena).unwrap();
        let prod_uop = oracle.mop(a).uops[0];
        let cons_uop = oracle.mop(b).uops[0];
        let recorded = arena.get(cons_uop).oracle.idep_producer[0];
        assert_eq!(recorded.map(|(p, _)| p), Some(prod_uop));
    }

    #[test]
    fn trap_drains() {
        let mut trap = alu_mop(0x1000, 2, 4);
        trap.flags.trap = true;
        let (mut oracle, mut feeder, mut arena) = setup(vec![trap, alu_mop(0x1002, 2, 5)]);
        let t = oracle.exec(0x1000, &mut feeder, &mut arena).unwrap();
        oracle.consume(t);
        assert!(oracle.is_draining());
        assert!(oracle.exec(0x1002, &mut feeder, &mut arena).is_none());

        oracle.commit(t, &mut arena, &mut feeder);
        assert!(!oracle.is_draining());
        assert!(oracle.exec(0x1002, &mut feeder, &mut arena).is_some());
    }

    #[test]
    fn spec_stores_stay_out_of_arch_memory() {
        let mut store = alu_mop(0x1000, 2, 0);
        store.flags.mem = true;
        store.flags.store = true;
        store.uops = vec![
            UopSpec {
                sta: true,
                fu: crate::core::units::fu::FuClass::Sta,
                mem_op: Some(0),
                ..UopSpec::default()
            },
            UopSpec {
                std_uop: true,
                fu: crate::core::units::fu::FuClass::Std,
                mem_op: Some(0),
                ..UopSpec::default()
            },
        ];
        store.mem = vec![MemRef {
            is_store: true,
            va: 0x5000,
            size: 1,
            bytes: vec![0xAB],
        }];
        store.pc = 0x1002;
        store.npc = 0x1004;
        let (mut oracle, mut feeder, mut arena) = setup(vec![alu_mop(0x1000, 2, 4), store]);

        // execute both Mops on the true path, then diverge back to the
        // store's PC: its decode is cached, so the wrong path re-executes
        // the store speculatively.
        let a = oracle.exec(0x1000, &mut feeder, &mut arena).unwrap();
        oracle.consume(a);
        let b = oracle.exec(0x1002, &mut feeder, &mut arena).unwrap();
        oracle.consume(b);
        let w = oracle.exec(0x1002, &mut feeder, &mut arena).unwrap();
        oracle.consume(w);
        assert!(oracle.spec_mode());
        assert!(!oracle.spec_mem.is_empty());
        let pa = v2p_translate(0, 0x5000);
        assert_eq!(oracle.spec_mem.read(pa), Some(0xAB));

        let squashed = oracle.recover(b);
        for uid in squashed.uops {
            arena.free_uop(uid);
        }
        oracle.recover_finish(b, &arena);
        assert!(oracle.spec_mem.is_empty());
        // architectural memory untouched by the wrong path
        assert_eq!(feeder.read_mem(pa), 0);
    }

    #[test]
    fn commit_reports_address_space_events() {
        let mut mop = alu_mop(0x1000, 2, 4);
        mop.asops = vec![
            AsOp::Mmap {
                asid: 0,
                va: 0x10_0000,
                len: 0x1000,
                mod_brk: false,
            },
            AsOp::Brk {
                asid: 0,
                brk: 0x30_0000,
                do_mmap: false,
            },
            AsOp::Stack {
                asid: 0,
                sp: 0x7fff_f000,
                bos: 0x8000_0000,
            },
        ];
        let (mut oracle, mut feeder, mut arena) = setup(vec![mop]);
        let a = oracle.exec(0x1000, &mut feeder, &mut arena).unwrap();
        oracle.consume(a);
        // nothing reported until retirement
        assert_eq!(feeder.mapped_bytes(0), 0);

        oracle.commit(a, &mut arena, &mut feeder);
        assert_eq!(feeder.mapped_bytes(0), 0x1000);
        assert_eq!(feeder.brk(0), Some(0x30_0000));
        assert_eq!(feeder.stack_floor(0), Some(0x7fff_f000));
    }

    #[test]
    fn complete_flush_replays_from_shadow_log() {
        let (mut oracle, mut feeder, mut arena) =
            setup(vec![alu_mop(0x1000, 2, 4), alu_mop(0x1002, 2, 5)]);
        let a = oracle.exec(0x1000, &mut feeder, &mut arena).unwrap();
        oracle.consume(a);
        let b = oracle.exec(0x1002, &mut feeder, &mut arena).unwrap();
        oracle.consume(b);
        assert_eq!(oracle.num_mops_before_feeder(), 0);

        let squashed = oracle.complete_flush();
        for uid in squashed.uops {
            arena.free_uop(uid);
        }
        oracle.flush_finish(&mut arena);
        assert_eq!(oracle.num_mops_before_feeder(), 2);
        // the same Mops come back out without touching the feeder
        let a2 = oracle.exec(0x1000, &mut feeder, &mut arena).unwrap();
        assert_eq!(a2, a);
        oracle.consume(a2);
        let b2 = oracle.exec(0x1002, &mut feeder, &mut arena).unwrap();
        assert_eq!(b2, b);
    }
}
