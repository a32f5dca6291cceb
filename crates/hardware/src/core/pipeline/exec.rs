//! Execute: dataflow scheduling, functional units, and the memory pipeline.
//!
//! Per-cycle sub-phases, in order:
//! 1. **LDQ schedule** — loads with generated addresses run the store-queue
//!    issue check (store color walk, youngest first) and, when clear, issue
//!    to DTLB + DL1 and enter the STQ-search pipe.
//! 2. **RS schedule** — each port issues at most one ready uop per cycle to
//!    a functional unit with capacity.
//! 3. **STQ search** — loads exiting the search pipe re-scan the store
//!    queue; a full match with a known value forwards and kills the
//!    in-flight cache fill via an action-id bump.
//! 4. **ALU exec** — functional unit exits write back, wake dependents,
//!    resolve store halves, and raise jeclears for mispredicted control.
//! 5. **LD/ST exec** — data-side cache events complete loads and drain
//!    senior stores.
//!
//! Blocked loads are re-examined every cycle by phase 1, so store-half
//! completion needs no explicit wakeup walk; the `next_load` bookkeeping
//! bounds diagnostics, not correctness.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::common::{ActionId, NEVER, Seq, Tick};
use crate::core::Core;
use crate::core::mop::UopId;
use crate::core::units::fu::{Fu, NUM_FU_CLASSES};
use crate::mem::MemorySystem;
use crate::mem::cache::{CacheRequest, FillTarget, MemCmd, Requester};
use crate::mem::translate::page_table_address;

/// One waiting uop in a port's ready queue, ordered oldest-first.
#[derive(Clone, Copy, Debug)]
pub struct ReadyEntry {
    /// The uop.
    pub uop: UopId,
    /// Uop sequence for age ordering.
    pub seq: Seq,
    /// Action id captured at insert.
    pub action_id: ActionId,
}

/// One execution port: a seq-ordered ready queue plus its functional units.
pub struct Port {
    /// Ready queue, sorted by uop sequence (oldest first).
    pub ready_q: Vec<ReadyEntry>,
    /// Functional units on this port.
    pub fus: Vec<Fu>,
    /// Class → index into `fus`.
    pub fu_map: [Option<usize>; NUM_FU_CLASSES],
    /// Uops currently bound to this port (least-loaded binding metric).
    pub loading: usize,
}

impl Port {
    /// An empty port.
    pub fn new() -> Self {
        Self {
            ready_q: Vec::new(),
            fus: Vec::new(),
            fu_map: [None; NUM_FU_CLASSES],
            loading: 0,
        }
    }
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Port({} ready, {} FUs)", self.ready_q.len(), self.fus.len())
    }
}

/// A load moving through the STQ-search pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SearchEntry {
    exit: Tick,
    seq: Seq,
    slot: usize,
    action_id: ActionId,
}

impl Ord for SearchEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.exit, self.seq).cmp(&(other.exit, other.seq))
    }
}

impl PartialOrd for SearchEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Execution-stage state outside the ports.
pub struct ExecState {
    search_pipe: BinaryHeap<Reverse<SearchEntry>>,
    search_latency: u64,
}

impl ExecState {
    /// Builds exec state with the configured STQ-search latency.
    pub fn new(search_latency: u64) -> Self {
        Self {
            search_pipe: BinaryHeap::new(),
            search_latency: search_latency.max(1),
        }
    }

    /// Entries in the search pipe.
    pub fn search_occupancy(&self) -> usize {
        self.search_pipe.len()
    }

    /// Drops in-flight searches (complete flush).
    pub fn clear(&mut self) {
        self.search_pipe.clear();
    }
}

impl std::fmt::Debug for ExecState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExecState({} searching)", self.search_pipe.len())
    }
}

/// Outcome of the load issue check against older stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadCheck {
    /// No conflicting older store: go to the cache.
    Clear,
    /// The youngest older matching store has its value: forward.
    Forward,
    /// Blocked (unknown address, unknown value, or partial match).
    Stall,
}

#[inline]
fn ranges_overlap(a: u64, a_size: u8, b: u64, b_size: u8) -> bool {
    a < b + u64::from(b_size) && b < a + u64::from(a_size)
}

#[inline]
fn range_covers(store: u64, store_size: u8, load: u64, load_size: u8) -> bool {
    store <= load && store + u64::from(store_size) >= load + u64::from(load_size)
}

impl Core {
    /// One execute cycle.
    pub fn exec_step(&mut self, mem: &mut MemorySystem) {
        self.ldq_schedule(mem);
        self.rs_schedule();
        self.stq_search_step();
        self.alu_exec();
        self.ldst_exec(mem);
    }

    /// Inserts a uop into its port's ready queue, ordered by sequence.
    pub fn ready_insert(&mut self, port: usize, uop: UopId) {
        let (seq, action_id) = {
            let u = self.arena.get_mut(uop);
            u.exec.in_ready_q = true;
            (u.decode.uop_seq, u.exec.action_id)
        };
        let entry = ReadyEntry {
            uop,
            seq,
            action_id,
        };
        let q = &mut self.ports[port].ready_q;
        let pos = q.partition_point(|e| e.seq < seq);
        q.insert(pos, entry);
    }

    /// Phase 1: schedule address-ready loads from the LDQ.
    fn ldq_schedule(&mut self, mem: &mut MemorySystem) {
        let now = self.now;
        let slots: Vec<usize> = self.ldq.slots().collect();
        for slot in slots {
            let Some(entry) = self.ldq.get(slot).copied() else {
                continue;
            };
            if !entry.addr_valid || entry.when_issued != NEVER {
                continue;
            }
            match self.load_issue_check(slot) {
                LoadCheck::Stall => {}
                LoadCheck::Forward => {
                    self.exec.search_pipe.push(Reverse(SearchEntry {
                        exit: now + self.exec.search_latency,
                        seq: entry.seq,
                        slot,
                        action_id: entry.action_id,
                    }));
                    if let Some(e) = self.ldq.get_mut(slot) {
                        e.when_issued = now;
                        e.cache_issued = false;
                    }
                }
                LoadCheck::Clear => {
                    let cc = mem.core_caches(self.id);
                    let pta = page_table_address(self.asid, entry.vaddr);
                    if !mem.enqueuable(cc.dtlb, now, pta)
                        || !mem.enqueuable(cc.dl1, now, entry.paddr)
                    {
                        continue;
                    }
                    let pc = self
                        .arena
                        .get(entry.uop)
                        .mop
                        .map_or(0, |m| self.oracle.mop(m).fetch.pc);
                    mem.enqueue(
                        cc.dtlb,
                        CacheRequest {
                            cmd: MemCmd::Read,
                            core: self.id,
                            pc: 0,
                            paddr: pta,
                            requester: Requester::Core {
                                core: self.id,
                                target: FillTarget::LoadTranslation(slot),
                                action_id: entry.action_id,
                            },
                        },
                    );
                    mem.enqueue(
                        cc.dl1,
                        CacheRequest {
                            cmd: MemCmd::Read,
                            core: self.id,
                            pc,
                            paddr: entry.paddr,
                            requester: Requester::Core {
                                core: self.id,
                                target: FillTarget::LoadData(slot),
                                action_id: entry.action_id,
                            },
                        },
                    );
                    self.exec.search_pipe.push(Reverse(SearchEntry {
                        exit: now + self.exec.search_latency,
                        seq: entry.seq,
                        slot,
                        action_id: entry.action_id,
                    }));
                    if let Some(e) = self.ldq.get_mut(slot) {
                        e.when_issued = now;
                        e.cache_issued = true;
                    }
                }
            }
        }
    }

    /// The store-queue walk gating a load's issue: youngest older store
    /// first, bounded by the load's store color.
    fn load_issue_check(&mut self, slot: usize) -> LoadCheck {
        let now = self.now;
        let Some(load) = self.ldq.get(slot).copied() else {
            return LoadCheck::Stall;
        };
        let walk = self.stq.older_stores(load.store_color, load.seq);
        for s in walk {
            let Some(st) = self.stq.get(s).copied() else {
                continue;
            };
            if !st.addr_valid {
                // unknown older address: ask the dependence predictor
                let conflict = st.sta.is_some_and(|sta| {
                    let o = &self.arena.get(sta).oracle;
                    let size = self.arena.get(sta).decode.mem_size;
                    ranges_overlap(o.phys_addr, size, load.paddr, load.size)
                });
                let pc = self
                    .arena
                    .get(load.uop)
                    .mop
                    .map_or(0, |m| self.oracle.mop(m).fetch.pc);
                self.stats.memdep_lookups += 1;
                if self
                    .memdep
                    .lookup(now, pc, true, conflict, &mut self.memdep_stats)
                {
                    continue;
                }
                return LoadCheck::Stall;
            }
            if range_covers(st.paddr, st.size, load.paddr, load.size) {
                return if st.value_valid {
                    LoadCheck::Forward
                } else {
                    LoadCheck::Stall
                };
            }
            if ranges_overlap(st.paddr, st.size, load.paddr, load.size) {
                // partial match always stalls
                return LoadCheck::Stall;
            }
        }
        LoadCheck::Clear
    }

    /// Phase 2: per port, issue at most one ready uop to a functional unit.
    fn rs_schedule(&mut self) {
        let now = self.now;
        for p in 0..self.ports.len() {
            let mut i = 0;
            loop {
                let Some(entry) = self.ports[p].ready_q.get(i).copied() else {
                    break;
                };
                let uop = self.arena.get(entry.uop);
                if uop.exec.action_id != entry.action_id || !uop.exec.in_ready_q {
                    let _ = self.ports[p].ready_q.remove(i);
                    continue;
                }
                if uop.timing.when_ready > now {
                    i += 1;
                    continue;
                }
                let class = uop.decode.fu_class;
                let Some(fu_idx) = self.ports[p].fu_map[class.index()] else {
                    i += 1;
                    continue;
                };
                if self.ports[p].fus[fu_idx].can_issue(now) {
                    let seq = uop.decode.uop_seq;
                    let _ = self.ports[p].ready_q.remove(i);
                    {
                        let u = self.arena.get_mut(entry.uop);
                        u.exec.in_ready_q = false;
                        u.timing.when_issued = now;
                        u.timing.when_exec = now;
                    }
                    self.ports[p].fus[fu_idx].issue(now, entry.uop, seq, entry.action_id);
                    self.stats.issued_uops += 1;
                    break;
                }
                i += 1;
            }
        }
    }

    /// Phase 3: loads exiting the STQ-search pipe re-scan the store queue.
    fn stq_search_step(&mut self) {
        let now = self.now;
        while let Some(&Reverse(top)) = self.exec.search_pipe.peek() {
            if top.exit > now {
                break;
            }
            let _ = self.exec.search_pipe.pop();
            let Some(load) = self.ldq.get(top.slot).copied() else {
                continue;
            };
            if load.action_id != top.action_id {
                continue;
            }
            let walk = self.stq.older_stores(load.store_color, load.seq);
            let mut decided = false;
            for s in walk {
                let Some(st) = self.stq.get(s).copied() else {
                    continue;
                };
                if !st.addr_valid {
                    continue;
                }
                let covers = range_covers(st.paddr, st.size, load.paddr, load.size);
                let overlap = ranges_overlap(st.paddr, st.size, load.paddr, load.size);
                if covers && st.value_valid {
                    decided = true;
                    // forward from the youngest older matching store and
                    // squash the in-flight cache fill
                    let aid = self.new_action_id();
                    if let Some(e) = self.ldq.get_mut(top.slot) {
                        e.hit_in_stq = true;
                        e.action_id = aid;
                    }
                    self.stats.loads_forwarded += 1;
                    self.complete_load(top.slot);
                    break;
                }
                if overlap {
                    decided = true;
                    // known but unusable (value unknown, or partial match):
                    // wait, squashing the in-flight fill so a stale value
                    // never writes back
                    let aid = self.new_action_id();
                    if let Some(e) = self.ldq.get_mut(top.slot) {
                        e.action_id = aid;
                        e.when_issued = NEVER;
                        e.hit_in_stq = false;
                        e.cache_issued = false;
                    }
                    break;
                }
            }
            if !decided && !load.cache_issued {
                // the forwarding source drained away between issue and
                // search: nothing is in flight for this load, reschedule
                if let Some(e) = self.ldq.get_mut(top.slot) {
                    e.when_issued = NEVER;
                    e.hit_in_stq = false;
                }
            }
        }
    }

    /// Phase 4: drain functional unit pipelines.
    fn alu_exec(&mut self) {
        let now = self.now;
        for p in 0..self.ports.len() {
            for f in 0..self.ports[p].fus.len() {
                // discard squashed exits freely; execute one real exit
                loop {
                    let Some(entry) = self.ports[p].fus[f].pop_done(now) else {
                        break;
                    };
                    if self.arena.get(entry.uop).exec.action_id != entry.action_id {
                        continue;
                    }
                    self.fu_exit(entry.uop);
                    break;
                }
            }
        }
    }

    /// Handles one uop leaving its functional unit.
    fn fu_exit(&mut self, uop: UopId) {
        let d = self.arena.get(uop).decode.clone();

        if d.is_load {
            // address generation complete; the LDQ takes over
            if let Some(slot) = self.arena.get(uop).alloc.ldq_index
                && let Some(e) = self.ldq.get_mut(slot)
            {
                e.addr_valid = true;
            }
            return;
        }

        if d.is_sta {
            if let Some(slot) = self.arena.get(uop).alloc.stq_index {
                let (vaddr, paddr) = {
                    let o = &self.arena.get(uop).oracle;
                    (o.virt_addr, o.phys_addr)
                };
                if let Some(e) = self.stq.get_mut(slot) {
                    e.vaddr = vaddr;
                    e.paddr = paddr;
                    e.addr_valid = true;
                }
                self.store_ordering_scan(slot);
            }
            self.complete_uop(uop);
            return;
        }

        if d.is_std {
            if let Some(slot) = self.arena.get(uop).alloc.stq_index
                && let Some(e) = self.stq.get_mut(slot)
            {
                e.value_valid = true;
            }
            self.complete_uop(uop);
            return;
        }

        if d.is_ctrl {
            let mop_id = self.arena.get(uop).mop;
            if let Some(mid) = mop_id {
                let (mispredicted, in_flight, npc) = {
                    let mop = self.oracle.mop(mid);
                    (
                        mop.fetch.pred_npc != mop.oracle.npc,
                        mop.commit.jeclear_in_flight,
                        mop.oracle.npc,
                    )
                };
                if mispredicted && !in_flight {
                    self.jeclear_enqueue(mid, npc);
                }
            }
        }

        self.complete_uop(uop);
    }

    /// A resolved store address checks younger loads for ordering
    /// violations: in-flight loads replay, completed ones train the
    /// dependence predictor.
    fn store_ordering_scan(&mut self, stq_slot: usize) {
        let now = self.now;
        let Some(st) = self.stq.get(stq_slot).copied() else {
            return;
        };
        let slots: Vec<usize> = self.ldq.slots().collect();
        for slot in slots {
            let Some(load) = self.ldq.get(slot).copied() else {
                continue;
            };
            if load.seq <= st.seq
                || !ranges_overlap(st.paddr, st.size, load.paddr, load.size)
            {
                continue;
            }
            let pc = self
                .arena
                .get(load.uop)
                .mop
                .map_or(0, |m| self.oracle.mop(m).fetch.pc);
            let completed = self.arena.get(load.uop).exec.oval_ready;
            if completed {
                if !load.hit_in_stq {
                    // ordering violation observed too late to replay
                    self.memdep.update(now, pc, &mut self.memdep_stats);
                    self.stats.memdep_updates += 1;
                }
            } else if load.when_issued != NEVER && !load.hit_in_stq {
                // in flight against a conflicting store: replay
                let aid = self.new_action_id();
                if let Some(e) = self.ldq.get_mut(slot) {
                    e.action_id = aid;
                    e.when_issued = NEVER;
                    e.hit_in_stq = false;
                }
                self.arena.get_mut(load.uop).exec.num_replays += 1;
                self.stats.load_replays += 1;
                self.memdep.update(now, pc, &mut self.memdep_stats);
                self.stats.memdep_updates += 1;
            }
        }
    }

    /// Phase 5: data-side cache completions.
    fn ldst_exec(&mut self, mem: &mut MemorySystem) {
        let now = self.now;
        mem.step_core_data(self.id, now);
        for event in mem.take_data_events(self.id) {
            match event.target {
                FillTarget::LoadData(slot) => {
                    let Some(load) = self.ldq.get(slot).copied() else {
                        continue;
                    };
                    if load.action_id != event.action_id {
                        continue;
                    }
                    self.arena.get_mut(load.uop).exec.when_data_loaded = now;
                    let translated =
                        self.arena.get(load.uop).exec.when_addr_translated != NEVER;
                    let done = self.arena.get(load.uop).exec.oval_ready;
                    if translated && !load.hit_in_stq && !done {
                        self.complete_load(slot);
                    }
                }
                FillTarget::LoadTranslation(slot) => {
                    let Some(load) = self.ldq.get(slot).copied() else {
                        continue;
                    };
                    if load.action_id != event.action_id {
                        continue;
                    }
                    self.arena.get_mut(load.uop).exec.when_addr_translated = now;
                    let loaded = self.arena.get(load.uop).exec.when_data_loaded != NEVER;
                    let done = self.arena.get(load.uop).exec.oval_ready;
                    if loaded && !load.hit_in_stq && !done {
                        self.complete_load(slot);
                    }
                }
                FillTarget::StoreWrite(slot) => {
                    if let Some(e) = self.stq.get_mut(slot)
                        && e.action_id == event.action_id
                    {
                        e.write_complete = true;
                    }
                }
                FillTarget::StoreTranslation(slot) => {
                    if let Some(e) = self.stq.get_mut(slot)
                        && e.action_id == event.action_id
                    {
                        e.translation_complete = true;
                    }
                }
                FillTarget::ByteqFetch(_) | FillTarget::ByteqTranslation(_) => {}
            }
        }
        let _ = self.stq.release_drained_seniors();
    }

    /// Completes a load: writeback, dependent wakeup, resource release, and
    /// the control-load resteer for indirect jumps through memory.
    fn complete_load(&mut self, slot: usize) {
        let now = self.now;
        let Some(load) = self.ldq.get(slot).copied() else {
            return;
        };
        let uop = load.uop;
        {
            let u = self.arena.get_mut(uop);
            if u.exec.when_data_loaded == NEVER {
                u.exec.when_data_loaded = now;
            }
            u.timing.when_completed = now;
            u.timing.when_otag_ready = now;
            u.exec.oval_ready = true;
        }
        self.note_completion();

        if self.arena.get(uop).decode.is_ctrl {
            let mop_id = self.arena.get(uop).mop;
            if let Some(mid) = mop_id {
                let (mispredicted, in_flight, npc) = {
                    let mop = self.oracle.mop(mid);
                    (
                        mop.fetch.pred_npc != mop.oracle.npc,
                        mop.commit.jeclear_in_flight,
                        mop.oracle.npc,
                    )
                };
                if mispredicted && !in_flight {
                    self.jeclear_enqueue(mid, npc);
                }
            }
        }

        self.wake_dependents(uop);
        self.release_exec_resources(uop);
    }

    /// Generic writeback for a non-load uop.
    fn complete_uop(&mut self, uop: UopId) {
        let now = self.now;
        {
            let u = self.arena.get_mut(uop);
            u.timing.when_completed = now;
            u.timing.when_otag_ready = now;
            u.exec.oval_ready = true;
        }
        self.note_completion();
        self.wake_dependents(uop);
        self.release_exec_resources(uop);
    }

    /// Broadcasts a completed value to the producer's consumers; consumers
    /// whose inputs all became ready enter their port's ready queue.
    fn wake_dependents(&mut self, producer: UopId) {
        let now = self.now;
        for (consumer, op) in self.arena.odep_consumers(producer) {
            let became_ready = {
                let c = self.arena.get_mut(consumer);
                c.exec.ival_ready[op] = true;
                c.timing.when_ival_ready[op] = now;
                c.timing.when_itag_ready[op] = now;
                c.exec.ival_ready.iter().all(|&r| r)
            };
            if became_ready {
                let (allocated, issued, in_q, port) = {
                    let c = self.arena.get_mut(consumer);
                    c.timing.when_ready = now;
                    (
                        c.timing.when_allocated != NEVER,
                        c.timing.when_issued != NEVER,
                        c.exec.in_ready_q,
                        c.alloc.port_assignment,
                    )
                };
                if allocated && !issued && !in_q
                    && let Some(p) = port
                {
                    self.ready_insert(p, consumer);
                }
            }
        }
    }

    /// Returns a completed uop's RS entry (when its whole fused packet is
    /// done) and port-loading slot.
    fn release_exec_resources(&mut self, uop: UopId) {
        let (port, rs, head) = {
            let u = self.arena.get(uop);
            (
                u.alloc.port_assignment,
                u.alloc.rs_index,
                u.decode.fusion_head.unwrap_or(uop),
            )
        };
        if let Some(p) = port {
            self.ports[p].loading = self.ports[p].loading.saturating_sub(1);
            self.arena.get_mut(uop).alloc.port_assignment = None;
        }
        if let Some(rs_idx) = rs {
            let all_done = self
                .fusion_members(head)
                .iter()
                .all(|&m| !self.arena.get(m).executes() || self.arena.get(m).exec.oval_ready);
            if all_done {
                self.rs.dealloc(rs_idx);
            }
        }
    }
}
