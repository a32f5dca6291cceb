//! Fetch: PC generation, the byte queue, predecode, and resteer plumbing.
//!
//! Fetch asks the oracle for Mops in (predicted) program order and turns
//! them into line-granularity byte-queue requests toward IL1 and ITLB. The
//! per-cycle protocol is three sub-steps:
//! 1. **pre-fetch** — issue at most one IL1 fill and one ITLB fill from the
//!    byte queue; advance the jeclear pipe, firing recovery at its tail.
//! 2. **do-fetch** — pull Mops from the oracle while they stay on the same
//!    fetch line, predicting branches and stopping with a tagged reason.
//! 3. **post-fetch** — step the instruction-side caches, drain ready Mops
//!    into the predecode pipe, advance it (non-serpentine), and spill the
//!    tail into the instruction queue.

use std::collections::VecDeque;

use crate::common::error::SimResult;
use crate::common::{ActionId, NEVER, Seq, Tick, is_page_zero};
use crate::config::FetchConfig;
use crate::core::Core;
use crate::core::mop::MopId;
use crate::mem::MemorySystem;
use crate::mem::cache::{CacheRequest, FillTarget, MemCmd, Requester};
use crate::mem::translate::{page_table_address, v2p_translate};
use crate::oracle::feeder::Feeder;
use crate::stats::FetchStall;

/// One line-sized request in the byte queue.
#[derive(Clone, Copy, Debug)]
pub struct ByteQEntry {
    /// Line address (virtual).
    pub addr: u64,
    /// When the IL1 fill was requested (`NEVER` = not yet issued).
    pub when_fetch_requested: Tick,
    /// When the IL1 fill arrived.
    pub when_fetched: Tick,
    /// When the ITLB read was requested.
    pub when_translation_requested: Tick,
    /// When the ITLB read arrived.
    pub when_translated: Tick,
    /// Outstanding Mop references to this line.
    pub refs: usize,
    /// Cancellation tag for in-flight fills.
    pub action_id: ActionId,
}

/// A fetched Mop waiting for its line(s) to arrive.
#[derive(Clone, Copy, Debug)]
struct PendingMop {
    mop: MopId,
    slot_first: usize,
    slot_last: usize,
}

/// A back-end resteer moving through the jeclear delay pipe.
#[derive(Clone, Copy, Debug)]
pub struct Jeclear {
    /// The mispredicted Mop.
    pub mop: MopId,
    /// Its oracle sequence (age comparison).
    pub seq: Seq,
    /// The corrected PC.
    pub new_pc: u64,
}

/// Fetch-stage state.
pub struct FetchState {
    /// Current fetch PC.
    pub pc: u64,
    /// First Mop seen (PC initialized from the stream).
    pub started: bool,
    byteq: Vec<Option<ByteQEntry>>,
    byteq_head: usize,
    byteq_num: usize,
    linemask: u64,
    pending: VecDeque<PendingMop>,
    predecode: Vec<Vec<MopId>>,
    /// Instruction queue between predecode and decode.
    pub iq: VecDeque<MopId>,
    iq_cap: usize,
    jeclear_pipe: Vec<Option<Jeclear>>,
}

impl FetchState {
    /// Builds fetch state from configuration.
    pub fn new(cfg: &FetchConfig) -> SimResult<Self> {
        Ok(Self {
            pc: 0,
            started: false,
            // a split instruction needs its two lines resident at once
            byteq: vec![None; cfg.byteq_size.max(2)],
            byteq_head: 0,
            byteq_num: 0,
            linemask: !(cfg.byteq_linesize.max(1) - 1),
            pending: VecDeque::new(),
            predecode: vec![Vec::new(); cfg.predecode_depth.max(1)],
            iq: VecDeque::new(),
            iq_cap: cfg.iq_size.max(1),
            jeclear_pipe: vec![None; cfg.jeclear_delay.max(1)],
        })
    }

    /// Masks an address to its fetch line.
    #[inline]
    pub fn line_of(&self, addr: u64) -> u64 {
        addr & self.linemask
    }

    /// Byte queue occupancy.
    pub fn byteq_len(&self) -> usize {
        self.byteq_num
    }

    /// IQ occupancy.
    pub fn iq_len(&self) -> usize {
        self.iq.len()
    }

    fn byteq_is_full(&self) -> bool {
        self.byteq_num == self.byteq.len()
    }

    fn byteq_tail_slot(&self) -> Option<usize> {
        if self.byteq_num == 0 {
            return None;
        }
        Some((self.byteq_head + self.byteq_num - 1) % self.byteq.len())
    }

    /// Reuses the newest entry when it already covers `line`, otherwise
    /// requests a new one. `None` means the byte queue is full.
    fn byteq_find_or_request(&mut self, line: u64, action_id: ActionId) -> Option<usize> {
        if let Some(tail) = self.byteq_tail_slot()
            && let Some(entry) = self.byteq[tail].as_mut()
            && entry.addr == line
        {
            entry.refs += 1;
            return Some(tail);
        }
        if self.byteq_is_full() {
            return None;
        }
        let slot = (self.byteq_head + self.byteq_num) % self.byteq.len();
        self.byteq[slot] = Some(ByteQEntry {
            addr: line,
            when_fetch_requested: NEVER,
            when_fetched: NEVER,
            when_translation_requested: NEVER,
            when_translated: NEVER,
            refs: 1,
            action_id,
        });
        self.byteq_num += 1;
        Some(slot)
    }

    /// Entry access by physical slot.
    pub fn byteq_get_mut(&mut self, slot: usize) -> Option<&mut ByteQEntry> {
        self.byteq[slot].as_mut()
    }

    fn byteq_entry_ready(&self, slot: usize, now: Tick) -> bool {
        self.byteq[slot]
            .as_ref()
            .is_some_and(|e| e.when_fetched <= now && e.when_translated <= now)
    }

    fn byteq_unref(&mut self, slot: usize) {
        if let Some(entry) = self.byteq[slot].as_mut() {
            entry.refs = entry.refs.saturating_sub(1);
        }
        // drained head entries pop
        while self.byteq_num > 0 {
            let head = self.byteq_head;
            if self.byteq[head].as_ref().is_some_and(|e| e.refs == 0) {
                self.byteq[head] = None;
                self.byteq_head = (self.byteq_head + 1) % self.byteq.len();
                self.byteq_num -= 1;
            } else {
                break;
            }
        }
    }

    /// Clears all fetch-side buffers (jeclear or target resteer) and resets
    /// the PC.
    pub fn recover(&mut self, new_pc: u64) {
        for slot in &mut self.byteq {
            *slot = None;
        }
        self.byteq_head = 0;
        self.byteq_num = 0;
        self.pending.clear();
        for stage in &mut self.predecode {
            stage.clear();
        }
        self.iq.clear();
        self.pc = new_pc;
    }

    /// True when a jeclear is moving through the pipe.
    pub fn jeclear_pending(&self) -> bool {
        self.jeclear_pipe.iter().any(Option::is_some)
    }
}

impl std::fmt::Debug for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchState")
            .field("pc", &format_args!("{:#x}", self.pc))
            .field("byteq", &self.byteq_num)
            .field("iq", &self.iq.len())
            .finish()
    }
}

impl Core {
    /// Fetch sub-step 1: issue cache fills and advance the jeclear pipe.
    pub fn fetch_pre(&mut self, mem: &mut MemorySystem) {
        let now = self.now;
        let cc = mem.core_caches(self.id);

        // at most one IL1 fill per cycle, oldest unissued entry first
        let byteq_len = self.fetch.byteq_len();
        let cap = self.fetch.byteq.len();
        for offset in 0..byteq_len {
            let slot = (self.fetch.byteq_head + offset) % cap;
            let Some(entry) = self.fetch.byteq[slot] else {
                continue;
            };
            if entry.when_fetch_requested != NEVER {
                continue;
            }
            let paddr = v2p_translate(self.asid, entry.addr);
            if mem.enqueuable(cc.il1, now, paddr) {
                mem.enqueue(
                    cc.il1,
                    CacheRequest {
                        cmd: MemCmd::Read,
                        core: self.id,
                        pc: entry.addr,
                        paddr,
                        requester: Requester::Core {
                            core: self.id,
                            target: FillTarget::ByteqFetch(slot),
                            action_id: entry.action_id,
                        },
                    },
                );
                if let Some(e) = self.fetch.byteq_get_mut(slot) {
                    e.when_fetch_requested = now;
                }
            }
            break;
        }

        // at most one ITLB read per cycle
        for offset in 0..byteq_len {
            let slot = (self.fetch.byteq_head + offset) % cap;
            let Some(entry) = self.fetch.byteq[slot] else {
                continue;
            };
            if entry.when_translation_requested != NEVER {
                continue;
            }
            let pta = page_table_address(self.asid, entry.addr);
            if mem.enqueuable(cc.itlb, now, pta) {
                mem.enqueue(
                    cc.itlb,
                    CacheRequest {
                        cmd: MemCmd::Read,
                        core: self.id,
                        pc: 0,
                        paddr: pta,
                        requester: Requester::Core {
                            core: self.id,
                            target: FillTarget::ByteqTranslation(slot),
                            action_id: entry.action_id,
                        },
                    },
                );
                if let Some(e) = self.fetch.byteq_get_mut(slot) {
                    e.when_translation_requested = now;
                }
            }
            break;
        }

        // jeclear pipe: the tail fires, everything else shifts toward it
        let depth = self.fetch.jeclear_pipe.len();
        let fired = self.fetch.jeclear_pipe[depth - 1].take();
        for i in (1..depth).rev() {
            self.fetch.jeclear_pipe[i] = self.fetch.jeclear_pipe[i - 1].take();
        }
        if let Some(jeclear) = fired {
            self.do_jeclear_recovery(jeclear);
        }
    }

    /// Fetch sub-step 2: pull Mops from the oracle onto the current line.
    pub fn fetch_do(&mut self, feeder: &mut dyn Feeder) {
        let now = self.now;
        let mut prev_line: Option<u64> = None;

        loop {
            // an unconsumed Mop (the trap itself, or a shadow-log replay)
            // is still served while a drain is pending
            let Some(mop_id) = self.oracle.exec(self.fetch.pc, feeder, &mut self.arena) else {
                self.stats.note_fetch_stall(if self.oracle.is_draining() {
                    FetchStall::TrapDrain
                } else {
                    FetchStall::OracleStall
                });
                break;
            };

            let (pc, len, ft_pc, npc, taken, flags, target, bogus) = {
                let mop = self.oracle.mop(mop_id);
                (
                    mop.fetch.pc,
                    mop.fetch.len,
                    mop.fetch.ft_pc,
                    mop.oracle.npc,
                    mop.oracle.taken_branch,
                    mop.decode.flags,
                    mop.decode.target_pc,
                    mop.oracle.bogus,
                )
            };
            if !self.fetch.started {
                self.fetch.pc = pc;
                self.fetch.started = true;
            }

            let line_first = self.fetch.line_of(pc);
            let line_last = self.fetch.line_of(pc + len - 1);
            if prev_line.is_some_and(|pl| pl != line_first) {
                self.stats.note_fetch_stall(FetchStall::EndOfLine);
                break;
            }

            // byte-queue entries for the lines covering first and last byte
            let aid = self.new_action_id();
            let Some(slot_first) = self.fetch.byteq_find_or_request(line_first, aid) else {
                self.stats.note_fetch_stall(FetchStall::ByteQFull);
                break;
            };
            let slot_last = if line_last == line_first {
                if let Some(e) = self.fetch.byteq_get_mut(slot_first) {
                    e.refs += 1;
                }
                slot_first
            } else {
                let aid = self.new_action_id();
                match self.fetch.byteq_find_or_request(line_last, aid) {
                    Some(slot) => slot,
                    None => {
                        self.fetch.byteq_unref(slot_first);
                        self.stats.note_fetch_stall(FetchStall::ByteQFull);
                        break;
                    }
                }
            };

            // branch prediction for control and REP Mops
            let (pred_npc, state) = if flags.ctrl || flags.rep {
                let state = self.bpred.get_state_cache();
                let target = if flags.rep { pc } else { target };
                let pred = self
                    .bpred
                    .lookup(state, flags, pc, ft_pc, target, npc, taken);
                self.bpred.spec_update(state, flags, pc, ft_pc);
                self.stats.bpred_lookups += 1;
                (pred, Some(state))
            } else {
                (ft_pc, None)
            };

            {
                let mispredicted = pred_npc != npc;
                let mop = self.oracle.mop_mut(mop_id);
                mop.fetch.pred_npc = pred_npc;
                mop.fetch.bpred_state = state;
                mop.fetch.first_byte_requested = true;
                mop.fetch.last_byte_requested = true;
                mop.timing.when_fetch_started = now;
                if mispredicted {
                    mop.oracle.recover_inst = true;
                }
            }
            if pred_npc != npc {
                // mark the resolving control uop so exec raises the jeclear
                let ctrl_uop = {
                    let mop = self.oracle.mop(mop_id);
                    mop.uops
                        .iter()
                        .copied()
                        .find(|&u| self.arena.get(u).decode.is_ctrl)
                };
                if let Some(u) = ctrl_uop {
                    self.arena.get_mut(u).oracle.recover_inst = true;
                }
            }

            self.oracle.consume(mop_id);
            self.fetch.pending.push_back(PendingMop {
                mop: mop_id,
                slot_first,
                slot_last,
            });
            self.stats.fetch_mops += 1;
            self.fetch.pc = pred_npc;

            if is_page_zero(pc) {
                self.stats.note_fetch_stall(FetchStall::PageZero);
                break;
            }
            if bogus {
                self.stats.note_fetch_stall(FetchStall::WrongPathInvalid);
                break;
            }
            if flags.rep && pred_npc == pc {
                self.stats.note_fetch_stall(FetchStall::Rep);
                break;
            }
            if pred_npc != ft_pc {
                self.stats.note_fetch_stall(FetchStall::TakenBranch);
                break;
            }
            if line_last != line_first {
                self.stats.note_fetch_stall(FetchStall::SplitInst);
                break;
            }
            prev_line = Some(line_first);
        }
    }

    /// Fetch sub-step 3: step IL1/ITLB, drain ready Mops into predecode,
    /// advance it, and spill the tail into the IQ.
    pub fn fetch_post(&mut self, mem: &mut MemorySystem) {
        let now = self.now;
        mem.step_core_insn(self.id, now);
        for event in mem.take_insn_events(self.id) {
            match event.target {
                FillTarget::ByteqFetch(slot) => {
                    if let Some(entry) = self.fetch.byteq_get_mut(slot)
                        && entry.action_id == event.action_id
                    {
                        entry.when_fetched = now;
                    }
                }
                FillTarget::ByteqTranslation(slot) => {
                    if let Some(entry) = self.fetch.byteq_get_mut(slot)
                        && entry.action_id == event.action_id
                    {
                        entry.when_translated = now;
                    }
                }
                _ => {}
            }
        }

        // predecode tail spills into the IQ
        let depth = self.fetch.predecode.len();
        while let Some(&mop) = self.fetch.predecode[depth - 1].first() {
            if self.fetch.iq.len() >= self.fetch.iq_cap {
                self.stats.note_fetch_stall(FetchStall::PredecodeFull);
                break;
            }
            let _ = self.fetch.predecode[depth - 1].remove(0);
            self.fetch.iq.push_back(mop);
        }

        // advance internal stages, non-serpentine
        for stage in (1..depth).rev() {
            if self.fetch.predecode[stage].is_empty() {
                let moved = std::mem::take(&mut self.fetch.predecode[stage - 1]);
                self.fetch.predecode[stage] = moved;
            }
        }

        // emit ready pending Mops into the predecode head, in order
        if self.fetch.predecode[0].is_empty() {
            let width = self.cfg.fetch.width;
            while self.fetch.predecode[0].len() < width {
                let Some(&front) = self.fetch.pending.front() else {
                    break;
                };
                if !self.fetch.byteq_entry_ready(front.slot_first, now)
                    || !self.fetch.byteq_entry_ready(front.slot_last, now)
                {
                    break;
                }
                let _ = self.fetch.pending.pop_front();
                self.fetch.byteq_unref(front.slot_first);
                self.fetch.byteq_unref(front.slot_last);
                self.oracle.mop_mut(front.mop).timing.when_fetched = now;
                self.fetch.predecode[0].push(front.mop);
            }
        }

        self.stats.byteq_occupancy += self.fetch.byteq_num as u64;
    }

    /// Enqueues a back-end-detected misprediction resteer. An older jeclear
    /// already in the pipe is preserved; younger ones are replaced.
    pub fn jeclear_enqueue(&mut self, mop_id: MopId, new_pc: u64) {
        let seq = self.oracle.mop(mop_id).oracle.seq;
        if self
            .fetch
            .jeclear_pipe
            .iter()
            .flatten()
            .any(|j| j.seq < seq)
        {
            return;
        }
        for slot in &mut self.fetch.jeclear_pipe {
            if slot.as_ref().is_some_and(|j| j.seq > seq) {
                *slot = None;
            }
        }
        self.fetch.jeclear_pipe[0] = Some(Jeclear {
            mop: mop_id,
            seq,
            new_pc,
        });
        self.oracle.mop_mut(mop_id).commit.jeclear_in_flight = true;
        self.stats.jeclears += 1;
    }
}
