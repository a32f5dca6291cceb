//! Commit: in-order retirement, senior store drain, and the deadlock
//! watchdog.
//!
//! Per-cycle protocol:
//! 1. **Senior STQ drain** — up to `commit.width` committed stores issue
//!    their DL1 write and DTLB translation with fresh action ids; the STQ
//!    slot is released once both drain.
//! 2. **Retire loop** — the ROB head retires one allocator unit per slot,
//!    in program order, only when its Mop has fully executed, honoring the
//!    per-cycle branch limit and stalling while a jeclear is in flight.
//!    The predictor trains and the oracle reconciles as each Mop's last
//!    uop leaves.
//! 3. **Watchdog** — too long without any completion flags the core
//!    deadlocked.

use crate::common::Tick;
use crate::core::Core;
use crate::mem::MemorySystem;
use crate::mem::cache::{CacheRequest, FillTarget, MemCmd, Requester};
use crate::mem::translate::page_table_address;
use crate::oracle::feeder::Feeder;
use crate::stats::CommitStall;

/// Commit-stage bookkeeping.
#[derive(Debug)]
pub struct CommitState {
    /// Cycle of the most recent uop completion (watchdog reference).
    pub last_completed: Tick,
    /// The watchdog fired.
    pub deadlocked: bool,
}

impl CommitState {
    /// Fresh commit state.
    pub fn new() -> Self {
        Self {
            last_completed: 0,
            deadlocked: false,
        }
    }
}

impl Default for CommitState {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    /// One commit cycle.
    pub fn commit_step(&mut self, mem: &mut MemorySystem, feeder: &mut dyn Feeder) {
        self.senior_stq_drain(mem);
        self.retire(feeder);
        self.watchdog();
    }

    /// Issues DL1 writes and DTLB translations for committed stores.
    fn senior_stq_drain(&mut self, mem: &mut MemorySystem) {
        let now = self.now;
        let width = self.cfg.commit.width;
        let cc = mem.core_caches(self.id);
        let slots: Vec<usize> = self.stq.senior_slots().collect();
        let mut drained = 0;
        for slot in slots {
            if drained >= width {
                break;
            }
            let Some(entry) = self.stq.get(slot).copied() else {
                continue;
            };
            if entry.drain_requested {
                continue;
            }
            let pta = page_table_address(self.asid, entry.vaddr);
            if !mem.enqueuable(cc.dl1, now, entry.paddr) || !mem.enqueuable(cc.dtlb, now, pta) {
                self.stats.note_commit_stall(CommitStall::StqDrain);
                break;
            }
            // fresh action id: the original store uops are free to retire
            let aid = self.new_action_id();
            mem.enqueue(
                cc.dl1,
                CacheRequest {
                    cmd: MemCmd::Write,
                    core: self.id,
                    pc: 0,
                    paddr: entry.paddr,
                    requester: Requester::Core {
                        core: self.id,
                        target: FillTarget::StoreWrite(slot),
                        action_id: aid,
                    },
                },
            );
            mem.enqueue(
                cc.dtlb,
                CacheRequest {
                    cmd: MemCmd::Read,
                    core: self.id,
                    pc: 0,
                    paddr: pta,
                    requester: Requester::Core {
                        core: self.id,
                        target: FillTarget::StoreTranslation(slot),
                        action_id: aid,
                    },
                },
            );
            if let Some(e) = self.stq.get_mut(slot) {
                e.action_id = aid;
                e.drain_requested = true;
            }
            drained += 1;
        }
        let _ = self.stq.release_drained_seniors();
    }

    /// Retires up to `commit.width` allocator units from the ROB head.
    fn retire(&mut self, feeder: &mut dyn Feeder) {
        let now = self.now;
        let width = self.cfg.commit.width;
        let branch_limit = self.cfg.commit.branch_limit;
        let mut branches_retired = 0usize;
        let mut slots = 0usize;

        while slots < width {
            let Some(head) = self.rob.head() else {
                self.stats.note_commit_stall(CommitStall::Empty);
                return;
            };
            let mop_id = head.mop;

            if self.oracle.mop(mop_id).commit.jeclear_in_flight {
                self.stats.note_commit_stall(CommitStall::Jeclear);
                return;
            }

            // advance the Mop's complete index past finished uops
            let complete_index = {
                let flow = self.oracle.mop(mop_id).uops.clone();
                let mut ci = self.oracle.mop(mop_id).commit.complete_index;
                while ci < flow.len() {
                    let u = self.arena.get(flow[ci]);
                    let done = u.decode.is_imm || u.timing.when_completed <= now;
                    if !done {
                        break;
                    }
                    ci += 1;
                }
                self.oracle.mop_mut(mop_id).commit.complete_index = ci;
                ci
            };

            // the head unit retires once its own uops (and carriers) have
            // completed; a long flow (REP) drains incrementally and only
            // its last uop closes out the Mop
            let members = self.fusion_members(head.uop);
            let unit_end = members
                .iter()
                .map(|&u| {
                    let d = &self.arena.get(u).decode;
                    d.flow_index as usize + if d.has_imm { 3 } else { 1 }
                })
                .max()
                .unwrap_or(0);
            if complete_index < unit_end {
                let partial = self.oracle.mop(mop_id).commit.commit_index > 0;
                self.stats.note_commit_stall(if partial {
                    CommitStall::Partial
                } else {
                    CommitStall::NotReady
                });
                return;
            }

            // branch retirement limit applies at Mop granularity
            let is_branch = self.oracle.mop(mop_id).stat.num_branches > 0;
            let starting = self.oracle.mop(mop_id).commit.commit_index == 0;
            if branch_limit > 0 && is_branch && starting && branches_retired >= branch_limit {
                self.stats.note_commit_stall(CommitStall::BranchLimit);
                return;
            }

            if starting {
                self.oracle.mop_mut(mop_id).timing.when_commit_started = now;
            }

            // retire this allocator unit (a fused packet is one slot)
            let mut next_index = 0;
            for &u in &members {
                let d = self.arena.get(u).decode.clone();
                if d.is_load
                    && let Some(popped) = self.ldq.pop_head()
                {
                    debug_assert_eq!(popped.uop, u);
                }
                if d.is_std {
                    let _ = self.stq.commit_head_to_senior();
                }
                self.oracle.commit_uop(u, &self.arena);
                self.stats.commit_eff_uops += 1;
                self.stats.commit_uops += if d.has_imm { 3 } else { 1 };
                next_index = d.flow_index as usize + if d.has_imm { 3 } else { 1 };
            }
            let _ = self.rob.pop_head();
            slots += 1;

            let finished = {
                let mop = self.oracle.mop_mut(mop_id);
                mop.commit.commit_index = next_index;
                next_index >= mop.decode.flow_length
            };
            if finished {
                if is_branch {
                    branches_retired += 1;
                }
                self.retire_mop(mop_id, feeder);
            }
        }
        self.stats.note_commit_stall(CommitStall::Width);
    }

    /// Final per-Mop commit actions: predictor training, statistics, trap
    /// resteer, and oracle reconciliation.
    fn retire_mop(&mut self, mop_id: crate::core::mop::MopId, feeder: &mut dyn Feeder) {
        let now = self.now;
        let (flags, pc, ft_pc, target, npc, taken, state, pred_npc, rep_iters) = {
            let mop = self.oracle.mop_mut(mop_id);
            mop.timing.when_commit_finished = now;
            (
                mop.decode.flags,
                mop.fetch.pc,
                mop.fetch.ft_pc,
                mop.decode.target_pc,
                mop.oracle.npc,
                mop.oracle.taken_branch,
                mop.fetch.bpred_state.take(),
                mop.fetch.pred_npc,
                mop.decode.rep_iterations,
            )
        };

        if let Some(state) = state {
            self.bpred
                .update(state, flags, pc, ft_pc, target, npc, taken);
            self.bpred.return_state_cache(state);
        }

        {
            let mop = self.oracle.mop(mop_id);
            self.stats.commit_insn += 1;
            self.stats.commit_refs += mop.stat.num_refs as u64;
            self.stats.commit_loads += mop.stat.num_loads as u64;
            self.stats.commit_branches += mop.stat.num_branches as u64;
        }
        if flags.rep {
            self.stats.num_rep_insn += 1;
            self.stats.num_rep_iterations += u64::from(rep_iters);
        }

        // a trap that mispredicted its continuation resteers here: the
        // drain guarantees nothing younger is in flight to squash
        if flags.trap && pred_npc != npc {
            self.fetch.pc = npc;
            self.fetch.started = true;
        }

        self.oracle.commit(mop_id, &mut self.arena, feeder);
    }

    /// Flags the core deadlocked after too long without a completion.
    fn watchdog(&mut self) {
        let threshold = self.cfg.commit.deadlock_threshold;
        if threshold == 0 {
            return;
        }
        let idle = self.now.saturating_sub(self.commit.last_completed);
        if idle > threshold && !self.commit.deadlocked {
            self.commit.deadlocked = true;
            self.stats.deadlocked = true;
            tracing::error!(
                core = self.id,
                cycle = self.now,
                idle,
                "deadlock watchdog fired"
            );
        }
    }

    /// Records a uop completion for statistics and the watchdog.
    pub fn note_completion(&mut self) {
        self.stats.completed_uops += 1;
        self.commit.last_completed = self.now;
    }
}
