//! Decode: Mop flows move through a fixed-depth pipe, fusion is formed, and
//! branch targets are validated.
//!
//! At the configured `branch_agen_stage` the decoded target is compared
//! against the fetch-time prediction; a disagreement for an unconditional
//! or wrong-taken-predicted direct branch resteers the front-end without
//! involving the back-end (a *target resteer*). The last stage exposes uops
//! to the allocator through the `uop_available`/`uop_peek`/`uop_consume`
//! protocol; a fused packet is one allocator unit, and an immediate-carrying
//! uop advances the flow index by 3 (skipping its two carrier slots).

use std::collections::VecDeque;

use crate::core::Core;
use crate::core::mop::{MopId, UopId};

/// Decode-stage state: `pipe[0]` is the youngest stage; the last stage
/// feeds the allocator.
pub struct DecodeState {
    pipe: Vec<VecDeque<MopId>>,
    width: usize,
    branch_agen_stage: usize,
}

impl DecodeState {
    /// Builds decode state from configuration.
    pub fn new(depth: usize, width: usize, branch_agen_stage: usize) -> Self {
        let depth = depth.max(1);
        Self {
            pipe: (0..depth).map(|_| VecDeque::new()).collect(),
            width: width.max(1),
            branch_agen_stage: branch_agen_stage.min(depth - 1),
        }
    }

    /// Total Mops in the decode pipe.
    pub fn occupancy(&self) -> usize {
        self.pipe.iter().map(VecDeque::len).sum()
    }

    /// Drops everything (recovery).
    pub fn flush(&mut self) {
        for stage in &mut self.pipe {
            stage.clear();
        }
    }

    /// Drops Mops younger than `keep_seq` (target resteer), given a lookup
    /// from Mop to sequence.
    pub fn flush_younger(&mut self, mut seq_of: impl FnMut(MopId) -> u64, keep_seq: u64) {
        for stage in &mut self.pipe {
            stage.retain(|&m| seq_of(m) <= keep_seq);
        }
    }
}

impl std::fmt::Debug for DecodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecodeState({} Mops)", self.occupancy())
    }
}

impl Core {
    /// One decode cycle: advance the pipe and refill from the IQ.
    pub fn decode_step(&mut self) {
        let depth = self.decode.pipe.len();

        // advance toward the allocator, non-serpentine
        for stage in (1..depth).rev() {
            if self.decode.pipe[stage].is_empty() && !self.decode.pipe[stage - 1].is_empty() {
                let moved = std::mem::take(&mut self.decode.pipe[stage - 1]);
                self.decode.pipe[stage] = moved;
                if stage == self.decode.branch_agen_stage {
                    let mops: Vec<MopId> = self.decode.pipe[stage].iter().copied().collect();
                    for mop in mops {
                        if self.validate_branch_target(mop) {
                            // resteer flushed everything younger, stop
                            return;
                        }
                    }
                }
            }
        }

        // refill stage 0 from the IQ
        if self.decode.pipe[0].is_empty() {
            let now = self.now;
            while self.decode.pipe[0].len() < self.decode.width {
                let Some(mop_id) = self.fetch.iq.pop_front() else {
                    break;
                };
                self.oracle.mop_mut(mop_id).timing.when_decode_started = now;
                self.fuse_mop(mop_id);
                self.decode.pipe[0].push_back(mop_id);
                if self.decode.branch_agen_stage == 0 && self.validate_branch_target(mop_id) {
                    return;
                }
            }
        }
    }

    /// Compares the decoded target with the fetch-time prediction. Returns
    /// true when a resteer fired (the decode pipe was partially flushed).
    fn validate_branch_target(&mut self, mop_id: MopId) -> bool {
        let (flags, pred_npc, ft_pc, target, npc, seq) = {
            let mop = self.oracle.mop(mop_id);
            (
                mop.decode.flags,
                mop.fetch.pred_npc,
                mop.fetch.ft_pc,
                mop.decode.target_pc,
                mop.oracle.npc,
                mop.oracle.seq,
            )
        };
        if !flags.ctrl || flags.indirect || flags.ret || target == 0 {
            return false;
        }
        let predicted_taken = pred_npc != ft_pc;
        if !(flags.uncond || predicted_taken) {
            return false;
        }
        if pred_npc == target {
            return false;
        }

        // decoded target wins: resteer the front-end. Younger Mops leave
        // the decode pipe before the oracle invalidates them.
        self.decode
            .flush_younger(|m| self.oracle.mopq.get(m).oracle.seq, seq);
        let squashed = self.oracle.recover(mop_id);
        self.fetch.recover(target);
        for uid in &squashed.uops {
            self.arena.free_uop(*uid);
        }
        self.oracle.recover_finish(mop_id, &self.arena);
        for state in squashed.bpred_states {
            self.bpred.return_state_cache(state);
        }
        {
            let mop = self.oracle.mop_mut(mop_id);
            mop.fetch.pred_npc = target;
            mop.oracle.recover_inst = target != npc;
        }
        self.stats.target_resteers += 1;
        true
    }

    /// Forms fused packets in a Mop's flow per the configured fusion modes.
    fn fuse_mop(&mut self, mop_id: MopId) {
        let flow = self.oracle.mop(mop_id).uops.clone();
        let real: Vec<UopId> = flow
            .iter()
            .copied()
            .filter(|&u| !self.arena.get(u).decode.is_imm)
            .collect();

        let mut i = 0;
        while i < real.len() {
            let head = real[i];
            let d = &self.arena.get(head).decode;

            // load+op+store: the atomic read-modify-write shape
            if self.cfg.decode.fuse_load_op_store
                && d.is_load
                && d.fusable.load_op_store
                && i + 3 < real.len()
            {
                let op = real[i + 1];
                let sta = real[i + 2];
                let std = real[i + 3];
                let dop = &self.arena.get(op).decode;
                let dsta = &self.arena.get(sta).decode;
                let dstd = &self.arena.get(std).decode;
                if dop.fusable.load_op_store
                    && !dop.is_load
                    && !dop.is_sta
                    && !dop.is_std
                    && dsta.is_sta
                    && dsta.fusable.load_op_store
                    && dstd.is_std
                    && dstd.fusable.load_op_store
                {
                    self.link_fusion(&[head, op, sta, std]);
                    i += 4;
                    continue;
                }
            }

            // load+op (integer or FP by config)
            if d.is_load && (d.fusable.load_op || d.fusable.fp_load_op) && i + 1 < real.len() {
                let op = real[i + 1];
                let dop = &self.arena.get(op).decode;
                let allowed = if dop.is_fpop {
                    self.cfg.decode.fuse_fp_load_op && dop.fusable.fp_load_op
                } else {
                    self.cfg.decode.fuse_load_op && dop.fusable.load_op
                };
                if allowed && !dop.is_load && !dop.is_sta && !dop.is_std && !dop.is_nop {
                    self.link_fusion(&[head, op]);
                    i += 2;
                    continue;
                }
            }

            // sta+std
            if self.cfg.decode.fuse_sta_std && d.is_sta && d.fusable.sta_std && i + 1 < real.len()
            {
                let std = real[i + 1];
                let dstd = &self.arena.get(std).decode;
                if dstd.is_std && dstd.fusable.sta_std {
                    self.link_fusion(&[head, std]);
                    i += 2;
                    continue;
                }
            }

            i += 1;
        }
    }

    /// Links a fused packet: head first, members chained via `fusion_next`.
    fn link_fusion(&mut self, members: &[UopId]) {
        let head = members[0];
        for (i, &u) in members.iter().enumerate() {
            let uop = self.arena.get_mut(u);
            uop.decode.in_fusion = true;
            uop.decode.is_fusion_head = i == 0;
            uop.decode.fusion_head = Some(head);
            uop.decode.fusion_next = members.get(i + 1).copied();
        }
        self.arena.get_mut(head).decode.fusion_size = members.len() as u8;
        self.stats.num_fusions += 1;
    }

    /// Collects a packet's members (the uop itself when unfused).
    pub fn fusion_members(&self, head: UopId) -> Vec<UopId> {
        let mut members = vec![head];
        let mut cur = self.arena.get(head).decode.fusion_next;
        while let Some(u) = cur {
            members.push(u);
            cur = self.arena.get(u).decode.fusion_next;
        }
        members
    }

    /// True when the allocator can peek a uop this cycle.
    pub fn uop_available(&self) -> bool {
        self.uop_peek().is_some()
    }

    /// The next allocator unit: a plain uop or a fused packet's head.
    pub fn uop_peek(&self) -> Option<UopId> {
        let last = self.decode.pipe.len() - 1;
        let &mop_id = self.decode.pipe[last].front()?;
        let mop = self.oracle.mopq.get(mop_id);
        let idx = mop.decode.last_stage_index;
        if idx >= mop.decode.flow_length {
            return None;
        }
        Some(mop.uops[idx])
    }

    /// Consumes the unit returned by [`Core::uop_peek`]: the flow index
    /// advances by 1 per member, plus 2 for an immediate carrier pair.
    pub fn uop_consume(&mut self, unit: UopId) {
        let now = self.now;
        let members = self.fusion_members(unit);
        let mut advance = 0;
        for &u in &members {
            let uop = self.arena.get_mut(u);
            uop.timing.when_decoded = now;
            advance += if uop.decode.has_imm { 3 } else { 1 };
        }

        let mop_id = self.arena.get(unit).mop.unwrap_or(MopId(0));
        let finished = {
            let mop = self.oracle.mop_mut(mop_id);
            mop.decode.last_stage_index += advance;
            mop.decode.last_stage_index >= mop.decode.flow_length
        };
        if finished {
            self.oracle.mop_mut(mop_id).timing.when_decode_finished = now;
            let last = self.decode.pipe.len() - 1;
            let _ = self.decode.pipe[last].pop_front();
        }
    }
}
