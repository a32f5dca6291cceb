//! Branch prediction: a meta-predictor composing direction components, a
//! fusion selector, a BTB, an indirect target cache, and a return stack.
//!
//! Lookup returns a predicted next PC and fills a pooled *state cache* with
//! everything needed later: speculative updates happen at lookup, real
//! training happens at commit, and recovery happens when a jeclear reaches
//! the front-end. State caches live until commit or recovery releases them.

/// Branch target buffer and indirect target cache.
pub mod btb;
/// Direction predictor components.
pub mod dir;
/// Fusion (meta) selectors.
pub mod fusion;
/// Return address stack.
pub mod ras;
/// Saturating two-bit counters.
pub mod twobit;

use self::btb::{Btb, TargetCache};
use self::dir::{DirComponent, DirContext};
use self::fusion::FusionPredictor;
use self::ras::{Ras, RasCheckpoint};
use crate::common::error::SimResult;
use crate::config::BpredConfig;
use crate::core::mop::MopFlags;

/// Pooled per-lookup context. Everything the predictor needs to train or
/// unwind one prediction.
#[derive(Debug, Default, Clone)]
pub struct BpredState {
    in_use: bool,
    /// Branch PC at lookup.
    pub pc: u64,
    /// Final predicted direction.
    pub our_taken: bool,
    /// Final predicted next PC.
    pub our_npc: u64,
    /// Fall-through PC at lookup (path-independent call return address).
    pub ft_pc: u64,
    /// Per-component lookup contexts.
    pub dir_ctx: Vec<DirContext>,
    /// RAS repair checkpoint.
    pub ras_ckpt: RasCheckpoint,
    /// Indirect path-history checkpoint.
    pub ibtb_history: u64,
    /// This lookup popped the RAS.
    pub used_ras: bool,
    /// This lookup consulted the indirect target cache.
    pub used_ibtb: bool,
    /// This lookup pushed a call onto the RAS (at spec-update).
    pub pushed_ras: bool,
    /// Component chosen by the fusion selector.
    pub fusion_choice: usize,
    /// Speculative updates were applied and may need unwinding.
    pub spec_updated: bool,
    /// The branch was conditional (direction components participated).
    pub conditional: bool,
}

/// Aggregate predictor statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct BpredStats {
    /// Total lookups.
    pub lookups: u64,
    /// Direction predicted correctly.
    pub dir_hits: u64,
    /// Next PC predicted correctly.
    pub addr_hits: u64,
    /// Commit-time updates.
    pub updates: u64,
    /// Misprediction recoveries.
    pub recovers: u64,
    /// Speculative updates applied.
    pub spec_updates: u64,
}

/// The composed branch predictor for one core.
pub struct BpredUnit {
    comps: Vec<DirComponent>,
    fusion: FusionPredictor,
    btb: Btb,
    ibtb: TargetCache,
    ras: Ras,
    pool: Vec<BpredState>,
    free: Vec<usize>,
    /// Aggregate statistics.
    pub stats: BpredStats,
}

impl BpredUnit {
    /// Builds the predictor from configuration option strings.
    pub fn new(cfg: &BpredConfig) -> SimResult<Self> {
        let comps = cfg
            .components
            .iter()
            .map(|opt| DirComponent::parse(opt))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Self {
            comps,
            fusion: FusionPredictor::parse(&cfg.fusion)?,
            btb: Btb::parse(&cfg.btb)?,
            ibtb: TargetCache::parse(&cfg.ibtb)?,
            ras: Ras::parse(&cfg.ras)?,
            pool: Vec::new(),
            free: Vec::new(),
            stats: BpredStats::default(),
        })
    }

    /// Checks out a state cache from the pool.
    pub fn get_state_cache(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            self.pool[idx] = BpredState {
                in_use: true,
                ..BpredState::default()
            };
            idx
        } else {
            self.pool.push(BpredState {
                in_use: true,
                ..BpredState::default()
            });
            self.pool.len() - 1
        }
    }

    /// Returns a state cache to the pool.
    pub fn return_state_cache(&mut self, idx: usize) {
        debug_assert!(self.pool[idx].in_use);
        self.pool[idx].in_use = false;
        self.free.push(idx);
    }

    /// Number of state caches currently checked out.
    pub fn outstanding_states(&self) -> usize {
        self.pool.len() - self.free.len()
    }

    /// Predicts the next PC for a control (or REP) Mop, filling `state`.
    ///
    /// `target_pc` is the decoded direct target (the Mop's own PC for REP);
    /// `oracle_npc`/`oracle_taken` feed the perfect components only.
    #[allow(clippy::too_many_arguments)]
    pub fn lookup(
        &mut self,
        state: usize,
        flags: MopFlags,
        pc: u64,
        ft_pc: u64,
        target_pc: u64,
        oracle_npc: u64,
        oracle_taken: bool,
    ) -> u64 {
        self.stats.lookups += 1;
        let conditional = flags.cond || flags.rep;

        let mut dir_ctx = vec![DirContext::default(); self.comps.len()];
        let mut preds = Vec::with_capacity(self.comps.len());
        let (taken, fusion_choice) = if conditional {
            for (comp, ctx) in self.comps.iter_mut().zip(dir_ctx.iter_mut()) {
                preds.push(comp.lookup(pc, target_pc, oracle_taken, ctx));
            }
            self.fusion.lookup(&preds)
        } else {
            (true, 0)
        };

        let st = &mut self.pool[state];
        st.pc = pc;
        st.ft_pc = ft_pc;
        st.conditional = conditional;
        st.dir_ctx = dir_ctx;
        st.fusion_choice = fusion_choice;
        st.ras_ckpt = self.ras.checkpoint();
        st.ibtb_history = self.ibtb.history();

        let npc = if !taken {
            ft_pc
        } else if flags.ret {
            st.used_ras = true;
            self.ras.pop(oracle_npc)
        } else if flags.indirect {
            st.used_ibtb = true;
            self.ibtb
                .lookup(pc)
                .or_else(|| self.btb.lookup(pc))
                .unwrap_or(ft_pc)
        } else if flags.rep {
            // a REP iterates back onto itself
            target_pc
        } else {
            // direct targets are not decoded yet at fetch; a cold BTB falls
            // through and the decode-stage target validation resteers
            self.btb.lookup(pc).unwrap_or(ft_pc)
        };

        let st = &mut self.pool[state];
        st.our_taken = taken;
        st.our_npc = npc;
        npc
    }

    /// Applies speculative updates for a prediction just made.
    pub fn spec_update(&mut self, state: usize, flags: MopFlags, pc: u64, ft_pc: u64) {
        self.stats.spec_updates += 1;
        let (taken, used_ibtb, npc, conditional) = {
            let st = &self.pool[state];
            (st.our_taken, st.used_ibtb, st.our_npc, st.conditional)
        };
        if conditional {
            for comp in &mut self.comps {
                comp.spec_update(pc, taken);
            }
        }
        if used_ibtb {
            self.ibtb.spec_update(npc);
        }
        if flags.call {
            self.ras.push(ft_pc);
            self.pool[state].pushed_ras = true;
        }
        self.pool[state].spec_updated = true;
    }

    /// Unwinds speculative state after a misprediction of this branch, then
    /// installs the true outcome into the histories.
    pub fn recover(&mut self, state: usize, taken: bool) {
        self.stats.recovers += 1;
        let st = self.pool[state].clone();
        if st.spec_updated {
            self.ras.recover(st.ras_ckpt);
            self.ibtb.set_history(st.ibtb_history);
            if st.pushed_ras {
                // a call's return address is path-independent; re-push it
                self.ras.push(st.ft_pc);
            }
        }
        if st.conditional {
            for (comp, ctx) in self.comps.iter_mut().zip(st.dir_ctx.iter()) {
                comp.recover(st.pc, ctx, taken);
            }
        }
    }

    /// Commit-time training with the true outcome. Does not release the
    /// state cache; the caller returns it separately.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        state: usize,
        flags: MopFlags,
        pc: u64,
        _ft_pc: u64,
        target_pc: u64,
        oracle_npc: u64,
        taken: bool,
    ) {
        self.stats.updates += 1;
        let st = self.pool[state].clone();
        if st.conditional {
            for (comp, ctx) in self.comps.iter_mut().zip(st.dir_ctx.iter()) {
                comp.update(ctx, taken);
            }
        }
        if taken && (flags.ctrl || flags.rep) {
            let true_target = if flags.indirect || flags.ret {
                oracle_npc
            } else if target_pc != 0 {
                target_pc
            } else {
                oracle_npc
            };
            self.btb.update(pc, true_target);
            if flags.indirect && !flags.ret {
                self.ibtb.update(pc, oracle_npc);
            }
        }
        if st.our_taken == taken {
            self.stats.dir_hits += 1;
        }
        if st.our_npc == oracle_npc {
            self.stats.addr_hits += 1;
        }
    }

    /// The prediction recorded in a state cache.
    pub fn predicted_npc(&self, state: usize) -> u64 {
        self.pool[state].our_npc
    }
}

impl std::fmt::Debug for BpredUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpredUnit")
            .field("components", &self.comps.len())
            .field("outstanding_states", &self.outstanding_states())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> BpredUnit {
        BpredUnit::new(&BpredConfig::default()).unwrap()
    }

    fn cond_flags() -> MopFlags {
        MopFlags {
            ctrl: true,
            cond: true,
            ..MopFlags::default()
        }
    }

    #[test]
    fn state_pool_recycles() {
        let mut bp = unit();
        let a = bp.get_state_cache();
        let b = bp.get_state_cache();
        assert_eq!(bp.outstanding_states(), 2);
        bp.return_state_cache(a);
        let c = bp.get_state_cache();
        assert_eq!(c, a);
        bp.return_state_cache(b);
        bp.return_state_cache(c);
        assert_eq!(bp.outstanding_states(), 0);
    }

    #[test]
    fn conditional_learns_direction() {
        let mut bp = unit();
        let pc = 0x40_1000;
        let flags = cond_flags();
        // train taken several times
        for _ in 0..4 {
            let st = bp.get_state_cache();
            let _ = bp.lookup(st, flags, pc, pc + 2, pc + 0x40, pc + 0x40, true);
            bp.spec_update(st, flags, pc, pc + 2);
            bp.update(st, flags, pc, pc + 2, pc + 0x40, pc + 0x40, true);
            bp.return_state_cache(st);
        }
        let st = bp.get_state_cache();
        let npc = bp.lookup(st, flags, pc, pc + 2, pc + 0x40, pc + 0x40, true);
        assert_eq!(npc, pc + 0x40);
        bp.return_state_cache(st);
    }

    #[test]
    fn return_uses_ras() {
        let mut bp = unit();
        let call = MopFlags {
            ctrl: true,
            uncond: true,
            call: true,
            ..MopFlags::default()
        };
        let ret = MopFlags {
            ctrl: true,
            uncond: true,
            indirect: true,
            ret: true,
            ..MopFlags::default()
        };
        let st = bp.get_state_cache();
        let _ = bp.lookup(st, call, 0x1000, 0x1005, 0x9000, 0x9000, true);
        bp.spec_update(st, call, 0x1000, 0x1005);
        bp.return_state_cache(st);

        let st = bp.get_state_cache();
        let npc = bp.lookup(st, ret, 0x9040, 0x9041, 0, 0x1005, true);
        assert_eq!(npc, 0x1005);
        bp.return_state_cache(st);
    }

    #[test]
    fn recover_restores_ras() {
        let mut bp = unit();
        let call = MopFlags {
            ctrl: true,
            uncond: true,
            call: true,
            ..MopFlags::default()
        };
        // real call on the good path
        let st = bp.get_state_cache();
        let _ = bp.lookup(st, call, 0x1000, 0x1005, 0x9000, 0x9000, true);
        bp.spec_update(st, call, 0x1000, 0x1005);
        bp.return_state_cache(st);

        // wrong-path lookup corrupts nothing after recovery
        let cond = cond_flags();
        let st = bp.get_state_cache();
        let _ = bp.lookup(st, cond, 0x2000, 0x2002, 0x3000, 0x2002, false);
        bp.spec_update(st, cond, 0x2000, 0x2002);
        bp.recover(st, false);
        bp.return_state_cache(st);

        let ret = MopFlags {
            ctrl: true,
            uncond: true,
            indirect: true,
            ret: true,
            ..MopFlags::default()
        };
        let st = bp.get_state_cache();
        let npc = bp.lookup(st, ret, 0x9040, 0x9041, 0, 0x1005, true);
        assert_eq!(npc, 0x1005);
        bp.return_state_cache(st);
    }
}
