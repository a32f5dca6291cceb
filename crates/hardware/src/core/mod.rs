//! One out-of-order core: oracle, front-end, back-end, and predictors.
//!
//! `Core` owns every per-core structure; pipeline stages are implemented as
//! `impl Core` blocks in `pipeline::*` and communicate through the shared
//! queues here (arena indices, never references). The per-cycle ordering —
//! fetch pre/do/post, decode, alloc, exec, commit — is driven by
//! [`Core::tick`] so commit and exec observe same-cycle state from the
//! earlier stages.
//!
//! Recovery is orchestrated here: a jeclear truncates the shadow MopQ,
//! rolls the ROB/LDQ/STQ back to the branch, clears the front-end, frees
//! the squashed uops, and only then finishes oracle and predictor repair.

/// Macro-op and micro-op structures and the uop arena.
pub mod mop;
/// Pipeline stages and queues.
pub mod pipeline;
/// Execution-core units (FUs, branch prediction, memory dependence).
pub mod units;

use crate::common::error::SimResult;
use crate::common::{ActionId, Asid, Seq, Tick};
use crate::config::Config;
use crate::core::mop::UopArena;
use crate::core::pipeline::commit::CommitState;
use crate::core::pipeline::decode::DecodeState;
use crate::core::pipeline::exec::{ExecState, Port};
use crate::core::pipeline::fetch::{FetchState, Jeclear};
use crate::core::pipeline::lsq::{Ldq, Stq};
use crate::core::pipeline::rob::{Rob, Rs};
use crate::core::units::bpred::BpredUnit;
use crate::core::units::fu::{Fu, NUM_FU_CLASSES};
use crate::core::units::memdep::{MemDep, MemDepStats};
use crate::mem::MemorySystem;
use crate::oracle::Oracle;
use crate::oracle::feeder::Feeder;
use crate::stats::CoreStats;

/// One simulated core.
pub struct Core {
    /// Core index.
    pub id: usize,
    /// Address space this core executes in.
    pub asid: Asid,
    /// Per-core configuration.
    pub cfg: crate::config::CoreConfig,
    /// Current core cycle.
    pub now: Tick,
    action_counter: ActionId,
    /// Uop storage.
    pub arena: UopArena,
    /// The oracle and shadow MopQ.
    pub oracle: Oracle,
    /// Branch predictor.
    pub bpred: BpredUnit,
    /// Memory dependence predictor.
    pub memdep: MemDep,
    /// Its statistics.
    pub memdep_stats: MemDepStats,
    /// Fetch stage.
    pub fetch: FetchState,
    /// Decode stage.
    pub decode: DecodeState,
    /// Reorder buffer.
    pub rob: Rob,
    /// Reservation stations.
    pub rs: Rs,
    /// Load queue.
    pub ldq: Ldq,
    /// Store queue.
    pub stq: Stq,
    /// Execution ports.
    pub ports: Vec<Port>,
    /// Legal ports per FU class.
    pub port_bindings: Vec<Vec<usize>>,
    /// Execution-stage state.
    pub exec: ExecState,
    /// Commit-stage state.
    pub commit: CommitState,
    /// Statistics.
    pub stats: CoreStats,
}

impl Core {
    /// Builds a core from the configuration.
    pub fn new(id: usize, config: &Config) -> SimResult<Self> {
        let cfg = config.core.clone();
        let num_ports = cfg.exec.num_ports.max(1);
        let mut ports: Vec<Port> = (0..num_ports).map(|_| Port::new()).collect();
        let mut port_bindings: Vec<Vec<usize>> = vec![Vec::new(); NUM_FU_CLASSES];
        for fu_cfg in cfg.exec.fu_pool() {
            for &p in &fu_cfg.ports {
                if p >= num_ports {
                    continue;
                }
                let idx = ports[p].fus.len();
                ports[p]
                    .fus
                    .push(Fu::new(fu_cfg.class, fu_cfg.latency, fu_cfg.issue_rate));
                ports[p].fu_map[fu_cfg.class.index()] = Some(idx);
                port_bindings[fu_cfg.class.index()].push(p);
            }
        }

        Ok(Self {
            id,
            asid: 0,
            now: 0,
            action_counter: 0,
            arena: UopArena::new(),
            oracle: Oracle::new(id, cfg.oracle.mopq_size),
            bpred: BpredUnit::new(&cfg.bpred)?,
            memdep: MemDep::parse(&cfg.exec.memdep)?,
            memdep_stats: MemDepStats::default(),
            fetch: FetchState::new(&cfg.fetch)?,
            decode: DecodeState::new(
                cfg.decode.depth,
                cfg.decode.width,
                cfg.decode.branch_agen_stage,
            ),
            rob: Rob::new(cfg.commit.rob_size),
            rs: Rs::new(cfg.exec.rs_size),
            ldq: Ldq::new(cfg.exec.ldq_size),
            stq: Stq::new(cfg.exec.stq_size),
            ports,
            port_bindings,
            exec: ExecState::new(cfg.exec.stq_search_latency),
            commit: CommitState::new(),
            stats: CoreStats::default(),
            cfg,
        })
    }

    /// Returns a fresh, unique cancellation tag.
    pub fn new_action_id(&mut self) -> ActionId {
        self.action_counter += 1;
        self.action_counter
    }

    /// Advances this core one cycle. The stage order keeps commit and exec
    /// observing state fetched, decoded, and allocated this same cycle.
    pub fn tick(&mut self, now: Tick, feeder: &mut dyn Feeder, mem: &mut MemorySystem) {
        self.now = now;
        self.stats.cycles = now + 1;

        self.fetch_pre(mem);
        self.fetch_do(feeder);
        self.fetch_post(mem);
        self.decode_step();
        self.alloc_step();
        self.exec_step(mem);
        self.commit_step(mem, feeder);

        self.stats.rob_occupancy += self.rob.len() as u64;
        self.stats.rs_occupancy += self.rs.len() as u64;
        self.stats.ldq_occupancy += self.ldq.len() as u64;
        self.stats.stq_occupancy += self.stq.total() as u64;
        debug_assert!(self.check_queue_bounds());
    }

    /// True when the core has nothing left to do.
    pub fn finished(&self) -> bool {
        self.oracle.exhausted()
            && self.rob.is_empty()
            && self.oracle.mopq.is_empty()
            && self.stq.total() == 0
    }

    /// Watchdog state.
    pub fn deadlocked(&self) -> bool {
        self.commit.deadlocked
    }

    fn check_queue_bounds(&self) -> bool {
        self.rob.len() <= self.rob.capacity()
            && self.ldq.len() <= self.ldq.capacity()
            && self.stq.total() <= self.stq.capacity()
            && self.rs.len() <= self.rs.capacity()
    }

    /// A jeclear reached the front-end: recover everything younger than the
    /// mispredicted Mop and resteer.
    pub(crate) fn do_jeclear_recovery(&mut self, jeclear: Jeclear) {
        let mop_id = jeclear.mop;
        {
            // stale jeclear for an already-recovered Mop
            let Some(mop) = self.oracle.mopq.get_checked(mop_id) else {
                return;
            };
            if mop.oracle.seq != jeclear.seq {
                return;
            }
        }

        let squashed = self.oracle.recover(mop_id);
        self.rollback_to(jeclear.seq);
        self.decode.flush();
        self.fetch.recover(jeclear.new_pc);
        for &uid in &squashed.uops {
            self.arena.free_uop(uid);
        }
        self.oracle.recover_finish(mop_id, &self.arena);
        for state in squashed.bpred_states {
            self.bpred.return_state_cache(state);
        }

        let (state, taken) = {
            let mop = self.oracle.mop_mut(mop_id);
            mop.commit.jeclear_in_flight = false;
            mop.fetch.pred_npc = jeclear.new_pc;
            mop.oracle.recover_inst = false;
            (mop.fetch.bpred_state, mop.oracle.taken_branch)
        };
        if let Some(state) = state {
            self.bpred.recover(state, taken);
        }
    }

    /// Rolls the back-end queues back to `keep_seq` (the mispredicted Mop
    /// survives; everything younger leaves).
    fn rollback_to(&mut self, keep_seq: Seq) {
        while let Some(tail) = self.rob.tail() {
            if tail.seq <= keep_seq {
                break;
            }
            let _ = self.rob.pop_tail();
            for member in self.fusion_members(tail.uop) {
                let (port, rs) = {
                    let u = self.arena.get(member);
                    (u.alloc.port_assignment, u.alloc.rs_index)
                };
                if let Some(p) = port {
                    self.ports[p].loading = self.ports[p].loading.saturating_sub(1);
                }
                if let Some(rs_idx) = rs {
                    self.rs.dealloc(rs_idx);
                }
                self.arena.unlink_ideps(member);
                self.arena.get_mut(member).exec.in_ready_q = false;
            }
        }
        while self.ldq.tail_seq().is_some_and(|s| s > keep_seq) {
            let _ = self.ldq.pop_tail();
        }
        while self.stq.tail_seq().is_some_and(|s| s > keep_seq) {
            let _ = self.stq.pop_tail();
        }
    }

    /// Drops every speculative structure in the machine and re-executes the
    /// surviving true-path Mops from the shadow log (nuke recovery, also
    /// the deadlock force-flush).
    pub fn complete_flush(&mut self) {
        let squashed = self.oracle.complete_flush();

        // the whole back-end empties
        while let Some(tail) = self.rob.tail() {
            let _ = self.rob.pop_tail();
            for member in self.fusion_members(tail.uop) {
                self.arena.unlink_ideps(member);
            }
        }
        self.rs.clear();
        self.ldq.clear();
        self.stq.clear_young();
        for port in &mut self.ports {
            port.ready_q.clear();
            port.loading = 0;
            for fu in &mut port.fus {
                fu.squash_all();
            }
        }
        self.exec.clear();
        self.decode.flush();
        let resume_pc = if self.oracle.mopq.is_empty() {
            self.fetch.pc
        } else {
            self.oracle.mop(self.oracle.mopq.index_at(0)).fetch.pc
        };
        self.fetch.recover(resume_pc);

        for &uid in &squashed.uops {
            self.arena.free_uop(uid);
        }
        for state in squashed.bpred_states {
            self.bpred.return_state_cache(state);
        }
        self.oracle.flush_finish(&mut self.arena);
        self.commit.last_completed = self.now;
        self.commit.deadlocked = false;
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("id", &self.id)
            .field("now", &self.now)
            .field("rob", &self.rob)
            .field("mopq", &self.oracle.mopq)
            .finish()
    }
}
