//! Allocate: in-order rename of decoded uops into ROB/RS/LDQ/STQ.
//!
//! Up to `alloc.width` units per cycle. Each unit (a plain uop or a fused
//! packet) checks its resources in a fixed order — ROB, LDQ, STQ, RS — and
//! stalls with a tagged reason on the first shortage. Input dependencies
//! come from the oracle's ground-truth producers: a producer still in
//! flight gets an output-dependence link, a retired one reads as the
//! architectural register file.

use crate::common::{MAX_IDEPS, NEVER};
use crate::core::Core;
use crate::core::mop::UopId;
use crate::core::pipeline::lsq::{LdqEntry, StqEntry};
use crate::core::pipeline::rob::RobEntry;
use crate::stats::AllocStall;

impl Core {
    /// One allocation cycle.
    pub fn alloc_step(&mut self) {
        let width = self.cfg.alloc.width;
        let mut allocated = 0;

        while allocated < width {
            let Some(unit) = self.uop_peek() else {
                self.stats.note_alloc_stall(AllocStall::NoUops);
                return;
            };
            let members = self.fusion_members(unit);
            let mop_id = match self.arena.get(unit).mop {
                Some(m) => m,
                None => return,
            };

            // a trap allocates only into an empty machine
            if self.cfg.alloc.drain_flush
                && self.oracle.mop(mop_id).decode.flags.trap
                && !self.rob.is_empty()
            {
                self.stats.note_alloc_stall(AllocStall::Drain);
                return;
            }

            // resource checks, in order
            if self.rob.is_full() {
                self.stats.note_alloc_stall(AllocStall::RobFull);
                return;
            }
            let needs_ldq = members.iter().any(|&u| self.arena.get(u).decode.is_load);
            if needs_ldq && self.ldq.is_full() {
                self.stats.note_alloc_stall(AllocStall::LdqFull);
                return;
            }
            let needs_stq = members.iter().any(|&u| self.arena.get(u).decode.is_sta);
            if needs_stq && self.stq.is_full() {
                self.stats.note_alloc_stall(AllocStall::StqFull);
                return;
            }
            let needs_rs = members.iter().any(|&u| self.arena.get(u).executes());
            if needs_rs && self.rs.is_full() {
                self.stats.note_alloc_stall(AllocStall::RsFull);
                return;
            }

            self.alloc_unit(mop_id, unit, &members, needs_rs);
            self.uop_consume(unit);
            allocated += 1;
        }
        self.stats.note_alloc_stall(AllocStall::Width);
    }

    /// Inserts one allocator unit into the back-end structures.
    fn alloc_unit(
        &mut self,
        mop_id: crate::core::mop::MopId,
        unit: UopId,
        members: &[UopId],
        needs_rs: bool,
    ) {
        let now = self.now;
        let seq = self.oracle.mop(mop_id).oracle.seq;

        let rob_index = self.rob.push(RobEntry {
            uop: unit,
            seq,
            mop: mop_id,
        });
        let rs_index = if needs_rs { self.rs.alloc(unit) } else { None };

        for &u in members {
            let action_id = self.new_action_id();
            {
                let uop = self.arena.get_mut(u);
                uop.exec.action_id = action_id;
                uop.timing.when_allocated = now;
                uop.alloc.rob_index = rob_index;
                uop.alloc.rs_index = rs_index;
            }
            self.stats.alloc_uops += 1;

            let d = self.arena.get(u).decode.clone();
            if d.is_nop {
                // nops complete at allocation and never execute
                let uop = self.arena.get_mut(u);
                uop.timing.when_ready = now;
                uop.timing.when_issued = now;
                uop.timing.when_exec = now;
                uop.timing.when_completed = now;
                uop.exec.oval_ready = true;
                self.note_completion();
                continue;
            }

            if d.is_load {
                let (vaddr, paddr) = {
                    let o = &self.arena.get(u).oracle;
                    (o.virt_addr, o.phys_addr)
                };
                let slot = self.ldq.push(LdqEntry {
                    uop: u,
                    seq,
                    vaddr,
                    paddr,
                    size: d.mem_size,
                    addr_valid: false,
                    hit_in_stq: false,
                    cache_issued: false,
                    store_color: self.stq.color(),
                    when_issued: NEVER,
                    action_id,
                });
                self.arena.get_mut(u).alloc.ldq_index = slot;
            }
            if d.is_sta {
                let (vaddr, paddr) = {
                    let o = &self.arena.get(u).oracle;
                    (o.virt_addr, o.phys_addr)
                };
                let next_load = Some(self.ldq.next_slot());
                let slot = self.stq.push(StqEntry {
                    sta: Some(u),
                    std: None,
                    seq,
                    vaddr,
                    paddr,
                    size: d.mem_size,
                    addr_valid: false,
                    value_valid: false,
                    next_load,
                    translation_complete: false,
                    write_complete: false,
                    drain_requested: false,
                    action_id,
                });
                self.arena.get_mut(u).alloc.stq_index = slot;
            }
            if d.is_std {
                let slot = self.stq.tail_slot();
                if let Some(slot) = slot
                    && let Some(entry) = self.stq.get_mut(slot)
                {
                    debug_assert_eq!(entry.seq, seq);
                    entry.std = Some(u);
                }
                self.arena.get_mut(u).alloc.stq_index = slot;
            }

            // execution port binding: least-loaded legal port
            let port = self.bind_port(d.fu_class);
            self.arena.get_mut(u).alloc.port_assignment = port;

            // input dependencies from the oracle's ground truth
            let mut when_ready = now;
            for slot in 0..MAX_IDEPS {
                let producer = self.arena.get(u).oracle.idep_producer[slot];
                let linked = match producer {
                    Some(p) if self.producer_in_flight(p) => {
                        self.arena.add_odep(p.0, u, slot);
                        true
                    }
                    _ => false,
                };
                let uop = self.arena.get_mut(u);
                if linked {
                    uop.exec.ival_ready[slot] = false;
                    when_ready = NEVER;
                } else {
                    uop.exec.ival_ready[slot] = true;
                    uop.timing.when_ival_ready[slot] = now;
                    uop.timing.when_itag_ready[slot] = now;
                }
            }
            self.arena.get_mut(u).timing.when_ready = when_ready;
            if when_ready != NEVER
                && let Some(p) = port
            {
                self.ready_insert(p, u);
            }

            // immediate carriers ride along, completed on the spot
            if d.has_imm {
                let flow = self.oracle.mop(mop_id).uops.clone();
                let fi = d.flow_index as usize;
                for &imm in flow.iter().skip(fi + 1).take(2) {
                    let uop = self.arena.get_mut(imm);
                    debug_assert!(uop.decode.is_imm);
                    uop.timing.when_allocated = now;
                    uop.timing.when_completed = now;
                    uop.exec.oval_ready = true;
                }
            }
        }

        // a fully allocated fused packet
        if members.len() > 1 {
            self.arena.get_mut(unit).alloc.full_fusion_allocated = true;
        }
    }

    /// Picks the least-loaded port among the legal bindings for `class`.
    fn bind_port(&mut self, class: crate::core::units::fu::FuClass) -> Option<usize> {
        let legal = &self.port_bindings[class.index()];
        let &port = legal.iter().min_by_key(|&&p| self.ports[p].loading)?;
        self.ports[port].loading += 1;
        Some(port)
    }

    /// True when the recorded producer is still the same in-flight uop and
    /// its value has not been produced and retired away.
    fn producer_in_flight(&self, p: (UopId, u64)) -> bool {
        let (id, uop_seq) = p;
        let uop = self.arena.get(id);
        uop.decode.uop_seq == uop_seq && !uop.exec.oval_ready
    }
}
