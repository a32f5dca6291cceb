//! Builders for synthetic Mop traces.
//!
//! Each helper returns a [`MopSpec`] shaped the way the feeder's decoder
//! would shape the real instruction: flags, uop flow, register names, and
//! effective addresses. PCs and next-PCs are the caller's responsibility;
//! a valid dynamic trace chains `npc` to the next Mop's `pc`.

use oosim_core::core::mop::{FusableFlags, MopFlags};
use oosim_core::core::units::fu::FuClass;
use oosim_core::oracle::feeder::{MemRef, MopSpec, UopSpec};

/// A plain ALU Mop: one integer uop reading `src` and writing `dst`.
pub fn alu(pc: u64, len: u8, src: &[u8], dst: u8) -> MopSpec {
    MopSpec {
        pc,
        npc: pc + u64::from(len),
        len,
        uops: vec![UopSpec {
            fu: FuClass::Ieu,
            idep: src.to_vec(),
            odep: vec![dst],
            ..UopSpec::default()
        }],
        ..MopSpec::default()
    }
}

/// A long-latency integer divide writing `dst`.
pub fn idiv(pc: u64, len: u8, src: &[u8], dst: u8) -> MopSpec {
    MopSpec {
        pc,
        npc: pc + u64::from(len),
        len,
        uops: vec![UopSpec {
            fu: FuClass::Idiv,
            idep: src.to_vec(),
            odep: vec![dst],
            ..UopSpec::default()
        }],
        ..MopSpec::default()
    }
}

/// A nop Mop.
pub fn nop(pc: u64, len: u8) -> MopSpec {
    MopSpec {
        pc,
        npc: pc + u64::from(len),
        len,
        uops: vec![UopSpec {
            nop: true,
            ..UopSpec::default()
        }],
        ..MopSpec::default()
    }
}

/// A load from `va` into `dst`.
pub fn load(pc: u64, len: u8, va: u64, size: u8, dst: u8) -> MopSpec {
    MopSpec {
        pc,
        npc: pc + u64::from(len),
        len,
        flags: MopFlags {
            mem: true,
            load: true,
            ..MopFlags::default()
        },
        uops: vec![UopSpec {
            fu: FuClass::Ld,
            load: true,
            mem_op: Some(0),
            mem_size: size,
            odep: vec![dst],
            ..UopSpec::default()
        }],
        mem: vec![MemRef {
            is_store: false,
            va,
            size,
            bytes: Vec::new(),
        }],
        ..MopSpec::default()
    }
}

/// A store of `bytes` to `va`, with the data coming from register `src`.
pub fn store(pc: u64, len: u8, va: u64, size: u8, src: u8, bytes: &[u8]) -> MopSpec {
    MopSpec {
        pc,
        npc: pc + u64::from(len),
        len,
        flags: MopFlags {
            mem: true,
            store: true,
            ..MopFlags::default()
        },
        uops: vec![
            UopSpec {
                fu: FuClass::Sta,
                sta: true,
                mem_op: Some(0),
                mem_size: size,
                ..UopSpec::default()
            },
            UopSpec {
                fu: FuClass::Std,
                std_uop: true,
                mem_op: Some(0),
                mem_size: size,
                idep: vec![src],
                ..UopSpec::default()
            },
        ],
        mem: vec![MemRef {
            is_store: true,
            va,
            size,
            bytes: bytes.to_vec(),
        }],
        ..MopSpec::default()
    }
}

/// A store whose ADDRESS depends on register `addr_src` (the sta half
/// resolves only after that producer), data from `data_src`.
pub fn store_delayed_addr(
    pc: u64,
    len: u8,
    va: u64,
    size: u8,
    addr_src: u8,
    data_src: u8,
    bytes: &[u8],
) -> MopSpec {
    let mut spec = store(pc, len, va, size, data_src, bytes);
    spec.uops[0].idep = vec![addr_src];
    spec
}

/// A store whose sta and std halves are marked fusable.
pub fn fusable_store(pc: u64, len: u8, va: u64, size: u8, src: u8, bytes: &[u8]) -> MopSpec {
    let mut spec = store(pc, len, va, size, src, bytes);
    for uop in &mut spec.uops {
        uop.fusable = FusableFlags {
            sta_std: true,
            ..FusableFlags::default()
        };
    }
    spec
}

/// A load+op pair marked fusable: load from `va`, then add into `dst`.
pub fn fusable_load_op(pc: u64, len: u8, va: u64, size: u8, dst: u8) -> MopSpec {
    let fusable = FusableFlags {
        load_op: true,
        ..FusableFlags::default()
    };
    MopSpec {
        pc,
        npc: pc + u64::from(len),
        len,
        flags: MopFlags {
            mem: true,
            load: true,
            ..MopFlags::default()
        },
        uops: vec![
            UopSpec {
                fu: FuClass::Ld,
                load: true,
                mem_op: Some(0),
                mem_size: size,
                fusable,
                ..UopSpec::default()
            },
            UopSpec {
                fu: FuClass::Ieu,
                idep: vec![dst],
                odep: vec![dst],
                fusable,
                ..UopSpec::default()
            },
        ],
        mem: vec![MemRef {
            is_store: false,
            va,
            size,
            bytes: Vec::new(),
        }],
        ..MopSpec::default()
    }
}

/// A conditional branch at `pc` with direct target `target`; `taken` is the
/// architectural outcome.
pub fn cond_branch(pc: u64, len: u8, target: u64, taken: bool) -> MopSpec {
    MopSpec {
        pc,
        npc: if taken { target } else { pc + u64::from(len) },
        len,
        flags: MopFlags {
            ctrl: true,
            cond: true,
            ..MopFlags::default()
        },
        target_pc: target,
        uops: vec![UopSpec {
            fu: FuClass::Jeu,
            ctrl: true,
            ..UopSpec::default()
        }],
        ..MopSpec::default()
    }
}

/// A direct unconditional jump to `target`.
pub fn uncond_jump(pc: u64, len: u8, target: u64) -> MopSpec {
    MopSpec {
        pc,
        npc: target,
        len,
        flags: MopFlags {
            ctrl: true,
            uncond: true,
            ..MopFlags::default()
        },
        target_pc: target,
        uops: vec![UopSpec {
            fu: FuClass::Jeu,
            ctrl: true,
            ..UopSpec::default()
        }],
        ..MopSpec::default()
    }
}

/// An indirect jump whose true target is `target`.
pub fn indirect_jump(pc: u64, len: u8, target: u64) -> MopSpec {
    MopSpec {
        pc,
        npc: target,
        len,
        flags: MopFlags {
            ctrl: true,
            uncond: true,
            indirect: true,
            ..MopFlags::default()
        },
        target_pc: 0,
        uops: vec![UopSpec {
            fu: FuClass::Jeu,
            ctrl: true,
            ..UopSpec::default()
        }],
        ..MopSpec::default()
    }
}

/// A subroutine return whose true target is `target`.
pub fn ret_mop(pc: u64, len: u8, target: u64) -> MopSpec {
    MopSpec {
        pc,
        npc: target,
        len,
        flags: MopFlags {
            ctrl: true,
            uncond: true,
            indirect: true,
            ret: true,
            ..MopFlags::default()
        },
        target_pc: 0,
        uops: vec![UopSpec {
            fu: FuClass::Jeu,
            ctrl: true,
            ..UopSpec::default()
        }],
        ..MopSpec::default()
    }
}

/// A trapping Mop (syscall-shaped: drains the pipeline).
pub fn trap(pc: u64, len: u8) -> MopSpec {
    MopSpec {
        pc,
        npc: pc + u64::from(len),
        len,
        flags: MopFlags {
            trap: true,
            ..MopFlags::default()
        },
        uops: vec![UopSpec {
            fu: FuClass::Ieu,
            ..UopSpec::default()
        }],
        ..MopSpec::default()
    }
}

/// A REP MOVSB of `iterations` bytes from `src_va` to `dst_va`: one Mop
/// whose flow is `iterations` × (load, sta, std).
pub fn rep_movsb(pc: u64, len: u8, src_va: u64, dst_va: u64, iterations: u32) -> MopSpec {
    let mut uops = Vec::new();
    let mut mem = Vec::new();
    for i in 0..iterations as u64 {
        let load_ref = mem.len();
        mem.push(MemRef {
            is_store: false,
            va: src_va + i,
            size: 1,
            bytes: Vec::new(),
        });
        let store_ref = mem.len();
        mem.push(MemRef {
            is_store: true,
            va: dst_va + i,
            size: 1,
            bytes: vec![0],
        });
        uops.push(UopSpec {
            fu: FuClass::Ld,
            load: true,
            mem_op: Some(load_ref),
            mem_size: 1,
            odep: vec![31],
            ..UopSpec::default()
        });
        uops.push(UopSpec {
            fu: FuClass::Sta,
            sta: true,
            mem_op: Some(store_ref),
            mem_size: 1,
            ..UopSpec::default()
        });
        uops.push(UopSpec {
            fu: FuClass::Std,
            std_uop: true,
            mem_op: Some(store_ref),
            mem_size: 1,
            idep: vec![31],
            ..UopSpec::default()
        });
    }
    MopSpec {
        pc,
        npc: pc + u64::from(len),
        len,
        flags: MopFlags {
            mem: true,
            load: iterations > 0,
            store: iterations > 0,
            rep: true,
            ..MopFlags::default()
        },
        rep_iterations: iterations,
        uops,
        mem,
        ..MopSpec::default()
    }
}

/// Chains a straight-line block of `n` ALU Mops starting at `pc`.
pub fn alu_block(pc: u64, n: usize) -> Vec<MopSpec> {
    (0..n as u64).map(|i| alu(pc + 2 * i, 2, &[4], 4)).collect()
}
