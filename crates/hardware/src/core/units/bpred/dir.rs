//! Direction predictor components.
//!
//! Each component predicts taken/not-taken for a conditional branch. The
//! meta-predictor queries every component, the fusion selector picks the
//! final answer, and at commit every component trains on the true outcome.
//!
//! Components are selected by option string:
//! - `bimod:NAME:size` — PC-indexed two-bit counters.
//! - `2lev:NAME:l1size:l2size:hist:xor` — two-level adaptive (per-PC history
//!   registers indexing a pattern table; `xor=1` hashes PC into the index,
//!   which with `l1size=1` degenerates to gshare).
//! - `gshare:NAME:size:hist` — global history XOR PC.
//! - `taken:NAME` — static taken.
//! - `btfnt:NAME` — static backward-taken/forward-not-taken.
//! - `perfect:NAME` — oracle direction.

use serde::Deserialize;

use super::twobit::TwoBit;
use crate::common::error::{SimResult, bad_opt};

/// Per-lookup context a component saves for later update/recovery.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirContext {
    /// Component's prediction at lookup.
    pub pred: bool,
    /// Table index used at lookup.
    pub index: usize,
    /// History register checkpoint for recovery.
    pub history: u64,
}

/// A direction predictor component (enum wrapper for static dispatch).
pub enum DirComponent {
    /// PC-indexed bimodal table.
    Bimod {
        /// Component name (stats identification).
        name: String,
        /// Two-bit counter table.
        table: Vec<TwoBit>,
    },
    /// Two-level adaptive predictor.
    TwoLev {
        /// Component name.
        name: String,
        /// First-level per-PC history registers.
        l1: Vec<u64>,
        /// Second-level pattern history table.
        l2: Vec<TwoBit>,
        /// History length in bits.
        hist: u32,
        /// XOR the PC into the second-level index.
        xor: bool,
    },
    /// Global-history-XOR-PC predictor.
    GShare {
        /// Component name.
        name: String,
        /// Global history register.
        ghr: u64,
        /// Pattern history table.
        pht: Vec<TwoBit>,
        /// History length in bits.
        hist: u32,
    },
    /// Always predict taken.
    Taken {
        /// Component name.
        name: String,
    },
    /// Backward taken, forward not-taken.
    Btfnt {
        /// Component name.
        name: String,
    },
    /// Oracle direction (upper bound studies).
    Perfect {
        /// Component name.
        name: String,
    },
}

fn parse_pow2(family: &str, opt: &str, field: &str, value: &str) -> SimResult<usize> {
    let n: usize = value
        .parse()
        .map_err(|_| bad_opt(family, opt, &format!("numeric {field}")))?;
    if n == 0 || !n.is_power_of_two() {
        return Err(bad_opt(family, opt, &format!("power-of-two {field}")));
    }
    Ok(n)
}

impl DirComponent {
    /// Parses a component option string.
    pub fn parse(opt: &str) -> SimResult<Self> {
        let fields: Vec<&str> = opt.split(':').collect();
        match fields.first().copied() {
            Some("bimod") => {
                if fields.len() != 3 {
                    return Err(bad_opt("bpred", opt, "bimod:name:size"));
                }
                let size = parse_pow2("bpred", opt, "size", fields[2])?;
                Ok(Self::Bimod {
                    name: fields[1].to_string(),
                    table: vec![TwoBit::default(); size],
                })
            }
            Some("2lev") => {
                if fields.len() != 6 {
                    return Err(bad_opt("bpred", opt, "2lev:name:l1size:l2size:hist:xor"));
                }
                let l1size = parse_pow2("bpred", opt, "l1size", fields[2])?;
                let l2size = parse_pow2("bpred", opt, "l2size", fields[3])?;
                let hist: u32 = fields[4]
                    .parse()
                    .map_err(|_| bad_opt("bpred", opt, "numeric hist"))?;
                if hist == 0 || hist > 63 {
                    return Err(bad_opt("bpred", opt, "hist in 1..=63"));
                }
                let xor = fields[5] == "1";
                Ok(Self::TwoLev {
                    name: fields[1].to_string(),
                    l1: vec![0; l1size],
                    l2: vec![TwoBit::default(); l2size],
                    hist,
                    xor,
                })
            }
            Some("gshare") => {
                if fields.len() != 4 {
                    return Err(bad_opt("bpred", opt, "gshare:name:size:hist"));
                }
                let size = parse_pow2("bpred", opt, "size", fields[2])?;
                let hist: u32 = fields[3]
                    .parse()
                    .map_err(|_| bad_opt("bpred", opt, "numeric hist"))?;
                Ok(Self::GShare {
                    name: fields[1].to_string(),
                    ghr: 0,
                    pht: vec![TwoBit::default(); size],
                    hist,
                })
            }
            Some("taken") => Ok(Self::Taken {
                name: fields.get(1).unwrap_or(&"taken").to_string(),
            }),
            Some("btfnt") => Ok(Self::Btfnt {
                name: fields.get(1).unwrap_or(&"btfnt").to_string(),
            }),
            Some("perfect") => Ok(Self::Perfect {
                name: fields.get(1).unwrap_or(&"perfect").to_string(),
            }),
            _ => Err(bad_opt(
                "bpred",
                opt,
                "bimod|2lev|gshare|taken|btfnt|perfect",
            )),
        }
    }

    /// Component name for statistics.
    pub fn name(&self) -> &str {
        match self {
            Self::Bimod { name, .. }
            | Self::TwoLev { name, .. }
            | Self::GShare { name, .. }
            | Self::Taken { name }
            | Self::Btfnt { name }
            | Self::Perfect { name } => name,
        }
    }

    /// Looks up a direction prediction, filling `ctx` for later update.
    pub fn lookup(
        &mut self,
        pc: u64,
        target_pc: u64,
        oracle_taken: bool,
        ctx: &mut DirContext,
    ) -> bool {
        let pred = match self {
            Self::Bimod { table, .. } => {
                let index = (pc >> 1) as usize & (table.len() - 1);
                ctx.index = index;
                table[index].taken()
            }
            Self::TwoLev {
                l1, l2, hist, xor, ..
            } => {
                let l1_index = (pc >> 1) as usize & (l1.len() - 1);
                let history = l1[l1_index] & ((1 << *hist) - 1);
                let raw = if *xor {
                    history ^ (pc >> 1)
                } else {
                    history | ((pc >> 1) << *hist)
                };
                let index = raw as usize & (l2.len() - 1);
                ctx.index = index;
                ctx.history = l1[l1_index];
                l2[index].taken()
            }
            Self::GShare { ghr, pht, hist, .. } => {
                let masked = *ghr & ((1 << *hist) - 1);
                let index = (masked ^ (pc >> 1)) as usize & (pht.len() - 1);
                ctx.index = index;
                ctx.history = *ghr;
                pht[index].taken()
            }
            Self::Taken { .. } => true,
            Self::Btfnt { .. } => target_pc <= pc,
            Self::Perfect { .. } => oracle_taken,
        };
        ctx.pred = pred;
        pred
    }

    /// Speculatively shifts the prediction into the history register.
    pub fn spec_update(&mut self, pc: u64, pred_taken: bool) {
        match self {
            Self::TwoLev { l1, .. } => {
                let l1_index = (pc >> 1) as usize & (l1.len() - 1);
                l1[l1_index] = (l1[l1_index] << 1) | u64::from(pred_taken);
            }
            Self::GShare { ghr, .. } => {
                *ghr = (*ghr << 1) | u64::from(pred_taken);
            }
            _ => {}
        }
    }

    /// Restores the history checkpoint after a misprediction, then shifts the
    /// actual outcome in.
    pub fn recover(&mut self, pc: u64, ctx: &DirContext, taken: bool) {
        match self {
            Self::TwoLev { l1, .. } => {
                let l1_index = (pc >> 1) as usize & (l1.len() - 1);
                l1[l1_index] = (ctx.history << 1) | u64::from(taken);
            }
            Self::GShare { ghr, .. } => {
                *ghr = (ctx.history << 1) | u64::from(taken);
            }
            _ => {}
        }
    }

    /// Commit-time training on the true outcome.
    pub fn update(&mut self, ctx: &DirContext, taken: bool) {
        match self {
            Self::Bimod { table, .. } => {
                table[ctx.index] = table[ctx.index].update(taken);
            }
            Self::TwoLev { l2, .. } => {
                l2[ctx.index] = l2[ctx.index].update(taken);
            }
            Self::GShare { pht, .. } => {
                pht[ctx.index] = pht[ctx.index].update(taken);
            }
            Self::Taken { .. } | Self::Btfnt { .. } | Self::Perfect { .. } => {}
        }
    }
}

impl std::fmt::Debug for DirComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DirComponent({})", self.name())
    }
}

/// Kinds parsed from option strings; used by tests and config validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirKind {
    /// Bimodal.
    Bimod,
    /// Two-level adaptive.
    TwoLev,
    /// GShare.
    GShare,
    /// Static taken.
    Taken,
    /// Backward-taken/forward-not-taken.
    Btfnt,
    /// Oracle.
    Perfect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_garbage() {
        assert!(DirComponent::parse("nonsense:x").is_err());
        assert!(DirComponent::parse("bimod:b:100").is_err()); // not pow2
        assert!(DirComponent::parse("2lev:g:1:16384:0:1").is_err()); // zero hist
    }

    #[test]
    fn bimodal_learns_taken() {
        let mut bp = DirComponent::parse("bimod:b:1024").unwrap();
        let mut ctx = DirContext::default();
        let pc = 0x4000_1000;
        assert!(!bp.lookup(pc, 0, true, &mut ctx));
        bp.update(&ctx, true);
        bp.update(&ctx, true);
        assert!(bp.lookup(pc, 0, true, &mut ctx));
    }

    #[test]
    fn gshare_recover_restores_history() {
        let mut bp = DirComponent::parse("gshare:g:4096:12").unwrap();
        let mut ctx = DirContext::default();
        let _ = bp.lookup(0x1000, 0, false, &mut ctx);
        bp.spec_update(0x1000, true); // wrong-path speculation
        bp.recover(0x1000, &ctx, false);
        if let DirComponent::GShare { ghr, .. } = &bp {
            assert_eq!(*ghr, ctx.history << 1);
        }
    }

    #[test]
    fn btfnt_direction() {
        let mut bp = DirComponent::parse("btfnt").unwrap();
        let mut ctx = DirContext::default();
        assert!(bp.lookup(0x2000, 0x1000, false, &mut ctx)); // backward
        assert!(!bp.lookup(0x2000, 0x3000, false, &mut ctx)); // forward
    }
}
