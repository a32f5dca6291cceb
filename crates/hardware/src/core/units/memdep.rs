//! Memory dependence prediction.
//!
//! When a load is ready to issue but an older store's address is still
//! unknown, the predictor decides whether the load may issue anyway. Getting
//! it wrong costs a replay; being conservative costs latency.
//!
//! Selected by option string:
//! - `none` — never issue past an unknown store address.
//! - `blind` — always issue (maximum speculation).
//! - `lwt:NAME:entries:reset` — load wait table: loads that have suffered an
//!   ordering violation wait, the table is cleared every `reset` cycles
//!   (Alpha 21264 style).
//! - `oracle` — consult the true addresses; issue exactly when safe.

use crate::common::Tick;
use crate::common::error::{SimResult, bad_opt};

/// The memory dependence predictor.
pub enum MemDep {
    /// Never speculate past an unknown store address.
    None,
    /// Always speculate.
    Blind,
    /// Load wait table with periodic reset.
    Lwt {
        /// Name for stats.
        name: String,
        /// Wait bits, PC-indexed.
        table: Vec<bool>,
        /// Cycles between table resets.
        reset_interval: Tick,
        /// Cycle of the last reset.
        last_reset: Tick,
    },
    /// Perfect conflict knowledge.
    Oracle,
}

/// Predictor statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemDepStats {
    /// Lookups performed.
    pub lookups: u64,
    /// Ordering-violation updates.
    pub updates: u64,
}

impl MemDep {
    /// Parses a memory dependence predictor option string.
    pub fn parse(opt: &str) -> SimResult<Self> {
        let fields: Vec<&str> = opt.split(':').collect();
        match fields.first().copied() {
            Some("none") => Ok(Self::None),
            Some("blind") => Ok(Self::Blind),
            Some("oracle") => Ok(Self::Oracle),
            Some("lwt") => {
                if fields.len() != 4 {
                    return Err(bad_opt("memdep", opt, "lwt:name:num_entries:reset_interval"));
                }
                let entries: usize = fields[2]
                    .parse()
                    .map_err(|_| bad_opt("memdep", opt, "numeric num_entries"))?;
                if entries == 0 || !entries.is_power_of_two() {
                    return Err(bad_opt("memdep", opt, "power-of-two num_entries"));
                }
                let reset_interval: Tick = fields[3]
                    .parse()
                    .map_err(|_| bad_opt("memdep", opt, "numeric reset_interval"))?;
                if reset_interval == 0 {
                    return Err(bad_opt("memdep", opt, "positive reset_interval"));
                }
                Ok(Self::Lwt {
                    name: fields[1].to_string(),
                    table: vec![false; entries],
                    reset_interval,
                    last_reset: 0,
                })
            }
            _ => Err(bad_opt("memdep", opt, "none|blind|lwt:...|oracle")),
        }
    }

    fn maybe_reset(&mut self, now: Tick) {
        if let Self::Lwt {
            table,
            reset_interval,
            last_reset,
            ..
        } = self
            && now.saturating_sub(*last_reset) >= *reset_interval
        {
            table.iter_mut().for_each(|b| *b = false);
            *last_reset = now - (now % *reset_interval);
        }
    }

    /// May a load at `pc` issue while an older store's address is unknown?
    ///
    /// `sta_unknown` is true when at least one older store address is
    /// unresolved; `oracle_conflict` is the ground truth of whether any such
    /// store actually overlaps this load (feeds the oracle variant only).
    pub fn lookup(
        &mut self,
        now: Tick,
        pc: u64,
        sta_unknown: bool,
        oracle_conflict: bool,
        stats: &mut MemDepStats,
    ) -> bool {
        stats.lookups += 1;
        self.maybe_reset(now);
        match self {
            Self::None => !sta_unknown,
            Self::Blind => true,
            Self::Lwt { table, .. } => {
                let index = (pc >> 1) as usize & (table.len() - 1);
                if table[index] { !sta_unknown } else { true }
            }
            Self::Oracle => !oracle_conflict,
        }
    }

    /// Records an ordering violation for the load at `pc`.
    pub fn update(&mut self, now: Tick, pc: u64, stats: &mut MemDepStats) {
        stats.updates += 1;
        self.maybe_reset(now);
        if let Self::Lwt { table, .. } = self {
            let index = (pc >> 1) as usize & (table.len() - 1);
            table[index] = true;
        }
    }
}

impl std::fmt::Debug for MemDep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "MemDep(none)"),
            Self::Blind => write!(f, "MemDep(blind)"),
            Self::Lwt { name, table, .. } => write!(f, "MemDep(lwt:{name}:{})", table.len()),
            Self::Oracle => write!(f, "MemDep(oracle)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blind_always_allows() {
        let mut md = MemDep::parse("blind").unwrap();
        let mut st = MemDepStats::default();
        assert!(md.lookup(0, 0x1000, true, true, &mut st));
    }

    #[test]
    fn none_blocks_on_unknown() {
        let mut md = MemDep::parse("none").unwrap();
        let mut st = MemDepStats::default();
        assert!(!md.lookup(0, 0x1000, true, false, &mut st));
        assert!(md.lookup(0, 0x1000, false, false, &mut st));
    }

    #[test]
    fn lwt_learns_and_resets() {
        let mut md = MemDep::parse("lwt:LWT:64:1000").unwrap();
        let mut st = MemDepStats::default();
        let pc = 0x40_2000;
        assert!(md.lookup(10, pc, true, true, &mut st)); // cold: speculate
        md.update(20, pc, &mut st); // violation observed
        assert!(!md.lookup(30, pc, true, false, &mut st)); // now waits
        assert!(md.lookup(1500, pc, true, false, &mut st)); // table reset
    }

    #[test]
    fn oracle_follows_truth() {
        let mut md = MemDep::parse("oracle").unwrap();
        let mut st = MemDepStats::default();
        assert!(md.lookup(0, 0, true, false, &mut st));
        assert!(!md.lookup(0, 0, true, true, &mut st));
    }

    #[test]
    fn parse_errors() {
        assert!(MemDep::parse("lwt:x:63:100").is_err());
        assert!(MemDep::parse("hybrid").is_err());
    }
}
