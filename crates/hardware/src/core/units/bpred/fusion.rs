//! Fusion (meta) predictors: pick one answer from N component predictions.
//!
//! Selected by option string: `none` (singleton — first component wins),
//! `majority:NAME` (vote), `random:NAME` (uniform choice, LFSR-driven so
//! runs stay deterministic).

use crate::common::error::{SimResult, bad_opt};

/// The fusion selector.
pub enum FusionPredictor {
    /// Use the sole component's prediction.
    Singleton,
    /// Majority vote across components (ties predict taken).
    Majority {
        /// Selector name.
        name: String,
    },
    /// Pick a component uniformly at random (16-bit LFSR).
    Random {
        /// Selector name.
        name: String,
        /// LFSR state.
        lfsr: u16,
    },
}

impl FusionPredictor {
    /// Parses a fusion option string.
    pub fn parse(opt: &str) -> SimResult<Self> {
        let fields: Vec<&str> = opt.split(':').collect();
        match fields.first().copied() {
            Some("none") => Ok(Self::Singleton),
            Some("majority") => Ok(Self::Majority {
                name: fields.get(1).unwrap_or(&"majority").to_string(),
            }),
            Some("random") => Ok(Self::Random {
                name: fields.get(1).unwrap_or(&"random").to_string(),
                lfsr: 0xACE1,
            }),
            _ => Err(bad_opt("fusion", opt, "none|majority|random")),
        }
    }

    /// Selects the final direction from component predictions.
    ///
    /// Returns `(taken, chosen_component)`; the chosen index is recorded in
    /// the state cache so meta-update can train selector tables (the shipped
    /// selectors are stateless, so update is a no-op).
    pub fn lookup(&mut self, preds: &[bool]) -> (bool, usize) {
        debug_assert!(!preds.is_empty());
        match self {
            Self::Singleton => (preds[0], 0),
            Self::Majority { .. } => {
                let votes = preds.iter().filter(|&&p| p).count();
                (votes * 2 >= preds.len(), 0)
            }
            Self::Random { lfsr, .. } => {
                // Fibonacci LFSR, taps 16,14,13,11.
                let bit = (*lfsr ^ (*lfsr >> 2) ^ (*lfsr >> 3) ^ (*lfsr >> 5)) & 1;
                *lfsr = (*lfsr >> 1) | (bit << 15);
                let choice = *lfsr as usize % preds.len();
                (preds[choice], choice)
            }
        }
    }
}

impl std::fmt::Debug for FusionPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Singleton => write!(f, "FusionPredictor(none)"),
            Self::Majority { name } => write!(f, "FusionPredictor(majority:{name})"),
            Self::Random { name, .. } => write!(f, "FusionPredictor(random:{name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_takes_first() {
        let mut fusion = FusionPredictor::parse("none").unwrap();
        assert_eq!(fusion.lookup(&[true, false, false]), (true, 0));
    }

    #[test]
    fn majority_votes() {
        let mut fusion = FusionPredictor::parse("majority:meta").unwrap();
        let (taken, _) = fusion.lookup(&[true, true, false]);
        assert!(taken);
        let (taken, _) = fusion.lookup(&[false, false, true]);
        assert!(!taken);
    }

    #[test]
    fn random_is_deterministic_across_runs() {
        let mut a = FusionPredictor::parse("random").unwrap();
        let mut b = FusionPredictor::parse("random").unwrap();
        for _ in 0..64 {
            assert_eq!(a.lookup(&[true, false]), b.lookup(&[true, false]));
        }
    }
}
