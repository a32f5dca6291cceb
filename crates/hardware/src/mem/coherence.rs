//! Pluggable per-cache coherence controllers.
//!
//! The controller decides what counts as an array hit and charges sharing
//! penalties. `none` sends every miss unconditionally upstream with no extra
//! accounting. `const` tracks the last producing core per line and charges a
//! fixed penalty when a different core consumes it, accounting shared versus
//! private traffic on the way.

use crate::common::error::{SimResult, bad_opt};

/// Opaque per-line coherence data: the last producing core plus one
/// (zero means untouched).
pub type LineCoh = u8;

/// The coherence controller attached to one cache.
pub enum CoherenceController {
    /// No coherence modeling.
    None,
    /// Constant sharing-penalty controller.
    Const {
        /// Extra cycles charged when the consuming core differs from the
        /// last producer.
        sharing_penalty: u64,
        /// Upstream requests for lines last produced by another core.
        shared_requests: u64,
        /// Upstream requests for private lines.
        private_requests: u64,
    },
}

impl CoherenceController {
    /// Parses a controller option string: `none` or `const<penalty>`.
    pub fn parse(opt: &str) -> SimResult<Self> {
        if opt == "none" {
            return Ok(Self::None);
        }
        if let Some(rest) = opt.strip_prefix("const") {
            let sharing_penalty: u64 = rest
                .parse()
                .map_err(|_| bad_opt("coherence", opt, "none or const<penalty>"))?;
            return Ok(Self::Const {
                sharing_penalty,
                shared_requests: 0,
                private_requests: 0,
            });
        }
        Err(bad_opt("coherence", opt, "none or const<penalty>"))
    }

    /// Extra latency for a hit by `core` on a line with coherence data
    /// `coh`; updates the line's producer on writes.
    pub fn hit_penalty(&mut self, coh: &mut LineCoh, core: usize, is_write: bool) -> u64 {
        match self {
            Self::None => 0,
            Self::Const {
                sharing_penalty, ..
            } => {
                let owner = *coh;
                let me = (core as u8) + 1;
                let penalty = if owner != 0 && owner != me {
                    *sharing_penalty
                } else {
                    0
                };
                if is_write || owner == 0 {
                    *coh = me;
                }
                penalty
            }
        }
    }

    /// Accounts an upstream (miss) request by `core` for a line whose
    /// previous producer is `coh`.
    pub fn note_upstream(&mut self, coh: LineCoh, core: usize) {
        if let Self::Const {
            shared_requests,
            private_requests,
            ..
        } = self
        {
            let me = (core as u8) + 1;
            if coh != 0 && coh != me {
                *shared_requests += 1;
            } else {
                *private_requests += 1;
            }
        }
    }
}

impl std::fmt::Debug for CoherenceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "CoherenceController(none)"),
            Self::Const {
                sharing_penalty, ..
            } => write!(f, "CoherenceController(const{sharing_penalty})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_charges() {
        let mut cc = CoherenceController::parse("none").unwrap();
        let mut coh = 0;
        assert_eq!(cc.hit_penalty(&mut coh, 1, true), 0);
        assert_eq!(coh, 0);
    }

    #[test]
    fn const_charges_cross_core_consumers() {
        let mut cc = CoherenceController::parse("const16").unwrap();
        let mut coh = 0;
        assert_eq!(cc.hit_penalty(&mut coh, 0, true), 0); // first producer
        assert_eq!(coh, 1);
        assert_eq!(cc.hit_penalty(&mut coh, 1, false), 16); // other core reads
        assert_eq!(cc.hit_penalty(&mut coh, 0, false), 0); // producer reads free
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(CoherenceController::parse("mesi").is_err());
        assert!(CoherenceController::parse("constX").is_err());
    }
}
