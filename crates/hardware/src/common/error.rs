//! Simulation error definitions.
//!
//! Only three things can go wrong in a way the caller must handle:
//! 1. **Configuration errors** — bad parameter strings or unsupported
//!    combinations. Terminal at init.
//! 2. **Deadlock** — a core stopped completing uops for longer than the
//!    watchdog threshold. Terminal at runtime (or force-flushed, by config).
//! 3. **Feeder errors** — the instruction feeder reported an unrecoverable
//!    problem.
//!
//! Expected per-cycle backpressure (queue full, resource busy) is *not* an
//! error; it is a stall reason recorded into a statistics distribution.

use thiserror::Error;

/// Errors surfaced by simulator construction and the master tick loop.
#[derive(Debug, Error)]
pub enum SimError {
    /// A configuration parameter string failed to parse or named an
    /// unsupported component.
    #[error("configuration error: {0}")]
    Config(String),

    /// A core made no forward progress for the configured watchdog period.
    #[error("core {core} deadlocked at cycle {cycle} (no uop completed for {threshold} cycles)")]
    Deadlock {
        /// The deadlocked core.
        core: usize,
        /// Cycle at which the watchdog fired.
        cycle: u64,
        /// Configured watchdog threshold.
        threshold: u64,
    },

    /// The feeder reported an unrecoverable condition.
    #[error("feeder error: {0}")]
    Feeder(String),

    /// Writing statistics output failed.
    #[error("stats output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;

/// Builds a [`SimError::Config`] for a malformed component option string.
///
/// Every component family parser funnels through this so diagnostics carry
/// both the offending string and the expected shape.
pub fn bad_opt(family: &str, opt: &str, expected: &str) -> SimError {
    SimError::Config(format!(
        "bad {family} options string {opt:?} (should be {expected:?})"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_carries_string() {
        let e = bad_opt("cache", "DL1:x", "DL1:sets:assoc");
        let msg = e.to_string();
        assert!(msg.contains("DL1:x"));
        assert!(msg.contains("cache"));
    }

    #[test]
    fn deadlock_display() {
        let e = SimError::Deadlock {
            core: 1,
            cycle: 5000,
            threshold: 4096,
        };
        assert!(e.to_string().contains("core 1"));
    }
}
