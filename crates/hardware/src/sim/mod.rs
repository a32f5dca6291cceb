//! Top-level simulation: the `Simulator` and the master tick loop.

/// The simulator type and run loop.
pub mod simulator;

pub use simulator::Simulator;
