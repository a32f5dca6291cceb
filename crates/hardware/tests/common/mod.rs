//! Shared test infrastructure.

/// Builders for Mop specs (ALU ops, loads, stores, branches, REP flows).
pub mod builder;
/// The simulation harness.
pub mod harness;

pub use builder::*;
pub use harness::TestContext;
