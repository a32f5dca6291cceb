//! # Timing-Model Testing Library
//!
//! Entry point for the integration suite. It organizes:
//! - **common**: the scripted-trace harness and Mop builders shared by all
//!   tests.
//! - **unit**: scenario, invariant, and property tests over whole-machine
//!   runs.

/// Shared test infrastructure: trace builders and the simulation harness.
pub mod common;

/// Behavior tests for the timing model.
pub mod unit;
