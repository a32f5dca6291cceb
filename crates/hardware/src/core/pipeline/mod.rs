//! The per-core timing pipeline: stages and the queues between them.
//!
//! Stage logic lives in `impl Core` blocks per stage module; the shared
//! queue structures (ROB, RS, LDQ, STQ) are plain data types.

/// Allocate (rename) stage.
pub mod alloc;
/// Commit stage and watchdog.
pub mod commit;
/// Decode stage and uop fusion.
pub mod decode;
/// Execute stage (scheduling, FUs, memory pipeline).
pub mod exec;
/// Fetch stage (byte queue, predecode, jeclears).
pub mod fetch;
/// Load and store queues.
pub mod lsq;
/// Reorder buffer and reservation stations.
pub mod rob;
