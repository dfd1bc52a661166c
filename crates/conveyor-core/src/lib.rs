//! Core types and seams for the Conveyor run coordinator.
//!
//! This crate has no IO of its own: it defines the data model (runs, tasks,
//! attempts, endpoints), the wire protocol spoken to user endpoints, the port
//! traits implemented by the Postgres adapters and the worker service, and
//! the pure task-caching helpers.

pub mod bloom;
pub mod cache;
pub mod error;
pub mod model;
pub mod ports;
pub mod wire;

pub use error::{CoordinatorError, Result};

/// Lower bound for an endpoint's adaptive per-chunk execution limit.
pub const MIN_RUN_CHUNK_EXECUTION_LIMIT: i64 = 10_000;

/// Upper bound for an endpoint's adaptive per-chunk execution limit.
pub const MAX_RUN_CHUNK_EXECUTION_LIMIT: i64 = 120_000;

/// Subtracted from the chunk limit sent to the endpoint so it can yield
/// before the platform-side timer fires.
pub const RUN_CHUNK_EXECUTION_BUFFER: i64 = 5_000;

/// Ceiling on cooperative yield checkpoints per run.
pub const MAX_RUN_YIELDED_EXECUTIONS: usize = 100;

/// Serialised budget for completed tasks embedded in an execute body.
pub const TOTAL_CACHED_TASK_BYTE_LIMIT: usize = 3_500_000;

/// Bit width of the no-op task Bloom filter.
pub const NOOP_TASK_SET_SIZE: usize = 16_384;

/// Number of probe positions per key in the no-op task Bloom filter.
pub const NOOP_TASK_SET_HASHES: u32 = 6;

/// Earliest endpoint version that understands cached-task cursors, the no-op
/// Bloom filter, and the auto-yield configuration block.
pub const LAZY_LOADED_CACHED_TASKS_VERSION: &str = "2023-09-27";
