//! Conveyor run coordinator service.
//!
//! The control loop that drives a triggered run to a terminal state: it
//! claims queue messages, calls the user's endpoint one chunk at a time,
//! interprets the response union, persists progress transactionally, and
//! re-enqueues the run until it finishes, fails, times out, or is canceled.

pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod services;
pub mod telemetry;
pub mod worker;

pub use config::CoordinatorConfig;
pub use coordinator::{ExecuteDriver, ExecuteError, ExecuteJobInput, PreprocessDriver, YieldRegistry};
pub use worker::RunWorker;
