//! Postgres adapters for the Conveyor run coordinator.
//!
//! `PgRunStore` implements the transactional store behind the execute state
//! machine; `PgJobQueue` is the durable queue the worker loop drains. Both
//! are newtypes over `PgPool`. All SQL is runtime-checked (`sqlx::query`,
//! not `sqlx::query!`) because the tables are created by migrations that may
//! not exist at compile time. Follow-up enqueues happen inside the same
//! transaction as the state write, so a queue message exists iff the branch
//! committed.

mod queue;
mod sqlx_types;
mod store;

pub use queue::PgJobQueue;
pub use store::PgRunStore;
