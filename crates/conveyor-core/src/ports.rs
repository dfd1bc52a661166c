//! Port traits the coordinator drives its collaborators through: the
//! transactional run store, the durable job queue, the endpoint HTTP client,
//! the connection-auth resolver, the task-completion service, and the
//! telemetry sink.
//!
//! Store methods described by the state machine as "within one transaction"
//! are single calls here; their follow-up enqueues are written to the durable
//! queue inside that same transaction, so a queue message exists iff the
//! branch committed.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    ConnectionAuth, Endpoint, RunAggregate, RunConnection, RunStatus, SubscriptionEvent,
    TaskStatus,
};
use crate::wire::{EndpointCallOutcome, ExecuteRequest, PreprocessRequest};

/// Options attached to every enqueue a store method performs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Development environments skip queue-level retrying.
    pub skip_retrying: bool,
}

/// Task marked `ERRORED` alongside a run failure.
#[derive(Debug, Clone)]
pub struct ErroredTask {
    pub id: Uuid,
    pub error: serde_json::Value,
}

/// How a `RESUME_WITH_TASK` outcome gets back onto the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeScheduling {
    /// The task carries an operation or callback URL; an external completion
    /// path enqueues the resume.
    External,
    /// Enqueue a `ResumeTask` message ourselves, optionally delayed.
    Enqueue(Option<DateTime<Utc>>),
}

/// Metadata of one cooperative yield checkpoint.
#[derive(Debug, Clone)]
pub struct AutoYieldCheckpoint {
    pub location: String,
    pub time_remaining_ms: i64,
    pub time_elapsed_ms: i64,
    pub limit_ms: i64,
}

/// Snapshot used to decide whether a timed-out chunk made progress.
#[derive(Debug, Clone)]
pub struct TimeoutProgress {
    pub latest_task: Option<TaskSummary>,
    pub task_count: i64,
}

#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub id: Uuid,
    pub idempotency_key: String,
    pub status: TaskStatus,
}

/// Transactional store behind the state machine. One method per branch.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Load the whole aggregate in a single read. `None` when the run does
    /// not exist; callers return silently in that case.
    async fn load_aggregate(&self, run_id: Uuid) -> Result<Option<RunAggregate>>;

    /// Increment `execution_count` and transition `QUEUED` runs to
    /// `STARTED`. Returns the new count, or `None` when the run is already
    /// terminal and must not be touched. This is the chunk's one
    /// execution-count accounting event; the per-variant deltas exist for
    /// parallel children (zero) and callers that need to replay counts.
    async fn begin_chunk(&self, run_id: Uuid) -> Result<Option<i64>>;

    /// Terminal-cancel a run whose organisation is blocked.
    async fn cancel_blocked_run(&self, run_id: Uuid) -> Result<()>;

    /// Deprecated resume path: no-op tasks complete, everything else starts
    /// running.
    async fn resume_legacy_task(&self, task_id: Uuid) -> Result<()>;

    /// Terminal `SUCCESS`: store output, add duration, enqueue subscription
    /// delivery.
    async fn complete_run(
        &self,
        run_id: Uuid,
        output: Option<serde_json::Value>,
        duration_ms: i64,
    ) -> Result<()>;

    /// Terminal failure of an execute chunk: set status and output, close
    /// every open task as `cascade_to`, clear the force-yield flag, enqueue
    /// subscription delivery. `errored_task` is additionally marked
    /// `ERRORED` with its error payload as output.
    async fn fail_execution(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: serde_json::Value,
        duration_ms: i64,
        cascade_to: TaskStatus,
        errored_task: Option<ErroredTask>,
    ) -> Result<()>;

    /// Preprocess failure. `ABORTED` is terminal; any other status is
    /// transient, transitioning the run to `STARTED` and enqueueing an
    /// execute chunk.
    async fn fail_preprocess(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: serde_json::Value,
        enqueue: EnqueueOptions,
    ) -> Result<()>;

    /// Preprocess success: `STARTED`, copy properties, clear the force-yield
    /// flag, enqueue an execute chunk.
    async fn complete_preprocess(
        &self,
        run_id: Uuid,
        properties: Option<serde_json::Value>,
        enqueue: EnqueueOptions,
    ) -> Result<()>;

    /// `RESUME_WITH_TASK`: add duration, bump the execution count, persist
    /// the task's output properties, and schedule the resume.
    async fn record_task_resume(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        output_properties: Option<serde_json::Value>,
        duration_ms: i64,
        execution_count_delta: i64,
        scheduling: ResumeScheduling,
    ) -> Result<()>;

    /// `RETRY_WITH_TASK`: error the latest pending attempt, create the next
    /// one at `retry_at`, park the task as `WAITING`, update run counters,
    /// enqueue the delayed resume.
    async fn record_task_retry(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        error: serde_json::Value,
        retry_at: DateTime<Utc>,
        duration_ms: i64,
        execution_count_delta: i64,
    ) -> Result<()>;

    /// `YIELD_EXECUTION`: append the checkpoint key, update counters, clear
    /// the force-yield flag, enqueue the next chunk. The ceiling check
    /// happens in the driver before this is called.
    async fn append_yield(
        &self,
        run_id: Uuid,
        key: String,
        duration_ms: i64,
        execution_count_delta: i64,
        enqueue: EnqueueOptions,
    ) -> Result<()>;

    /// `AUTO_YIELD_EXECUTION`: record the checkpoint row, update counters,
    /// clear the force-yield flag. `enqueue` is `None` when the follow-up
    /// chunk is enqueued separately after an external completion call.
    async fn record_auto_yield(
        &self,
        run_id: Uuid,
        checkpoint: AutoYieldCheckpoint,
        duration_ms: i64,
        execution_count_delta: i64,
        enqueue: Option<EnqueueOptions>,
    ) -> Result<()>;

    /// `RESUME_WITH_PARALLEL_TASK` parent accounting: duration, the
    /// caller-supplied execution-count delta, force-yield clear, and the
    /// parent task's output properties. The parent update is the sole
    /// accounting event of the chunk; children replay with a zero delta.
    async fn record_parallel_resume(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        output_properties: Option<serde_json::Value>,
        duration_ms: i64,
        execution_count_delta: i64,
    ) -> Result<()>;

    /// Timed-out chunk that made progress: add duration, retune the
    /// endpoint's chunk limit, clear the force-yield flag, enqueue the next
    /// chunk.
    async fn resume_after_timeout(
        &self,
        run_id: Uuid,
        duration_ms: i64,
        chunk_limit_ms: i64,
        enqueue: EnqueueOptions,
    ) -> Result<()>;

    /// Latest task (by creation time) and total task count, read after a
    /// timed-out chunk.
    async fn timeout_progress(&self, run_id: Uuid) -> Result<TimeoutProgress>;

    /// Opportunistic endpoint version refresh from a response header.
    async fn update_endpoint_version(&self, endpoint_id: Uuid, version: &str) -> Result<()>;

    /// Idempotent on `(run, recipient, event)`.
    async fn upsert_subscription(
        &self,
        run_id: Uuid,
        recipient: &str,
        event: SubscriptionEvent,
    ) -> Result<()>;

    /// Ask the endpoint to yield at its next checkpoint.
    async fn set_force_yield(&self, run_id: Uuid, force: bool) -> Result<()>;
}

/// Kinds of work carried by the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Preprocess {
        run_id: Uuid,
    },
    ExecuteJob {
        run_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_task_id: Option<Uuid>,
    },
    ResumeTask {
        run_id: Uuid,
        task_id: Uuid,
    },
    DeliverRunSubscriptions {
        run_id: Uuid,
    },
}

/// A claimed queue message, delivered at-least-once.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: i64,
    pub kind: JobKind,
    pub is_retry: bool,
    pub retry_count: i32,
    pub skip_retrying: bool,
    pub available_at: DateTime<Utc>,
}

/// Durable job queue. Enqueues from inside store transactions go through
/// the store; this port covers the worker side plus the one out-of-band
/// producer path (the post-completion re-enqueue of an auto-yield).
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        kind: JobKind,
        available_at: Option<DateTime<Utc>>,
        opts: EnqueueOptions,
    ) -> Result<()>;

    /// Claim the next available message, if any.
    async fn claim(&self) -> Result<Option<QueueMessage>>;

    async fn complete(&self, message_id: i64) -> Result<()>;

    /// Put a failed message back with a later `available_at`.
    async fn retry(&self, message_id: i64, error: &str, available_at: DateTime<Utc>) -> Result<()>;

    async fn dead_letter(&self, message_id: i64, error: &str) -> Result<()>;
}

/// HTTP client for user endpoints. Transport failures surface as
/// [`EndpointCallOutcome::NoResponse`], not as errors.
#[async_trait]
pub trait EndpointClient: Send + Sync {
    async fn preprocess(
        &self,
        endpoint: &Endpoint,
        body: &PreprocessRequest,
    ) -> Result<EndpointCallOutcome>;

    async fn execute(
        &self,
        endpoint: &Endpoint,
        body: &ExecuteRequest,
    ) -> Result<EndpointCallOutcome>;
}

/// Materialises connection credentials for the execute body.
#[async_trait]
pub trait ConnectionAuthResolver: Send + Sync {
    async fn resolve(
        &self,
        connections: &[RunConnection],
    ) -> Result<HashMap<String, ConnectionAuth>>;
}

/// Payload handed to the lower-level task-completion service.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub properties: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
}

#[async_trait]
pub trait TaskCompletionService: Send + Sync {
    async fn complete_task(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        completion: TaskCompletion,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionEventType {
    Start,
    Finish,
}

/// Telemetry record for one endpoint call boundary.
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    pub event_type: ExecutionEventType,
    pub event_time: DateTime<Utc>,
    pub drift_ms: i64,
    pub organization_id: Uuid,
    pub environment_id: Uuid,
    pub project_id: Uuid,
    pub job_id: Uuid,
    pub run_id: Uuid,
}

/// Best-effort sink; emission happens outside store transactions and
/// failures are logged, never propagated into the state machine.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn execution_event(&self, event: ExecutionEvent) -> Result<()>;
}
