//! Run Coordinator Data Model
//!
//! Domain types for runs, tasks, attempts, endpoints, and the aggregate the
//! coordinator loads once per chunk. Status enums carry `as_str()` /
//! `TryFrom<String>` pairs for row mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::LAZY_LOADED_CACHED_TASKS_VERSION;

/// Status of a run. Terminal statuses always travel with `completed_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Started,
    WaitingToResume,
    Success,
    Failure,
    Aborted,
    TimedOut,
    UnresolvedAuth,
    InvalidPayload,
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Started => "STARTED",
            Self::WaitingToResume => "WAITING_TO_RESUME",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Aborted => "ABORTED",
            Self::TimedOut => "TIMED_OUT",
            Self::UnresolvedAuth => "UNRESOLVED_AUTH",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::Canceled => "CANCELED",
        }
    }

    /// A terminal run is never re-enqueued.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Failure
                | Self::Aborted
                | Self::TimedOut
                | Self::UnresolvedAuth
                | Self::InvalidPayload
                | Self::Canceled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for RunStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "QUEUED" => Ok(Self::Queued),
            "STARTED" => Ok(Self::Started),
            "WAITING_TO_RESUME" => Ok(Self::WaitingToResume),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "ABORTED" => Ok(Self::Aborted),
            "TIMED_OUT" => Ok(Self::TimedOut),
            "UNRESOLVED_AUTH" => Ok(Self::UnresolvedAuth),
            "INVALID_PAYLOAD" => Ok(Self::InvalidPayload),
            "CANCELED" => Ok(Self::Canceled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Status of a task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Waiting,
    Running,
    Completed,
    Errored,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Errored => "ERRORED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Tasks in these states are closed out when their run fails.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Waiting | Self::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "PENDING" => Ok(Self::Pending),
            "WAITING" => Ok(Self::Waiting),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "ERRORED" => Ok(Self::Errored),
            "CANCELED" => Ok(Self::Canceled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Status of a single task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAttemptStatus {
    Pending,
    Errored,
}

impl TaskAttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Errored => "ERRORED",
        }
    }
}

impl TryFrom<String> for TaskAttemptStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "PENDING" => Ok(Self::Pending),
            "ERRORED" => Ok(Self::Errored),
            _ => Err(format!("Unknown attempt status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentType {
    Development,
    Staging,
    Preview,
    Production,
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "DEVELOPMENT",
            Self::Staging => "STAGING",
            Self::Preview => "PREVIEW",
            Self::Production => "PRODUCTION",
        }
    }
}

impl TryFrom<String> for EnvironmentType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "DEVELOPMENT" => Ok(Self::Development),
            "STAGING" => Ok(Self::Staging),
            "PREVIEW" => Ok(Self::Preview),
            "PRODUCTION" => Ok(Self::Production),
            _ => Err(format!("Unknown environment type: {}", s)),
        }
    }
}

/// Event a run subscription fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionEvent {
    Success,
    Failure,
}

impl SubscriptionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

impl TryFrom<String> for SubscriptionEvent {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            _ => Err(format!("Unknown subscription event: {}", s)),
        }
    }
}

/// One triggered execution of a job version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Incremented once per chunk accepted by the endpoint.
    pub execution_count: i64,
    /// Cumulative milliseconds spent inside endpoint calls.
    pub execution_duration_ms: i64,
    /// Opaque checkpoint keys from cooperative `YIELD_EXECUTION` responses.
    pub yielded_executions: Vec<String>,
    pub output: Option<serde_json::Value>,
    pub properties: Option<serde_json::Value>,
    /// Consumed at body build time, cleared on every resume path.
    pub force_yield_immediately: bool,
    pub is_test: bool,
    /// Internal runs never get header-driven subscription upserts.
    pub internal: bool,
    pub environment_id: Uuid,
    pub endpoint_id: Uuid,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub external_account_id: Option<Uuid>,
    pub event_id: Uuid,
    pub job_version_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// A run is terminal iff `completed_at` is set.
    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// One unit of work inside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub run_id: Uuid,
    pub idempotency_key: String,
    pub status: TaskStatus,
    pub noop: bool,
    pub output: Option<serde_json::Value>,
    pub output_is_undefined: bool,
    pub output_properties: Option<serde_json::Value>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A retry attempt on a task. Numbering is contiguous per task, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub task_id: Uuid,
    pub number: i32,
    pub status: TaskAttemptStatus,
    pub run_at: Option<DateTime<Utc>>,
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Projection of a `COMPLETED` task, the only shape eligible for caching
/// into the next chunk's body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTaskSummary {
    pub id: Uuid,
    pub idempotency_key: String,
    pub status: TaskStatus,
    pub noop: bool,
    pub output: Option<serde_json::Value>,
    pub output_is_undefined: bool,
    pub parent_id: Option<Uuid>,
}

/// A user's HTTP target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: Uuid,
    pub url: String,
    pub api_key: String,
    /// Updated opportunistically from the `trigger-version` response header.
    pub version: Option<String>,
    /// Adaptive per-chunk soft limit, bounded by
    /// [`MIN_RUN_CHUNK_EXECUTION_LIMIT`](crate::MIN_RUN_CHUNK_EXECUTION_LIMIT)
    /// and [`MAX_RUN_CHUNK_EXECUTION_LIMIT`](crate::MAX_RUN_CHUNK_EXECUTION_LIMIT).
    pub run_chunk_execution_limit_ms: i64,
    pub start_task_threshold_ms: i64,
    pub before_execute_task_threshold_ms: i64,
    pub before_complete_task_threshold_ms: i64,
    pub after_complete_task_threshold_ms: i64,
}

impl Endpoint {
    /// Whether this endpoint understands cached-task cursors, the no-op
    /// Bloom filter, yielded-execution replay, and auto-yield config.
    /// Versions are date strings, so lexicographic comparison is enough.
    pub fn supports_lazy_loaded_cached_tasks(&self) -> bool {
        self.version
            .as_deref()
            .map(|v| v >= LAZY_LOADED_CACHED_TASKS_VERSION)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    /// Fatal ceiling on a run's cumulative endpoint-call time.
    pub maximum_execution_time_per_run_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: Uuid,
    pub slug: String,
    pub env_type: EnvironmentType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAccount {
    pub id: Uuid,
    pub identifier: String,
    pub metadata: Option<serde_json::Value>,
}

/// The event that triggered the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub name: String,
    pub payload: serde_json::Value,
    pub context: Option<serde_json::Value>,
    /// Raw source context, parsed best-effort at execute time.
    pub source_context: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobVersion {
    pub id: Uuid,
    pub job_id: Uuid,
    pub version: String,
}

/// Where a run connection's credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionAuthSource {
    Hosted,
    Local,
}

/// A connection a run needs resolved before its endpoint executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConnection {
    pub id: Uuid,
    pub run_id: Uuid,
    /// Integration key the endpoint looks connections up by.
    pub key: String,
    pub connection_id: Option<Uuid>,
    pub integration_slug: String,
    pub auth_source: ConnectionAuthSource,
}

/// Materialised credentials for one integration key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAuth {
    #[serde(rename = "type")]
    pub auth_type: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A cooperative yield checkpoint recorded for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoYieldExecution {
    pub run_id: Uuid,
    pub location: String,
    pub time_remaining_ms: i64,
    pub time_elapsed_ms: i64,
    pub limit_ms: i64,
}

/// Endpoint-recipient notification subscription, unique per
/// `(run, recipient, event)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunSubscription {
    pub run_id: Uuid,
    pub recipient: String,
    pub event: SubscriptionEvent,
    pub recipient_method: String,
    pub status: String,
}

/// Everything the coordinator reads for one chunk, loaded in a single call.
#[derive(Debug, Clone)]
pub struct RunAggregate {
    pub run: Run,
    pub environment: Environment,
    pub endpoint: Endpoint,
    pub organization: Organization,
    pub project: Project,
    pub external_account: Option<ExternalAccount>,
    pub run_connections: Vec<RunConnection>,
    /// `COMPLETED` tasks only, ordered ascending by id for determinism.
    pub completed_tasks: Vec<CompletedTaskSummary>,
    pub event: EventRecord,
    pub job: Job,
    pub version: JobVersion,
    /// Subscriptions restricted to recipient method `ENDPOINT`.
    pub subscriptions: Vec<JobRunSubscription>,
    /// Total task count at load time, compared after a timed-out chunk.
    pub task_count: i64,
}
