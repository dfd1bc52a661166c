//! Endpoint Wire Protocol
//!
//! Request bodies sent to user endpoints, the closed response union returned
//! by the execute route, and the response headers the coordinator reacts to.
//! All wire structs serialise camelCase; the response union is tagged by
//! `status` so dispatch is an exhaustive `match`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ConnectionAuth, EnvironmentType, TaskStatus};

/// Response header carrying the endpoint's protocol version.
pub const TRIGGER_VERSION_HEADER: &str = "trigger-version";

/// Response header carrying structured run metadata (subscription opt-ins).
pub const RUN_METADATA_HEADER: &str = "x-trigger-run-metadata";

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdentity {
    /// Job slug, stable across versions.
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub id: Uuid,
    pub slug: String,
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationInfo {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: Uuid,
    pub name: String,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Body of the preprocess route call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessRequest {
    pub event: EventEnvelope,
    pub job: JobIdentity,
    pub run: PreprocessRunInfo,
    pub environment: EnvironmentInfo,
    pub organization: OrganizationInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessRunInfo {
    pub id: Uuid,
    pub is_test: bool,
}

/// Successful preprocess response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessResponse {
    pub abort: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRunInfo {
    pub id: Uuid,
    pub is_test: bool,
    pub is_retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub execution_count: i64,
}

/// A completed task embedded in the execute body so the endpoint skips
/// re-execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTask {
    pub id: Uuid,
    pub idempotency_key: String,
    pub status: TaskStatus,
    pub noop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
}

/// The four endpoint-side auto-yield thresholds, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoYieldConfig {
    pub start_task_threshold: i64,
    pub before_execute_task_threshold: i64,
    pub before_complete_task_threshold: i64,
    pub after_complete_task_threshold: i64,
}

/// Body of the execute route call. Endpoints older than the
/// lazy-cached-tasks feature receive only the legacy fields; newer ones also
/// get the cursor, the no-op Bloom filter, yielded-execution replay, the
/// buffered chunk limit, and the auto-yield config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub event: EventEnvelope,
    pub job: JobIdentity,
    pub run: ExecuteRunInfo,
    pub environment: EnvironmentInfo,
    pub organization: OrganizationInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountInfo>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub connections: HashMap<String, ConnectionAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
    pub tasks: Vec<CachedTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_task_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noop_tasks_set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yielded_executions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_chunk_execution_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_yield_config: Option<AutoYieldConfig>,
    pub force_yield_immediately: bool,
}

// ---------------------------------------------------------------------------
// Response union
// ---------------------------------------------------------------------------

/// Error shape endpoints use in both error-status bodies and the `ERROR`
/// variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub id: Uuid,
}

/// Task fields carried by the resume variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumedTask {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_properties: Option<serde_json::Value>,
    /// Present when an external system drives the task to completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
}

/// The closed response union of the execute route. Unknown `status` values
/// fail deserialisation and are treated as an invalid response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ExecuteResponse {
    #[serde(rename = "SUCCESS", rename_all = "camelCase")]
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
    #[serde(rename = "ERROR", rename_all = "camelCase")]
    Error {
        error: ErrorPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<TaskRef>,
    },
    #[serde(rename = "INVALID_PAYLOAD", rename_all = "camelCase")]
    InvalidPayload { errors: serde_json::Value },
    #[serde(rename = "UNRESOLVED_AUTH_ERROR", rename_all = "camelCase")]
    UnresolvedAuth { issues: serde_json::Value },
    #[serde(rename = "CANCELED", rename_all = "camelCase")]
    Canceled {},
    #[serde(rename = "RESUME_WITH_TASK", rename_all = "camelCase")]
    ResumeWithTask { task: ResumedTask },
    #[serde(rename = "RETRY_WITH_TASK", rename_all = "camelCase")]
    RetryWithTask {
        task: TaskRef,
        error: ErrorPayload,
        retry_at: DateTime<Utc>,
    },
    #[serde(rename = "YIELD_EXECUTION", rename_all = "camelCase")]
    YieldExecution { key: String },
    #[serde(rename = "AUTO_YIELD_EXECUTION", rename_all = "camelCase")]
    AutoYieldExecution {
        location: String,
        time_remaining: i64,
        time_elapsed: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<i64>,
    },
    #[serde(
        rename = "AUTO_YIELD_EXECUTION_WITH_COMPLETED_TASK",
        rename_all = "camelCase"
    )]
    AutoYieldExecutionWithCompletedTask {
        /// Id of the task the lower-level completion service finishes.
        id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<serde_json::Value>,
        /// Stringified JSON output, parsed before completion.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        location: String,
        time_remaining: i64,
        time_elapsed: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<i64>,
    },
    #[serde(rename = "RESUME_WITH_PARALLEL_TASK", rename_all = "camelCase")]
    ResumeWithParallelTask {
        task: ResumedTask,
        /// Child outcomes, sorted by the endpoint descending by task
        /// creation time; each is dispatched with zero duration and zero
        /// execution-count delta.
        child_errors: Vec<ExecuteResponse>,
    },
}

// ---------------------------------------------------------------------------
// Response headers and raw call outcomes
// ---------------------------------------------------------------------------

/// Structured payload of [`RUN_METADATA_HEADER`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_subscription: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_subscription: Option<bool>,
}

/// Headers of interest, parsed best-effort from a response.
#[derive(Debug, Clone, Default)]
pub struct EndpointHeaders {
    pub trigger_version: Option<String>,
    pub run_metadata: Option<RunMetadata>,
}

impl EndpointHeaders {
    /// Parse from a raw header map. A malformed metadata header is dropped,
    /// not an error.
    pub fn parse(headers: &HashMap<String, String>) -> Self {
        let trigger_version = headers.get(TRIGGER_VERSION_HEADER).cloned();
        let run_metadata = headers
            .get(RUN_METADATA_HEADER)
            .and_then(|raw| serde_json::from_str::<RunMetadata>(raw).ok());
        Self {
            trigger_version,
            run_metadata,
        }
    }
}

/// A response the endpoint actually produced, however unhealthy.
#[derive(Debug, Clone)]
pub struct RawEndpointResponse {
    pub status: u16,
    pub headers: EndpointHeaders,
    pub body: String,
    pub duration_ms: i64,
    /// Set by the client when the response terminated abnormally
    /// (gateway timeout, aborted stream).
    pub timed_out: bool,
}

impl RawEndpointResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Whether this response counts as an endpoint timeout. 408 and 504 are
    /// timeout variants regardless of how the client flagged the call.
    pub fn is_timeout(&self) -> bool {
        self.timed_out || self.status == 408 || self.status == 504
    }
}

/// What came back from one endpoint HTTP call.
#[derive(Debug, Clone)]
pub enum EndpointCallOutcome {
    /// The call produced no HTTP response at all.
    NoResponse { timed_out: bool, message: String },
    Response(RawEndpointResponse),
}
