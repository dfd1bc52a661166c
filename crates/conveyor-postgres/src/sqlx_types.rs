//! Row types for the runtime-checked queries, with conversions into the
//! domain model.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use conveyor_core::model::{
    CompletedTaskSummary, ConnectionAuthSource, Endpoint, Environment, EnvironmentType,
    EventRecord, ExternalAccount, Job, JobRunSubscription, JobVersion, Organization, Project, Run,
    RunConnection, RunStatus, SubscriptionEvent, TaskStatus,
};
use conveyor_core::ports::TaskSummary;

#[derive(Debug, Clone, FromRow)]
pub struct PgRunRow {
    pub id: Uuid,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_count: i64,
    pub execution_duration_ms: i64,
    pub yielded_executions: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub properties: Option<serde_json::Value>,
    pub force_yield_immediately: bool,
    pub is_test: bool,
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

impl TryFrom<PgRunRow> for Run {
    type Error = String;

    fn try_from(row: PgRunRow) -> Result<Self, Self::Error> {
        let yielded_executions: Vec<String> = serde_json::from_value(row.yielded_executions)
            .map_err(|e| format!("Invalid yielded_executions: {}", e))?;
        Ok(Run {
            id: row.id,
            status: RunStatus::try_from(row.status)?,
            started_at: row.started_at,
            completed_at: row.completed_at,
            execution_count: row.execution_count,
            execution_duration_ms: row.execution_duration_ms,
            yielded_executions,
            output: row.output,
            properties: row.properties,
            force_yield_immediately: row.force_yield_immediately,
            is_test: row.is_test,
            internal: row.internal,
            environment_id: row.environment_id,
            endpoint_id: row.endpoint_id,
            organization_id: row.organization_id,
            project_id: row.project_id,
            external_account_id: row.external_account_id,
            event_id: row.event_id,
            job_version_id: row.job_version_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgCompletedTaskRow {
    pub id: Uuid,
    pub idempotency_key: String,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub noop: bool,
    pub output: Option<serde_json::Value>,
    pub output_is_undefined: bool,
    pub parent_id: Option<Uuid>,
}

impl From<PgCompletedTaskRow> for CompletedTaskSummary {
    fn from(row: PgCompletedTaskRow) -> Self {
        Self {
            id: row.id,
            idempotency_key: row.idempotency_key,
            status: row.status,
            noop: row.noop,
            output: row.output,
            output_is_undefined: row.output_is_undefined,
            parent_id: row.parent_id,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgTaskSummaryRow {
    pub id: Uuid,
    pub idempotency_key: String,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
}

impl From<PgTaskSummaryRow> for TaskSummary {
    fn from(row: PgTaskSummaryRow) -> Self {
        Self {
            id: row.id,
            idempotency_key: row.idempotency_key,
            status: row.status,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgEndpointRow {
    pub id: Uuid,
    pub url: String,
    pub api_key: String,
    pub version: Option<String>,
    pub run_chunk_execution_limit_ms: i64,
    pub start_task_threshold_ms: i64,
    pub before_execute_task_threshold_ms: i64,
    pub before_complete_task_threshold_ms: i64,
    pub after_complete_task_threshold_ms: i64,
}

impl From<PgEndpointRow> for Endpoint {
    fn from(row: PgEndpointRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            api_key: row.api_key,
            version: row.version,
            run_chunk_execution_limit_ms: row.run_chunk_execution_limit_ms,
            start_task_threshold_ms: row.start_task_threshold_ms,
            before_execute_task_threshold_ms: row.before_execute_task_threshold_ms,
            before_complete_task_threshold_ms: row.before_complete_task_threshold_ms,
            after_complete_task_threshold_ms: row.after_complete_task_threshold_ms,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgEnvironmentRow {
    pub id: Uuid,
    pub slug: String,
    pub env_type: String,
}

impl TryFrom<PgEnvironmentRow> for Environment {
    type Error = String;

    fn try_from(row: PgEnvironmentRow) -> Result<Self, Self::Error> {
        Ok(Environment {
            id: row.id,
            slug: row.slug,
            env_type: EnvironmentType::try_from(row.env_type)?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgOrganizationRow {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub maximum_execution_time_per_run_ms: i64,
}

impl From<PgOrganizationRow> for Organization {
    fn from(row: PgOrganizationRow) -> Self {
        Self {
            id: row.id,
            slug: row.slug,
            title: row.title,
            maximum_execution_time_per_run_ms: row.maximum_execution_time_per_run_ms,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgProjectRow {
    pub id: Uuid,
    pub name: String,
}

impl From<PgProjectRow> for Project {
    fn from(row: PgProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgExternalAccountRow {
    pub id: Uuid,
    pub identifier: String,
    pub metadata: Option<serde_json::Value>,
}

impl From<PgExternalAccountRow> for ExternalAccount {
    fn from(row: PgExternalAccountRow) -> Self {
        Self {
            id: row.id,
            identifier: row.identifier,
            metadata: row.metadata,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgEventRow {
    pub id: Uuid,
    pub name: String,
    pub payload: serde_json::Value,
    pub context: Option<serde_json::Value>,
    pub source_context: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl From<PgEventRow> for EventRecord {
    fn from(row: PgEventRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            payload: row.payload,
            context: row.context,
            source_context: row.source_context,
            timestamp: row.occurred_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgJobVersionRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub version: String,
    pub job_slug: String,
    pub job_title: String,
}

impl PgJobVersionRow {
    pub fn into_parts(self) -> (JobVersion, Job) {
        (
            JobVersion {
                id: self.id,
                job_id: self.job_id,
                version: self.version,
            },
            Job {
                id: self.job_id,
                slug: self.job_slug,
                title: self.job_title,
            },
        )
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgRunConnectionRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub key: String,
    pub connection_id: Option<Uuid>,
    pub integration_slug: String,
    pub auth_source: String,
}

impl TryFrom<PgRunConnectionRow> for RunConnection {
    type Error = String;

    fn try_from(row: PgRunConnectionRow) -> Result<Self, Self::Error> {
        let auth_source = match row.auth_source.as_str() {
            "HOSTED" => ConnectionAuthSource::Hosted,
            "LOCAL" => ConnectionAuthSource::Local,
            other => return Err(format!("Unknown auth source: {}", other)),
        };
        Ok(RunConnection {
            id: row.id,
            run_id: row.run_id,
            key: row.key,
            connection_id: row.connection_id,
            integration_slug: row.integration_slug,
            auth_source,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PgSubscriptionRow {
    pub run_id: Uuid,
    pub recipient: String,
    #[sqlx(try_from = "String")]
    pub event: SubscriptionEvent,
    pub recipient_method: String,
    pub status: String,
}

impl From<PgSubscriptionRow> for JobRunSubscription {
    fn from(row: PgSubscriptionRow) -> Self {
        Self {
            run_id: row.run_id,
            recipient: row.recipient,
            event: row.event,
            recipient_method: row.recipient_method,
            status: row.status,
        }
    }
}
