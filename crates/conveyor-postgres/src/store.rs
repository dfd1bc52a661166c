//! `PgRunStore`: the transactional store behind the execute state machine.
//!
//! Every mutation method is one transaction; enqueues ride in the same
//! transaction through the queue's insert helper. The aggregate load is a
//! plain read (no transaction), matching how the coordinator uses it.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use conveyor_core::error::Result;
use conveyor_core::model::{RunAggregate, RunStatus, SubscriptionEvent, TaskStatus};
use conveyor_core::ports::{
    AutoYieldCheckpoint, EnqueueOptions, ErroredTask, JobKind, ResumeScheduling, RunStore,
    TimeoutProgress,
};

use crate::queue::insert_message;
use crate::sqlx_types::{
    PgCompletedTaskRow, PgEndpointRow, PgEnvironmentRow, PgEventRow, PgExternalAccountRow,
    PgJobVersionRow, PgOrganizationRow, PgProjectRow, PgRunConnectionRow, PgRunRow,
    PgSubscriptionRow, PgTaskSummaryRow,
};

/// Postgres-backed run store.
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn load_aggregate(&self, run_id: Uuid) -> Result<Option<RunAggregate>> {
        let row = sqlx::query_as::<_, PgRunRow>(
            r#"
            SELECT id, status, started_at, completed_at, execution_count,
                   execution_duration_ms, yielded_executions, output, properties,
                   force_yield_immediately, is_test, internal,
                   environment_id, endpoint_id, organization_id, project_id,
                   external_account_id, event_id, job_version_id, created_at
            FROM conveyor.runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let run = conveyor_core::model::Run::try_from(row)
            .map_err(|e| anyhow!("run {run_id}: {e}"))?;

        let environment = sqlx::query_as::<_, PgEnvironmentRow>(
            "SELECT id, slug, env_type FROM conveyor.environments WHERE id = $1",
        )
        .bind(run.environment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .try_into()
        .map_err(|e: String| anyhow!(e))?;

        let endpoint: conveyor_core::model::Endpoint = sqlx::query_as::<_, PgEndpointRow>(
            r#"
            SELECT id, url, api_key, version, run_chunk_execution_limit_ms,
                   start_task_threshold_ms, before_execute_task_threshold_ms,
                   before_complete_task_threshold_ms, after_complete_task_threshold_ms
            FROM conveyor.endpoints
            WHERE id = $1
            "#,
        )
        .bind(run.endpoint_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .into();

        let organization: conveyor_core::model::Organization =
            sqlx::query_as::<_, PgOrganizationRow>(
                r#"
                SELECT id, slug, title, maximum_execution_time_per_run_ms
                FROM conveyor.organizations
                WHERE id = $1
                "#,
            )
            .bind(run.organization_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?
            .into();

        let project: conveyor_core::model::Project = sqlx::query_as::<_, PgProjectRow>(
            "SELECT id, name FROM conveyor.projects WHERE id = $1",
        )
        .bind(run.project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .into();

        let external_account = match run.external_account_id {
            Some(account_id) => sqlx::query_as::<_, PgExternalAccountRow>(
                "SELECT id, identifier, metadata FROM conveyor.external_accounts WHERE id = $1",
            )
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?
            .map(Into::into),
            None => None,
        };

        let run_connections = sqlx::query_as::<_, PgRunConnectionRow>(
            r#"
            SELECT id, run_id, key, connection_id, integration_slug, auth_source
            FROM conveyor.run_connections
            WHERE run_id = $1
            ORDER BY key
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<std::result::Result<Vec<_>, String>>()
        .map_err(|e| anyhow!(e))?;

        // COMPLETED-only projection, ascending by id for determinism.
        let completed_tasks = sqlx::query_as::<_, PgCompletedTaskRow>(
            r#"
            SELECT id, idempotency_key, status, noop, output, output_is_undefined, parent_id
            FROM conveyor.tasks
            WHERE run_id = $1 AND status = 'COMPLETED'
            ORDER BY id ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .into_iter()
        .map(Into::into)
        .collect();

        let event: conveyor_core::model::EventRecord = sqlx::query_as::<_, PgEventRow>(
            r#"
            SELECT id, name, payload, context, source_context, occurred_at
            FROM conveyor.events
            WHERE id = $1
            "#,
        )
        .bind(run.event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .into();

        let (version, job) = sqlx::query_as::<_, PgJobVersionRow>(
            r#"
            SELECT v.id, v.job_id, v.version, j.slug AS job_slug, j.title AS job_title
            FROM conveyor.job_versions v
            JOIN conveyor.jobs j ON j.id = v.job_id
            WHERE v.id = $1
            "#,
        )
        .bind(run.job_version_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .into_parts();

        let subscriptions = sqlx::query_as::<_, PgSubscriptionRow>(
            r#"
            SELECT run_id, recipient, event, recipient_method, status
            FROM conveyor.run_subscriptions
            WHERE run_id = $1 AND recipient_method = 'ENDPOINT'
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .into_iter()
        .map(Into::into)
        .collect();

        let (task_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM conveyor.tasks WHERE run_id = $1")
                .bind(run_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| anyhow!(e))?;

        Ok(Some(RunAggregate {
            run,
            environment,
            endpoint,
            organization,
            project,
            external_account,
            run_connections,
            completed_tasks,
            event,
            job,
            version,
            subscriptions,
            task_count,
        }))
    }

    async fn begin_chunk(&self, run_id: Uuid) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE conveyor.runs
            SET execution_count = execution_count + 1,
                started_at = CASE
                    WHEN status = 'QUEUED' AND started_at IS NULL THEN now()
                    ELSE started_at
                END,
                status = CASE WHEN status = 'QUEUED' THEN 'STARTED' ELSE status END,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            RETURNING execution_count
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.map(|(count,)| count))
    }

    async fn cancel_blocked_run(&self, run_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET status = 'CANCELED', completed_at = now(), updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn resume_legacy_task(&self, task_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        sqlx::query(
            r#"
            UPDATE conveyor.tasks
            SET status = 'COMPLETED', completed_at = now()
            WHERE id = $1 AND noop
            "#,
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;
        sqlx::query(
            r#"
            UPDATE conveyor.tasks
            SET status = 'RUNNING'
            WHERE id = $1 AND NOT noop
            "#,
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        output: Option<serde_json::Value>,
        duration_ms: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        let updated = sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET status = 'SUCCESS',
                completed_at = now(),
                output = $2,
                execution_duration_ms = execution_duration_ms + $3,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(&output)
        .bind(duration_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if updated.rows_affected() > 0 {
            insert_message(
                &mut *tx,
                &JobKind::DeliverRunSubscriptions { run_id },
                None,
                EnqueueOptions::default(),
            )
            .await
            .map_err(|e| anyhow!(e))?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn fail_execution(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: serde_json::Value,
        duration_ms: i64,
        cascade_to: TaskStatus,
        errored_task: Option<ErroredTask>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        if let Some(task) = errored_task {
            sqlx::query(
                r#"
                UPDATE conveyor.tasks
                SET status = 'ERRORED', completed_at = now(), output = $2
                WHERE id = $1
                "#,
            )
            .bind(task.id)
            .bind(&task.error)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET status = $2,
                completed_at = now(),
                output = $3,
                execution_duration_ms = execution_duration_ms + $4,
                force_yield_immediately = FALSE,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(&output)
        .bind(duration_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if updated.rows_affected() > 0 {
            // Close every task the failed run leaves behind.
            sqlx::query(
                r#"
                UPDATE conveyor.tasks
                SET status = $2, completed_at = now()
                WHERE run_id = $1 AND status IN ('WAITING', 'RUNNING', 'PENDING')
                "#,
            )
            .bind(run_id)
            .bind(cascade_to.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;

            insert_message(
                &mut *tx,
                &JobKind::DeliverRunSubscriptions { run_id },
                None,
                EnqueueOptions::default(),
            )
            .await
            .map_err(|e| anyhow!(e))?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn fail_preprocess(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: serde_json::Value,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        if status == RunStatus::Aborted {
            sqlx::query(
                r#"
                UPDATE conveyor.runs
                SET status = 'ABORTED', completed_at = now(), output = $2, updated_at = now()
                WHERE id = $1 AND completed_at IS NULL
                "#,
            )
            .bind(run_id)
            .bind(&output)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        } else {
            // Preprocess failures other than an abort are transient: the run
            // proceeds to execution anyway.
            let updated = sqlx::query(
                r#"
                UPDATE conveyor.runs
                SET status = 'STARTED', started_at = now(), updated_at = now()
                WHERE id = $1 AND completed_at IS NULL
                "#,
            )
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;

            if updated.rows_affected() > 0 {
                insert_message(
                    &mut *tx,
                    &JobKind::ExecuteJob {
                        run_id,
                        resume_task_id: None,
                    },
                    None,
                    enqueue,
                )
                .await
                .map_err(|e| anyhow!(e))?;
            }
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn complete_preprocess(
        &self,
        run_id: Uuid,
        properties: Option<serde_json::Value>,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        let updated = sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET status = 'STARTED',
                started_at = now(),
                properties = $2,
                force_yield_immediately = FALSE,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(&properties)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if updated.rows_affected() > 0 {
            insert_message(
                &mut *tx,
                &JobKind::ExecuteJob {
                    run_id,
                    resume_task_id: None,
                },
                None,
                enqueue,
            )
            .await
            .map_err(|e| anyhow!(e))?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn record_task_resume(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        output_properties: Option<serde_json::Value>,
        duration_ms: i64,
        execution_count_delta: i64,
        scheduling: ResumeScheduling,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET execution_duration_ms = execution_duration_ms + $2,
                execution_count = execution_count + $3,
                force_yield_immediately = FALSE,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(duration_ms)
        .bind(execution_count_delta)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if let Some(properties) = &output_properties {
            sqlx::query("UPDATE conveyor.tasks SET output_properties = $2 WHERE id = $1")
                .bind(task_id)
                .bind(properties)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow!(e))?;
        }

        if let ResumeScheduling::Enqueue(run_at) = scheduling {
            insert_message(
                &mut *tx,
                &JobKind::ResumeTask { run_id, task_id },
                run_at,
                EnqueueOptions::default(),
            )
            .await
            .map_err(|e| anyhow!(e))?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn record_task_retry(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        error: serde_json::Value,
        retry_at: DateTime<Utc>,
        duration_ms: i64,
        execution_count_delta: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        let latest_pending: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT number FROM conveyor.task_attempts
            WHERE task_id = $1 AND status = 'PENDING'
            ORDER BY number DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if let Some((number,)) = latest_pending {
            sqlx::query(
                r#"
                UPDATE conveyor.task_attempts
                SET status = 'ERRORED', error = $3
                WHERE task_id = $1 AND number = $2
                "#,
            )
            .bind(task_id)
            .bind(number)
            .bind(&error)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        }

        // Numbering stays contiguous even when no pending attempt existed.
        sqlx::query(
            r#"
            INSERT INTO conveyor.task_attempts (task_id, number, status, run_at)
            SELECT $1, COALESCE(MAX(number), 0) + 1, 'PENDING', $2
            FROM conveyor.task_attempts
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(retry_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        sqlx::query("UPDATE conveyor.tasks SET status = 'WAITING' WHERE id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;

        sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET execution_duration_ms = execution_duration_ms + $2,
                execution_count = execution_count + $3,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(duration_ms)
        .bind(execution_count_delta)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        insert_message(
            &mut *tx,
            &JobKind::ResumeTask { run_id, task_id },
            Some(retry_at),
            EnqueueOptions::default(),
        )
        .await
        .map_err(|e| anyhow!(e))?;

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn append_yield(
        &self,
        run_id: Uuid,
        key: String,
        duration_ms: i64,
        execution_count_delta: i64,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        let updated = sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET yielded_executions = yielded_executions || to_jsonb($2::text),
                execution_duration_ms = execution_duration_ms + $3,
                execution_count = execution_count + $4,
                force_yield_immediately = FALSE,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(&key)
        .bind(duration_ms)
        .bind(execution_count_delta)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if updated.rows_affected() > 0 {
            insert_message(
                &mut *tx,
                &JobKind::ExecuteJob {
                    run_id,
                    resume_task_id: None,
                },
                None,
                enqueue,
            )
            .await
            .map_err(|e| anyhow!(e))?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn record_auto_yield(
        &self,
        run_id: Uuid,
        checkpoint: AutoYieldCheckpoint,
        duration_ms: i64,
        execution_count_delta: i64,
        enqueue: Option<EnqueueOptions>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        sqlx::query(
            r#"
            INSERT INTO conveyor.auto_yield_executions
                (run_id, location, time_remaining_ms, time_elapsed_ms, limit_ms)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run_id)
        .bind(&checkpoint.location)
        .bind(checkpoint.time_remaining_ms)
        .bind(checkpoint.time_elapsed_ms)
        .bind(checkpoint.limit_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        let updated = sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET execution_duration_ms = execution_duration_ms + $2,
                execution_count = execution_count + $3,
                force_yield_immediately = FALSE,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(duration_ms)
        .bind(execution_count_delta)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if let Some(opts) = enqueue {
            if updated.rows_affected() > 0 {
                insert_message(
                    &mut *tx,
                    &JobKind::ExecuteJob {
                        run_id,
                        resume_task_id: None,
                    },
                    None,
                    opts,
                )
                .await
                .map_err(|e| anyhow!(e))?;
            }
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn record_parallel_resume(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        output_properties: Option<serde_json::Value>,
        duration_ms: i64,
        execution_count_delta: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET execution_duration_ms = execution_duration_ms + $2,
                execution_count = execution_count + $3,
                force_yield_immediately = FALSE,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(duration_ms)
        .bind(execution_count_delta)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if let Some(properties) = &output_properties {
            sqlx::query("UPDATE conveyor.tasks SET output_properties = $2 WHERE id = $1")
                .bind(task_id)
                .bind(properties)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow!(e))?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn resume_after_timeout(
        &self,
        run_id: Uuid,
        duration_ms: i64,
        chunk_limit_ms: i64,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        let updated = sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET execution_duration_ms = execution_duration_ms + $2,
                force_yield_immediately = FALSE,
                updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(duration_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        sqlx::query(
            r#"
            UPDATE conveyor.endpoints
            SET run_chunk_execution_limit_ms = $2
            WHERE id = (SELECT endpoint_id FROM conveyor.runs WHERE id = $1)
            "#,
        )
        .bind(run_id)
        .bind(chunk_limit_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if updated.rows_affected() > 0 {
            insert_message(
                &mut *tx,
                &JobKind::ExecuteJob {
                    run_id,
                    resume_task_id: None,
                },
                None,
                enqueue,
            )
            .await
            .map_err(|e| anyhow!(e))?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn timeout_progress(&self, run_id: Uuid) -> Result<TimeoutProgress> {
        let latest_task = sqlx::query_as::<_, PgTaskSummaryRow>(
            r#"
            SELECT id, idempotency_key, status
            FROM conveyor.tasks
            WHERE run_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .map(Into::into);

        let (task_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM conveyor.tasks WHERE run_id = $1")
                .bind(run_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| anyhow!(e))?;

        Ok(TimeoutProgress {
            latest_task,
            task_count,
        })
    }

    async fn update_endpoint_version(&self, endpoint_id: Uuid, version: &str) -> Result<()> {
        sqlx::query("UPDATE conveyor.endpoints SET version = $2 WHERE id = $1")
            .bind(endpoint_id)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn upsert_subscription(
        &self,
        run_id: Uuid,
        recipient: &str,
        event: SubscriptionEvent,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conveyor.run_subscriptions
                (run_id, recipient, event, recipient_method, status)
            VALUES ($1, $2, $3, 'ENDPOINT', 'ACTIVE')
            ON CONFLICT (run_id, recipient, event) DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(recipient)
        .bind(event.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn set_force_yield(&self, run_id: Uuid, force: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conveyor.runs
            SET force_yield_immediately = $2, updated_at = now()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .bind(force)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }
}
