//! Durable Postgres job queue.
//!
//! Claiming uses the CTE form of `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never double-claim. Store transactions enqueue through
//! [`insert_message`] with their own executor, which is what makes enqueues
//! transactional with the state writes that caused them.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use conveyor_core::error::Result;
use conveyor_core::ports::{EnqueueOptions, JobKind, JobQueue, QueueMessage};

/// Postgres-backed durable queue.
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct QueueRow {
    id: i64,
    kind: String,
    run_id: Uuid,
    task_id: Option<Uuid>,
    is_retry: bool,
    retry_count: i32,
    skip_retrying: bool,
    available_at: DateTime<Utc>,
}

impl TryFrom<QueueRow> for QueueMessage {
    type Error = String;

    fn try_from(row: QueueRow) -> std::result::Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "PREPROCESS" => JobKind::Preprocess { run_id: row.run_id },
            "EXECUTE_JOB" => JobKind::ExecuteJob {
                run_id: row.run_id,
                resume_task_id: row.task_id,
            },
            "RESUME_TASK" => JobKind::ResumeTask {
                run_id: row.run_id,
                task_id: row
                    .task_id
                    .ok_or_else(|| format!("RESUME_TASK message {} has no task id", row.id))?,
            },
            "DELIVER_RUN_SUBSCRIPTIONS" => JobKind::DeliverRunSubscriptions { run_id: row.run_id },
            other => return Err(format!("Unknown queue message kind: {}", other)),
        };
        Ok(QueueMessage {
            id: row.id,
            kind,
            is_retry: row.is_retry,
            retry_count: row.retry_count,
            skip_retrying: row.skip_retrying,
            available_at: row.available_at,
        })
    }
}

fn kind_columns(kind: &JobKind) -> (&'static str, Uuid, Option<Uuid>) {
    match kind {
        JobKind::Preprocess { run_id } => ("PREPROCESS", *run_id, None),
        JobKind::ExecuteJob {
            run_id,
            resume_task_id,
        } => ("EXECUTE_JOB", *run_id, *resume_task_id),
        JobKind::ResumeTask { run_id, task_id } => ("RESUME_TASK", *run_id, Some(*task_id)),
        JobKind::DeliverRunSubscriptions { run_id } => {
            ("DELIVER_RUN_SUBSCRIPTIONS", *run_id, None)
        }
    }
}

/// Insert a queue message with the given executor. Store methods pass their
/// open transaction here; the message becomes visible iff it commits.
pub(crate) async fn insert_message<'e, E>(
    executor: E,
    kind: &JobKind,
    available_at: Option<DateTime<Utc>>,
    opts: EnqueueOptions,
) -> std::result::Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let (kind_str, run_id, task_id) = kind_columns(kind);
    sqlx::query(
        r#"
        INSERT INTO conveyor.job_queue
            (kind, run_id, task_id, skip_retrying, available_at)
        VALUES ($1, $2, $3, $4, COALESCE($5, now()))
        "#,
    )
    .bind(kind_str)
    .bind(run_id)
    .bind(task_id)
    .bind(opts.skip_retrying)
    .bind(available_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        available_at: Option<DateTime<Utc>>,
        opts: EnqueueOptions,
    ) -> Result<()> {
        insert_message(&self.pool, &kind, available_at, opts)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn claim(&self) -> Result<Option<QueueMessage>> {
        // Atomic pop with CTE form (planner-independent, SKIP LOCKED safe).
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            WITH next AS (
                SELECT id
                FROM conveyor.job_queue
                WHERE claimed_at IS NULL AND available_at <= now()
                ORDER BY available_at, id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE conveyor.job_queue q
            SET claimed_at = now()
            FROM next
            WHERE q.id = next.id
            RETURNING
                q.id,
                q.kind,
                q.run_id,
                q.task_id,
                q.is_retry,
                q.retry_count,
                q.skip_retrying,
                q.available_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        row.map(|r| QueueMessage::try_from(r).map_err(|e| anyhow!(e).into()))
            .transpose()
    }

    async fn complete(&self, message_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM conveyor.job_queue WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn retry(&self, message_id: i64, error: &str, available_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conveyor.job_queue
            SET claimed_at = NULL,
                is_retry = TRUE,
                retry_count = retry_count + 1,
                last_error = $2,
                available_at = $3
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(error)
        .bind(available_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn dead_letter(&self, message_id: i64, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        sqlx::query(
            r#"
            INSERT INTO conveyor.job_queue_dead_letters
                (message_id, kind, run_id, task_id, retry_count, error)
            SELECT id, kind, run_id, task_id, retry_count, $2
            FROM conveyor.job_queue
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;
        sqlx::query("DELETE FROM conveyor.job_queue WHERE id = $1")
            .bind(message_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }
}
