//! Queue worker loop.
//!
//! Single consumer per worker process: claim a message, dispatch it to the
//! matching driver, then complete, retry with backoff, or dead-letter it.
//! Retryable execute failures surface as `ExecuteError::Retry`; messages
//! marked `skip_retrying` (development environments) are dropped instead of
//! rescheduled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use conveyor_core::ports::{EnqueueOptions, JobKind, JobQueue, QueueMessage};
use conveyor_core::Result;

use crate::coordinator::{ExecuteDriver, ExecuteError, ExecuteJobInput, PreprocessDriver};

/// Maximum retry attempts before moving a message to the dead-letter table.
const MAX_QUEUE_RETRIES: i32 = 3;

/// Backoff applied when a message is rescheduled.
const RETRY_BACKOFF_MS: i64 = 5_000;

/// Backoff after an infrastructure error (queue unreachable).
const ERROR_BACKOFF_MS: u64 = 1_000;

pub struct RunWorker {
    queue: Arc<dyn JobQueue>,
    preprocess: Arc<PreprocessDriver>,
    execute: Arc<ExecuteDriver>,
    poll_interval: Duration,
}

impl RunWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        preprocess: Arc<PreprocessDriver>,
        execute: Arc<ExecuteDriver>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            preprocess,
            execute,
            poll_interval,
        }
    }

    /// Run the worker loop until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Run worker started");

        loop {
            if *shutdown.borrow() {
                info!("Run worker shutting down");
                break;
            }

            match self.process_one().await {
                Ok(true) => {
                    // Processed a message, immediately check for more.
                    continue;
                }
                Ok(false) => {
                    // Queue empty, wait before polling again.
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("Run worker shutting down");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Error processing queue message");
                    tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)).await;
                }
            }
        }
    }

    /// Process one message. Returns Ok(true) if a message was claimed,
    /// Ok(false) if the queue was empty.
    async fn process_one(&self) -> Result<bool> {
        let Some(message) = self.queue.claim().await? else {
            return Ok(false);
        };

        debug!(message_id = message.id, kind = ?message.kind, "Processing queue message");

        match self.dispatch(&message).await {
            Ok(()) => {
                self.queue.complete(message.id).await?;
            }
            Err(e) if message.skip_retrying => {
                warn!(
                    message_id = message.id,
                    error = %e,
                    "Dropping failed message, retrying is disabled for it"
                );
                self.queue.complete(message.id).await?;
            }
            Err(e) if message.retry_count < MAX_QUEUE_RETRIES => {
                warn!(
                    message_id = message.id,
                    retry_count = message.retry_count,
                    error = %e,
                    "Retrying queue message"
                );
                self.queue
                    .retry(
                        message.id,
                        &e.to_string(),
                        Utc::now() + chrono::Duration::milliseconds(RETRY_BACKOFF_MS),
                    )
                    .await?;
            }
            Err(e) => {
                error!(
                    message_id = message.id,
                    error = %e,
                    "Moving queue message to the dead letter table after {} retries",
                    message.retry_count
                );
                self.queue.dead_letter(message.id, &e.to_string()).await?;
            }
        }
        Ok(true)
    }

    async fn dispatch(&self, message: &QueueMessage) -> std::result::Result<(), ExecuteError> {
        match &message.kind {
            JobKind::Preprocess { run_id } => self
                .preprocess
                .preprocess(*run_id)
                .await
                .map_err(ExecuteError::from),
            JobKind::ExecuteJob {
                run_id,
                resume_task_id,
            } => {
                let drift_ms = (Utc::now() - message.available_at)
                    .num_milliseconds()
                    .max(0);
                self.execute
                    .execute(
                        ExecuteJobInput {
                            run_id: *run_id,
                            is_retry: message.is_retry,
                            resume_task_id: *resume_task_id,
                        },
                        drift_ms,
                    )
                    .await
            }
            JobKind::ResumeTask { run_id, task_id } => {
                // Dependency-wait resume: the awaited task has completed, so
                // re-execute the run with it now cached.
                debug!(run_id = %run_id, task_id = %task_id, "Resuming run after task completion");
                self.queue
                    .enqueue(
                        JobKind::ExecuteJob {
                            run_id: *run_id,
                            resume_task_id: None,
                        },
                        None,
                        EnqueueOptions {
                            skip_retrying: message.skip_retrying,
                        },
                    )
                    .await
                    .map_err(ExecuteError::from)
            }
            JobKind::DeliverRunSubscriptions { run_id } => {
                // Delivery itself belongs to the subscription service.
                info!(run_id = %run_id, "Run subscriptions ready for delivery");
                Ok(())
            }
        }
    }
}
