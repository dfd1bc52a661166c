//! Execute Driver
//!
//! Runs one EXECUTE_JOB chunk: preflight checks, body construction, the
//! endpoint HTTP call, header side-effects, response classification, and the
//! persistence + enqueue for whichever of the response variants came back.
//! Everything the endpoint reports for a chunk lands in a single store
//! transaction, so an observer sees the whole outcome or none of it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use conveyor_core::bloom::prepare_noop_tasks_bloom_filter;
use conveyor_core::cache::{prepare_legacy_tasks, prepare_tasks};
use conveyor_core::model::{
    ConnectionAuth, EnvironmentType, RunAggregate, RunStatus, SubscriptionEvent, TaskStatus,
};
use conveyor_core::ports::{
    AutoYieldCheckpoint, ConnectionAuthResolver, EndpointClient, EnqueueOptions, ErroredTask,
    ExecutionEvent, ExecutionEventType, JobKind, JobQueue, ResumeScheduling, RunStore,
    TaskCompletion, TaskCompletionService, TelemetrySink,
};
use conveyor_core::wire::{
    AutoYieldConfig, EndpointCallOutcome, EndpointHeaders, EnvironmentInfo, EventEnvelope,
    ExecuteRequest, ExecuteResponse, ExecuteRunInfo, JobIdentity, OrganizationInfo,
};
use conveyor_core::{
    CoordinatorError, Result, MAX_RUN_CHUNK_EXECUTION_LIMIT, MAX_RUN_YIELDED_EXECUTIONS,
    MIN_RUN_CHUNK_EXECUTION_LIMIT, RUN_CHUNK_EXECUTION_BUFFER, TOTAL_CACHED_TASK_BYTE_LIMIT,
};

use super::failure::{cascade_status_for, classify_execute_outcome, Classification};
use super::yield_registry::YieldRegistry;
use super::{account_info, ExecuteError};
use crate::config;

/// One message's worth of work, as delivered by the queue.
#[derive(Debug, Clone)]
pub struct ExecuteJobInput {
    pub run_id: Uuid,
    pub is_retry: bool,
    /// Deprecated resume path, honoured behind a compatibility flag.
    pub resume_task_id: Option<Uuid>,
}

pub struct ExecuteDriver {
    store: Arc<dyn RunStore>,
    queue: Arc<dyn JobQueue>,
    client: Arc<dyn EndpointClient>,
    auth_resolver: Arc<dyn ConnectionAuthResolver>,
    task_completion: Arc<dyn TaskCompletionService>,
    telemetry: Arc<dyn TelemetrySink>,
    yield_registry: Arc<YieldRegistry>,
    accept_legacy_resume_task: bool,
}

impl ExecuteDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RunStore>,
        queue: Arc<dyn JobQueue>,
        client: Arc<dyn EndpointClient>,
        auth_resolver: Arc<dyn ConnectionAuthResolver>,
        task_completion: Arc<dyn TaskCompletionService>,
        telemetry: Arc<dyn TelemetrySink>,
        yield_registry: Arc<YieldRegistry>,
        accept_legacy_resume_task: bool,
    ) -> Self {
        Self {
            store,
            queue,
            client,
            auth_resolver,
            task_completion,
            telemetry,
            yield_registry,
            accept_legacy_resume_task,
        }
    }

    /// Run one chunk. `drift_ms` is how late the queue delivered the
    /// message.
    pub async fn execute(
        &self,
        input: ExecuteJobInput,
        drift_ms: i64,
    ) -> std::result::Result<(), ExecuteError> {
        // Registered for the lifetime of the call; the guard deregisters on
        // every exit path.
        let _registration = self.yield_registry.register(input.run_id);

        let Some(aggregate) = self.store.load_aggregate(input.run_id).await? else {
            debug!(run_id = %input.run_id, "Execution for unknown run, skipping");
            return Ok(());
        };

        let run_id = aggregate.run.id;

        if aggregate.run.status == RunStatus::Canceled {
            debug!(run_id = %run_id, "Run is canceled, skipping execution");
            return Ok(());
        }
        if aggregate.run.is_terminal() {
            debug!(run_id = %run_id, status = %aggregate.run.status, "Run is terminal, skipping execution");
            return Ok(());
        }

        if config::organization_is_blocked(&aggregate.organization.id) {
            warn!(
                run_id = %run_id,
                organization_id = %aggregate.organization.id,
                "Organization is blocked, canceling run"
            );
            self.store.cancel_blocked_run(run_id).await?;
            return Ok(());
        }

        let Some(execution_count) = self.store.begin_chunk(run_id).await? else {
            // The run turned terminal between the load and the increment.
            return Ok(());
        };

        let connections = match self.auth_resolver.resolve(&aggregate.run_connections).await {
            Ok(connections) => connections,
            Err(e) => {
                self.store
                    .fail_execution(
                        run_id,
                        RunStatus::Failure,
                        json!({
                            "message": format!("Failed to resolve run connections: {}", e)
                        }),
                        0,
                        TaskStatus::Errored,
                        None,
                    )
                    .await?;
                return Ok(());
            }
        };

        if let Some(task_id) = input.resume_task_id {
            if self.accept_legacy_resume_task {
                self.store.resume_legacy_task(task_id).await?;
            } else {
                warn!(run_id = %run_id, task_id = %task_id, "Ignoring deprecated resume task id");
            }
        }

        let request =
            build_execute_request(&aggregate, connections, execution_count, input.is_retry);

        self.emit_event(&aggregate, ExecutionEventType::Start, drift_ms)
            .await;
        let outcome = self.client.execute(&aggregate.endpoint, &request).await?;
        self.emit_event(&aggregate, ExecutionEventType::Finish, 0)
            .await;

        if let EndpointCallOutcome::Response(raw) = &outcome {
            self.apply_header_side_effects(&aggregate, &raw.headers)
                .await?;
        }

        let enqueue = EnqueueOptions {
            skip_retrying: aggregate.environment.env_type == EnvironmentType::Development,
        };

        match classify_execute_outcome(outcome) {
            Classification::Retry { message, output } => {
                warn!(run_id = %run_id, %message, "Retryable endpoint failure");
                Err(ExecuteError::Retry { message, output })
            }
            Classification::Fail {
                status,
                output,
                duration_ms,
            } => {
                self.store
                    .fail_execution(
                        run_id,
                        status,
                        output,
                        duration_ms,
                        cascade_status_for(status),
                        None,
                    )
                    .await?;
                Ok(())
            }
            Classification::Timeout { duration_ms } => {
                self.handle_timeout(&aggregate, duration_ms, enqueue)
                    .await?;
                Ok(())
            }
            Classification::Response {
                response,
                duration_ms,
            } => {
                self.handle_response(&aggregate, response, duration_ms, enqueue)
                    .await?;
                Ok(())
            }
        }
    }

    /// Update the endpoint version and subscription rows the response
    /// headers asked for. Upserts are idempotent, so redelivery is safe.
    async fn apply_header_side_effects(
        &self,
        aggregate: &RunAggregate,
        headers: &EndpointHeaders,
    ) -> Result<()> {
        if let Some(version) = &headers.trigger_version {
            if aggregate.endpoint.version.as_deref() != Some(version.as_str()) {
                self.store
                    .update_endpoint_version(aggregate.endpoint.id, version)
                    .await?;
            }
        }

        let Some(metadata) = &headers.run_metadata else {
            return Ok(());
        };
        if aggregate.run.internal {
            return Ok(());
        }

        let recipient = aggregate.endpoint.id.to_string();
        if metadata.success_subscription == Some(true) {
            self.store
                .upsert_subscription(aggregate.run.id, &recipient, SubscriptionEvent::Success)
                .await?;
        }
        if metadata.failed_subscription == Some(true) {
            self.store
                .upsert_subscription(aggregate.run.id, &recipient, SubscriptionEvent::Failure)
                .await?;
        }
        Ok(())
    }

    /// Timeout-resume path: fatal when the cumulative budget is gone or the
    /// chunk made no progress, otherwise an adaptive retune and re-enqueue.
    async fn handle_timeout(
        &self,
        aggregate: &RunAggregate,
        duration_ms: i64,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        let run = &aggregate.run;
        let maximum = aggregate.organization.maximum_execution_time_per_run_ms;

        if run.execution_duration_ms + duration_ms >= maximum {
            return self
                .store
                .fail_execution(
                    run.id,
                    RunStatus::TimedOut,
                    json!({
                        "message": format!(
                            "Run exceeded the maximum execution time of {} ms for this organization",
                            maximum
                        )
                    }),
                    duration_ms,
                    cascade_status_for(RunStatus::TimedOut),
                    None,
                )
                .await;
        }

        let progress = self.store.timeout_progress(run.id).await?;
        if progress.task_count == aggregate.task_count {
            // Nothing was created during the timed-out chunk, so re-running
            // it would time out the same way.
            let message = match &progress.latest_task {
                Some(task) if task.status == TaskStatus::Running => format!(
                    "Endpoint timed out while running task \"{}\" and created no new task",
                    task.idempotency_key
                ),
                _ => "Endpoint timed out while running code outside a task and created no new task"
                    .to_string(),
            };
            return self
                .store
                .fail_execution(
                    run.id,
                    RunStatus::TimedOut,
                    json!({ "message": message }),
                    duration_ms,
                    cascade_status_for(RunStatus::TimedOut),
                    None,
                )
                .await;
        }

        let chunk_limit = duration_ms.clamp(
            MIN_RUN_CHUNK_EXECUTION_LIMIT,
            MAX_RUN_CHUNK_EXECUTION_LIMIT,
        );
        self.store
            .resume_after_timeout(run.id, duration_ms, chunk_limit, enqueue)
            .await
    }

    /// Dispatch a schema-valid response. The parallel variant does its own
    /// parent accounting and replays each child through the simple handler
    /// with zeroed duration and count.
    async fn handle_response(
        &self,
        aggregate: &RunAggregate,
        response: ExecuteResponse,
        duration_ms: i64,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        match response {
            ExecuteResponse::ResumeWithParallelTask { task, child_errors } => {
                self.store
                    .record_parallel_resume(
                        aggregate.run.id,
                        task.id,
                        task.output_properties,
                        duration_ms,
                        0,
                    )
                    .await?;

                for child in child_errors {
                    // The first terminal error wins and short-circuits the
                    // remaining children.
                    let terminal = matches!(
                        child,
                        ExecuteResponse::Error { .. }
                            | ExecuteResponse::InvalidPayload { .. }
                            | ExecuteResponse::UnresolvedAuth { .. }
                    );
                    match child {
                        ExecuteResponse::Success { .. }
                        | ExecuteResponse::ResumeWithParallelTask { .. } => {
                            warn!(
                                run_id = %aggregate.run.id,
                                "Ignoring unexpected child outcome of a parallel resume"
                            );
                        }
                        other => {
                            self.apply_simple_response(aggregate, other, 0, 0, enqueue)
                                .await?;
                        }
                    }
                    if terminal {
                        break;
                    }
                }
                Ok(())
            }
            // The chunk was already counted in preflight, so the variant
            // handlers apply a zero execution-count delta.
            other => {
                self.apply_simple_response(aggregate, other, duration_ms, 0, enqueue)
                    .await
            }
        }
    }

    async fn apply_simple_response(
        &self,
        aggregate: &RunAggregate,
        response: ExecuteResponse,
        duration_ms: i64,
        execution_count_delta: i64,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        let run_id = aggregate.run.id;
        match response {
            ExecuteResponse::Success { output } => {
                self.store.complete_run(run_id, output, duration_ms).await
            }
            ExecuteResponse::Error { error, task } => {
                let errored_task = task.map(|t| ErroredTask {
                    id: t.id,
                    error: json!(error),
                });
                self.store
                    .fail_execution(
                        run_id,
                        RunStatus::Failure,
                        json!(error),
                        duration_ms,
                        cascade_status_for(RunStatus::Failure),
                        errored_task,
                    )
                    .await
            }
            ExecuteResponse::InvalidPayload { errors } => {
                self.store
                    .fail_execution(
                        run_id,
                        RunStatus::InvalidPayload,
                        errors,
                        duration_ms,
                        cascade_status_for(RunStatus::InvalidPayload),
                        None,
                    )
                    .await
            }
            ExecuteResponse::UnresolvedAuth { issues } => {
                self.store
                    .fail_execution(
                        run_id,
                        RunStatus::UnresolvedAuth,
                        issues,
                        duration_ms,
                        cascade_status_for(RunStatus::UnresolvedAuth),
                        None,
                    )
                    .await
            }
            ExecuteResponse::Canceled {} => {
                // Cancellation is observed at the top of the next chunk.
                debug!(run_id = %run_id, "Endpoint observed a canceled run");
                Ok(())
            }
            ExecuteResponse::ResumeWithTask { task } => {
                let scheduling = if task.operation.is_none() && task.callback_url.is_none() {
                    ResumeScheduling::Enqueue(task.delay_until)
                } else {
                    // An external completion path will enqueue the resume.
                    ResumeScheduling::External
                };
                self.store
                    .record_task_resume(
                        run_id,
                        task.id,
                        task.output_properties,
                        duration_ms,
                        execution_count_delta,
                        scheduling,
                    )
                    .await
            }
            ExecuteResponse::RetryWithTask {
                task,
                error,
                retry_at,
            } => {
                self.store
                    .record_task_retry(
                        run_id,
                        task.id,
                        json!(error),
                        retry_at,
                        duration_ms,
                        execution_count_delta,
                    )
                    .await
            }
            ExecuteResponse::YieldExecution { key } => {
                if aggregate.run.yielded_executions.len() + 1 > MAX_RUN_YIELDED_EXECUTIONS {
                    return self
                        .store
                        .fail_execution(
                            run_id,
                            RunStatus::Failure,
                            json!({
                                "message": format!(
                                    "Run yielded too many times: the maximum is {}",
                                    MAX_RUN_YIELDED_EXECUTIONS
                                )
                            }),
                            duration_ms,
                            cascade_status_for(RunStatus::Failure),
                            None,
                        )
                        .await;
                }
                self.store
                    .append_yield(run_id, key, duration_ms, execution_count_delta, enqueue)
                    .await
            }
            ExecuteResponse::AutoYieldExecution {
                location,
                time_remaining,
                time_elapsed,
                limit,
            } => {
                self.store
                    .record_auto_yield(
                        run_id,
                        AutoYieldCheckpoint {
                            location,
                            time_remaining_ms: time_remaining,
                            time_elapsed_ms: time_elapsed,
                            limit_ms: limit.unwrap_or(0),
                        },
                        duration_ms,
                        execution_count_delta,
                        Some(enqueue),
                    )
                    .await
            }
            ExecuteResponse::AutoYieldExecutionWithCompletedTask {
                id,
                properties,
                output,
                location,
                time_remaining,
                time_elapsed,
                limit,
            } => {
                self.store
                    .record_auto_yield(
                        run_id,
                        AutoYieldCheckpoint {
                            location,
                            time_remaining_ms: time_remaining,
                            time_elapsed_ms: time_elapsed,
                            limit_ms: limit.unwrap_or(0),
                        },
                        duration_ms,
                        execution_count_delta,
                        None,
                    )
                    .await?;

                let parsed_output = output
                    .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                    .transpose()
                    .map_err(CoordinatorError::from)?;
                self.task_completion
                    .complete_task(
                        run_id,
                        id,
                        TaskCompletion {
                            properties,
                            output: parsed_output,
                        },
                    )
                    .await?;

                // Enqueued after the external completion so the next chunk
                // sees the completed task.
                self.queue
                    .enqueue(
                        JobKind::ExecuteJob {
                            run_id,
                            resume_task_id: None,
                        },
                        None,
                        enqueue,
                    )
                    .await
            }
            ExecuteResponse::ResumeWithParallelTask { .. } => {
                warn!(run_id = %run_id, "Ignoring nested parallel resume");
                Ok(())
            }
        }
    }

    async fn emit_event(
        &self,
        aggregate: &RunAggregate,
        event_type: ExecutionEventType,
        drift_ms: i64,
    ) {
        let event = ExecutionEvent {
            event_type,
            event_time: Utc::now(),
            drift_ms,
            organization_id: aggregate.organization.id,
            environment_id: aggregate.environment.id,
            project_id: aggregate.project.id,
            job_id: aggregate.job.id,
            run_id: aggregate.run.id,
        };
        if let Err(e) = self.telemetry.execution_event(event).await {
            warn!(run_id = %aggregate.run.id, error = %e, "Failed to record execution event");
        }
    }
}

/// Build the execute body. Old endpoints get legacy packing only; endpoints
/// on the lazy-cached-tasks protocol additionally get the cursor, the no-op
/// Bloom filter, yielded-execution replay, the buffered chunk limit, and the
/// auto-yield thresholds.
pub fn build_execute_request(
    aggregate: &RunAggregate,
    connections: HashMap<String, ConnectionAuth>,
    execution_count: i64,
    is_retry: bool,
) -> ExecuteRequest {
    let lazy = aggregate.endpoint.supports_lazy_loaded_cached_tasks();

    let (tasks, cached_task_cursor) = if lazy {
        let prepared = prepare_tasks(&aggregate.completed_tasks, TOTAL_CACHED_TASK_BYTE_LIMIT);
        (prepared.tasks, prepared.cursor)
    } else {
        (
            prepare_legacy_tasks(&aggregate.completed_tasks, TOTAL_CACHED_TASK_BYTE_LIMIT),
            None,
        )
    };

    let noop_tasks_set = if lazy {
        let set = prepare_noop_tasks_bloom_filter(&aggregate.completed_tasks);
        if set.is_empty() {
            None
        } else {
            Some(set.serialize())
        }
    } else {
        None
    };

    ExecuteRequest {
        event: EventEnvelope {
            id: aggregate.event.id,
            name: aggregate.event.name.clone(),
            payload: aggregate.event.payload.clone(),
            context: aggregate.event.context.clone(),
            timestamp: aggregate.event.timestamp,
        },
        job: JobIdentity {
            id: aggregate.job.slug.clone(),
            version: aggregate.version.version.clone(),
        },
        run: ExecuteRunInfo {
            id: aggregate.run.id,
            is_test: aggregate.run.is_test,
            is_retry,
            started_at: aggregate.run.started_at,
            execution_count,
        },
        environment: EnvironmentInfo {
            id: aggregate.environment.id,
            slug: aggregate.environment.slug.clone(),
            env_type: aggregate.environment.env_type,
        },
        organization: OrganizationInfo {
            id: aggregate.organization.id,
            slug: aggregate.organization.slug.clone(),
            title: aggregate.organization.title.clone(),
        },
        account: account_info(aggregate),
        connections,
        // Parsed best-effort: the endpoint treats it as opaque context.
        source: aggregate.event.source_context.clone(),
        tasks,
        cached_task_cursor,
        noop_tasks_set,
        yielded_executions: lazy.then(|| aggregate.run.yielded_executions.clone()),
        run_chunk_execution_limit: lazy.then(|| {
            aggregate.endpoint.run_chunk_execution_limit_ms - RUN_CHUNK_EXECUTION_BUFFER
        }),
        auto_yield_config: lazy.then(|| AutoYieldConfig {
            start_task_threshold: aggregate.endpoint.start_task_threshold_ms,
            before_execute_task_threshold: aggregate.endpoint.before_execute_task_threshold_ms,
            before_complete_task_threshold: aggregate.endpoint.before_complete_task_threshold_ms,
            after_complete_task_threshold: aggregate.endpoint.after_complete_task_threshold_ms,
        }),
        force_yield_immediately: aggregate.run.force_yield_immediately,
    }
}
