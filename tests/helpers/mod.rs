//! In-memory fakes for the coordinator's ports, plus aggregate fixtures.
//!
//! The fakes mirror the transactional semantics of the Postgres adapters
//! closely enough that the scenario tests exercise the execute driver's
//! real branching.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use conveyor::coordinator::{ExecuteDriver, ExecuteJobInput, PreprocessDriver, YieldRegistry};
use conveyor_core::model::{
    CompletedTaskSummary, ConnectionAuth, Endpoint, Environment, EnvironmentType, EventRecord,
    Job, JobVersion, Organization, Project, Run, RunAggregate, RunConnection, RunStatus,
    SubscriptionEvent, Task, TaskAttempt, TaskAttemptStatus, TaskStatus,
};
use conveyor_core::ports::{
    AutoYieldCheckpoint, ConnectionAuthResolver, EndpointClient, EnqueueOptions, ErroredTask,
    ExecutionEvent, JobKind, JobQueue, QueueMessage, ResumeScheduling, RunStore, TaskCompletion,
    TaskCompletionService, TaskSummary, TelemetrySink, TimeoutProgress,
};
use conveyor_core::wire::{
    EndpointCallOutcome, EndpointHeaders, ExecuteRequest, PreprocessRequest, RawEndpointResponse,
};
use conveyor_core::Result;

// ---------------------------------------------------------------------------
// Store fake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedEnqueue {
    pub kind: JobKind,
    pub available_at: Option<DateTime<Utc>>,
    pub opts: EnqueueOptions,
}

pub struct FakeState {
    pub aggregate: RunAggregate,
    pub tasks: Vec<Task>,
    pub attempts: Vec<TaskAttempt>,
    pub auto_yields: Vec<AutoYieldCheckpoint>,
    pub subscriptions: Vec<(String, SubscriptionEvent)>,
    pub enqueues: Vec<RecordedEnqueue>,
    pub progress: TimeoutProgress,
}

pub struct FakeStore {
    pub state: Mutex<FakeState>,
}

impl FakeStore {
    pub fn new(aggregate: RunAggregate) -> Self {
        Self {
            state: Mutex::new(FakeState {
                aggregate,
                tasks: Vec::new(),
                attempts: Vec::new(),
                auto_yields: Vec::new(),
                subscriptions: Vec::new(),
                enqueues: Vec::new(),
                progress: TimeoutProgress {
                    latest_task: None,
                    task_count: 0,
                },
            }),
        }
    }

    pub fn run(&self) -> Run {
        self.state.lock().unwrap().aggregate.run.clone()
    }

    pub fn endpoint(&self) -> Endpoint {
        self.state.lock().unwrap().aggregate.endpoint.clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().unwrap().tasks.clone()
    }

    pub fn attempts(&self) -> Vec<TaskAttempt> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn auto_yields(&self) -> Vec<AutoYieldCheckpoint> {
        self.state.lock().unwrap().auto_yields.clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, SubscriptionEvent)> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    pub fn enqueues(&self) -> Vec<RecordedEnqueue> {
        self.state.lock().unwrap().enqueues.clone()
    }

    pub fn enqueued_kinds(&self) -> Vec<JobKind> {
        self.enqueues().into_iter().map(|e| e.kind).collect()
    }

    pub fn set_progress(&self, progress: TimeoutProgress) {
        self.state.lock().unwrap().progress = progress;
    }

    pub fn push_task(&self, task: Task) {
        self.state.lock().unwrap().tasks.push(task);
    }

    pub fn push_attempt(&self, attempt: TaskAttempt) {
        self.state.lock().unwrap().attempts.push(attempt);
    }
}

#[async_trait]
impl RunStore for FakeStore {
    async fn load_aggregate(&self, run_id: Uuid) -> Result<Option<RunAggregate>> {
        let state = self.state.lock().unwrap();
        if state.aggregate.run.id == run_id {
            Ok(Some(state.aggregate.clone()))
        } else {
            Ok(None)
        }
    }

    async fn begin_chunk(&self, run_id: Uuid) -> Result<Option<i64>> {
        let mut state = self.state.lock().unwrap();
        let run = &mut state.aggregate.run;
        assert_eq!(run.id, run_id);
        if run.completed_at.is_some() {
            return Ok(None);
        }
        run.execution_count += 1;
        if run.status == RunStatus::Queued {
            run.status = RunStatus::Started;
            if run.started_at.is_none() {
                run.started_at = Some(Utc::now());
            }
        }
        Ok(Some(run.execution_count))
    }

    async fn cancel_blocked_run(&self, run_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let run = &mut state.aggregate.run;
        assert_eq!(run.id, run_id);
        if run.completed_at.is_none() {
            run.status = RunStatus::Canceled;
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn resume_legacy_task(&self, task_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(task) = state.tasks.iter_mut().find(|t| t.id == task_id) {
            if task.noop {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(Utc::now());
            } else {
                task.status = TaskStatus::Running;
            }
        }
        Ok(())
    }

    async fn complete_run(&self, run_id: Uuid, output: Option<Value>, duration_ms: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.aggregate.run.completed_at.is_some() {
            return Ok(());
        }
        {
            let run = &mut state.aggregate.run;
            run.status = RunStatus::Success;
            run.completed_at = Some(Utc::now());
            run.output = output;
            run.execution_duration_ms += duration_ms;
        }
        state.enqueues.push(RecordedEnqueue {
            kind: JobKind::DeliverRunSubscriptions { run_id },
            available_at: None,
            opts: EnqueueOptions::default(),
        });
        Ok(())
    }

    async fn fail_execution(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Value,
        duration_ms: i64,
        cascade_to: TaskStatus,
        errored_task: Option<ErroredTask>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(errored) = errored_task {
            if let Some(task) = state.tasks.iter_mut().find(|t| t.id == errored.id) {
                task.status = TaskStatus::Errored;
                task.completed_at = Some(Utc::now());
                task.output = Some(errored.error);
            }
        }
        if state.aggregate.run.completed_at.is_some() {
            return Ok(());
        }
        {
            let run = &mut state.aggregate.run;
            run.status = status;
            run.completed_at = Some(Utc::now());
            run.output = Some(output);
            run.execution_duration_ms += duration_ms;
            run.force_yield_immediately = false;
        }
        for task in state.tasks.iter_mut() {
            if task.status.is_open() {
                task.status = cascade_to;
                task.completed_at = Some(Utc::now());
            }
        }
        state.enqueues.push(RecordedEnqueue {
            kind: JobKind::DeliverRunSubscriptions { run_id },
            available_at: None,
            opts: EnqueueOptions::default(),
        });
        Ok(())
    }

    async fn fail_preprocess(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Value,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.aggregate.run.completed_at.is_some() {
            return Ok(());
        }
        if status == RunStatus::Aborted {
            let run = &mut state.aggregate.run;
            run.status = RunStatus::Aborted;
            run.completed_at = Some(Utc::now());
            run.output = Some(output);
        } else {
            {
                let run = &mut state.aggregate.run;
                run.status = RunStatus::Started;
                run.started_at = Some(Utc::now());
            }
            state.enqueues.push(RecordedEnqueue {
                kind: JobKind::ExecuteJob {
                    run_id,
                    resume_task_id: None,
                },
                available_at: None,
                opts: enqueue,
            });
        }
        Ok(())
    }

    async fn complete_preprocess(
        &self,
        run_id: Uuid,
        properties: Option<Value>,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.aggregate.run.completed_at.is_some() {
            return Ok(());
        }
        {
            let run = &mut state.aggregate.run;
            run.status = RunStatus::Started;
            run.started_at = Some(Utc::now());
            run.properties = properties;
            run.force_yield_immediately = false;
        }
        state.enqueues.push(RecordedEnqueue {
            kind: JobKind::ExecuteJob {
                run_id,
                resume_task_id: None,
            },
            available_at: None,
            opts: enqueue,
        });
        Ok(())
    }

    async fn record_task_resume(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        output_properties: Option<Value>,
        duration_ms: i64,
        execution_count_delta: i64,
        scheduling: ResumeScheduling,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        {
            let run = &mut state.aggregate.run;
            run.execution_duration_ms += duration_ms;
            run.execution_count += execution_count_delta;
            run.force_yield_immediately = false;
        }
        if let Some(properties) = output_properties {
            if let Some(task) = state.tasks.iter_mut().find(|t| t.id == task_id) {
                task.output_properties = Some(properties);
            }
        }
        if let ResumeScheduling::Enqueue(run_at) = scheduling {
            state.enqueues.push(RecordedEnqueue {
                kind: JobKind::ResumeTask { run_id, task_id },
                available_at: run_at,
                opts: EnqueueOptions::default(),
            });
        }
        Ok(())
    }

    async fn record_task_retry(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        error: Value,
        retry_at: DateTime<Utc>,
        duration_ms: i64,
        execution_count_delta: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let latest_pending = state
            .attempts
            .iter_mut()
            .filter(|a| a.task_id == task_id && a.status == TaskAttemptStatus::Pending)
            .max_by_key(|a| a.number);
        if let Some(attempt) = latest_pending {
            attempt.status = TaskAttemptStatus::Errored;
            attempt.error = Some(error.clone());
        }

        let next_number = state
            .attempts
            .iter()
            .filter(|a| a.task_id == task_id)
            .map(|a| a.number)
            .max()
            .unwrap_or(0)
            + 1;
        state.attempts.push(TaskAttempt {
            task_id,
            number: next_number,
            status: TaskAttemptStatus::Pending,
            run_at: Some(retry_at),
            error: None,
            created_at: Utc::now(),
        });

        if let Some(task) = state.tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Waiting;
        }

        {
            let run = &mut state.aggregate.run;
            run.execution_duration_ms += duration_ms;
            run.execution_count += execution_count_delta;
        }

        state.enqueues.push(RecordedEnqueue {
            kind: JobKind::ResumeTask { run_id, task_id },
            available_at: Some(retry_at),
            opts: EnqueueOptions::default(),
        });
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
        let mut state = self.state.lock().unwrap();
        if state.aggregate.run.completed_at.is_some() {
            return Ok(());
        }
        {
            let run = &mut state.aggregate.run;
            run.yielded_executions.push(key);
            run.execution_duration_ms += duration_ms;
            run.execution_count += execution_count_delta;
            run.force_yield_immediately = false;
        }
        state.enqueues.push(RecordedEnqueue {
            kind: JobKind::ExecuteJob {
                run_id,
                resume_task_id: None,
            },
            available_at: None,
            opts: enqueue,
        });
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
        let mut state = self.state.lock().unwrap();
        state.auto_yields.push(checkpoint);
        {
            let run = &mut state.aggregate.run;
            run.execution_duration_ms += duration_ms;
            run.execution_count += execution_count_delta;
            run.force_yield_immediately = false;
        }
        if let Some(opts) = enqueue {
            state.enqueues.push(RecordedEnqueue {
                kind: JobKind::ExecuteJob {
                    run_id,
                    resume_task_id: None,
                },
                available_at: None,
                opts,
            });
        }
        Ok(())
    }

    async fn record_parallel_resume(
        &self,
        _run_id: Uuid,
        task_id: Uuid,
        output_properties: Option<Value>,
        duration_ms: i64,
        execution_count_delta: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        {
            let run = &mut state.aggregate.run;
            run.execution_duration_ms += duration_ms;
            run.execution_count += execution_count_delta;
            run.force_yield_immediately = false;
        }
        if let Some(properties) = output_properties {
            if let Some(task) = state.tasks.iter_mut().find(|t| t.id == task_id) {
                task.output_properties = Some(properties);
            }
        }
        Ok(())
    }

    async fn resume_after_timeout(
        &self,
        run_id: Uuid,
        duration_ms: i64,
        chunk_limit_ms: i64,
        enqueue: EnqueueOptions,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        {
            let run = &mut state.aggregate.run;
            run.execution_duration_ms += duration_ms;
            run.force_yield_immediately = false;
        }
        state.aggregate.endpoint.run_chunk_execution_limit_ms = chunk_limit_ms;
        state.enqueues.push(RecordedEnqueue {
            kind: JobKind::ExecuteJob {
                run_id,
                resume_task_id: None,
            },
            available_at: None,
            opts: enqueue,
        });
        Ok(())
    }

    async fn timeout_progress(&self, _run_id: Uuid) -> Result<TimeoutProgress> {
        Ok(self.state.lock().unwrap().progress.clone())
    }

    async fn update_endpoint_version(&self, _endpoint_id: Uuid, version: &str) -> Result<()> {
        self.state.lock().unwrap().aggregate.endpoint.version = Some(version.to_string());
        Ok(())
    }

    async fn upsert_subscription(
        &self,
        _run_id: Uuid,
        recipient: &str,
        event: SubscriptionEvent,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let row = (recipient.to_string(), event);
        if !state.subscriptions.contains(&row) {
            state.subscriptions.push(row);
        }
        Ok(())
    }

    async fn set_force_yield(&self, _run_id: Uuid, force: bool) -> Result<()> {
        self.state.lock().unwrap().aggregate.run.force_yield_immediately = force;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue / client / resolver / completion / telemetry fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeQueue {
    pub enqueues: Mutex<Vec<RecordedEnqueue>>,
}

#[async_trait]
impl JobQueue for FakeQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        available_at: Option<DateTime<Utc>>,
        opts: EnqueueOptions,
    ) -> Result<()> {
        self.enqueues.lock().unwrap().push(RecordedEnqueue {
            kind,
            available_at,
            opts,
        });
        Ok(())
    }

    async fn claim(&self) -> Result<Option<QueueMessage>> {
        Ok(None)
    }

    async fn complete(&self, _message_id: i64) -> Result<()> {
        Ok(())
    }

    async fn retry(&self, _message_id: i64, _error: &str, _available_at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    async fn dead_letter(&self, _message_id: i64, _error: &str) -> Result<()> {
        Ok(())
    }
}

pub struct FakeEndpointClient {
    pub outcomes: Mutex<VecDeque<EndpointCallOutcome>>,
    pub execute_requests: Mutex<Vec<ExecuteRequest>>,
    pub preprocess_requests: Mutex<Vec<PreprocessRequest>>,
}

impl FakeEndpointClient {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            execute_requests: Mutex::new(Vec::new()),
            preprocess_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, outcome: EndpointCallOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn execute_requests(&self) -> Vec<ExecuteRequest> {
        self.execute_requests.lock().unwrap().clone()
    }

    fn next_outcome(&self) -> EndpointCallOutcome {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted endpoint outcome left")
    }
}

#[async_trait]
impl EndpointClient for FakeEndpointClient {
    async fn preprocess(
        &self,
        _endpoint: &Endpoint,
        body: &PreprocessRequest,
    ) -> Result<EndpointCallOutcome> {
        self.preprocess_requests.lock().unwrap().push(body.clone());
        Ok(self.next_outcome())
    }

    async fn execute(
        &self,
        _endpoint: &Endpoint,
        body: &ExecuteRequest,
    ) -> Result<EndpointCallOutcome> {
        self.execute_requests.lock().unwrap().push(body.clone());
        Ok(self.next_outcome())
    }
}

#[derive(Default)]
pub struct FakeAuthResolver {
    pub fail_with: Mutex<Option<String>>,
    pub auth: Mutex<HashMap<String, ConnectionAuth>>,
}

#[async_trait]
impl ConnectionAuthResolver for FakeAuthResolver {
    async fn resolve(
        &self,
        _connections: &[RunConnection],
    ) -> Result<HashMap<String, ConnectionAuth>> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(conveyor_core::CoordinatorError::InvalidInput(message));
        }
        Ok(self.auth.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeTaskCompletion {
    pub completions: Mutex<Vec<(Uuid, Uuid, Option<Value>, Option<Value>)>>,
}

#[async_trait]
impl TaskCompletionService for FakeTaskCompletion {
    async fn complete_task(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        completion: TaskCompletion,
    ) -> Result<()> {
        self.completions.lock().unwrap().push((
            run_id,
            task_id,
            completion.properties,
            completion.output,
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTelemetry {
    pub events: Mutex<Vec<ExecutionEvent>>,
}

#[async_trait]
impl TelemetrySink for FakeTelemetry {
    async fn execution_event(&self, event: ExecutionEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A QUEUED run with a lazy-protocol endpoint and no tasks.
pub fn sample_aggregate() -> RunAggregate {
    let run_id = Uuid::new_v4();
    let organization_id = Uuid::new_v4();
    let project_id = Uuid::new_v4();
    let environment_id = Uuid::new_v4();
    let endpoint_id = Uuid::new_v4();
    let event_id = Uuid::new_v4();
    let job_id = Uuid::new_v4();
    let job_version_id = Uuid::new_v4();

    RunAggregate {
        run: Run {
            id: run_id,
            status: RunStatus::Queued,
            started_at: None,
            completed_at: None,
            execution_count: 0,
            execution_duration_ms: 0,
            yielded_executions: Vec::new(),
            output: None,
            properties: None,
            force_yield_immediately: false,
            is_test: false,
            internal: false,
            environment_id,
            endpoint_id,
            organization_id,
            project_id,
            external_account_id: None,
            event_id,
            job_version_id,
            created_at: Utc::now(),
        },
        environment: Environment {
            id: environment_id,
            slug: "prod".into(),
            env_type: EnvironmentType::Production,
        },
        endpoint: Endpoint {
            id: endpoint_id,
            url: "https://example.test/api/trigger".into(),
            api_key: "tr_prod_abc123".into(),
            version: Some("2023-09-27".into()),
            run_chunk_execution_limit_ms: 60_000,
            start_task_threshold_ms: 750,
            before_execute_task_threshold_ms: 1_500,
            before_complete_task_threshold_ms: 750,
            after_complete_task_threshold_ms: 750,
        },
        organization: Organization {
            id: organization_id,
            slug: "acme".into(),
            title: "Acme Inc".into(),
            maximum_execution_time_per_run_ms: 900_000,
        },
        project: Project {
            id: project_id,
            name: "acme-jobs".into(),
        },
        external_account: None,
        run_connections: Vec::new(),
        completed_tasks: Vec::new(),
        event: EventRecord {
            id: event_id,
            name: "order.created".into(),
            payload: serde_json::json!({ "orderId": 42 }),
            context: None,
            source_context: None,
            timestamp: Utc::now(),
        },
        job: Job {
            id: job_id,
            slug: "process-order".into(),
            title: "Process order".into(),
        },
        version: JobVersion {
            id: job_version_id,
            job_id,
            version: "1.0.0".into(),
        },
        subscriptions: Vec::new(),
        task_count: 0,
    }
}

pub fn completed_task(idempotency_key: &str, noop: bool) -> CompletedTaskSummary {
    CompletedTaskSummary {
        id: Uuid::new_v4(),
        idempotency_key: idempotency_key.to_string(),
        status: TaskStatus::Completed,
        noop,
        output: Some(serde_json::json!({ "done": true })),
        output_is_undefined: false,
        parent_id: None,
    }
}

pub fn open_task(run_id: Uuid, idempotency_key: &str, status: TaskStatus) -> Task {
    Task {
        id: Uuid::new_v4(),
        run_id,
        idempotency_key: idempotency_key.to_string(),
        status,
        noop: false,
        output: None,
        output_is_undefined: false,
        output_properties: None,
        parent_id: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<FakeStore>,
    pub queue: Arc<FakeQueue>,
    pub client: Arc<FakeEndpointClient>,
    pub resolver: Arc<FakeAuthResolver>,
    pub completion: Arc<FakeTaskCompletion>,
    pub telemetry: Arc<FakeTelemetry>,
    pub registry: Arc<YieldRegistry>,
    pub driver: ExecuteDriver,
    pub preprocess: PreprocessDriver,
}

pub fn harness(aggregate: RunAggregate) -> Harness {
    let store = Arc::new(FakeStore::new(aggregate));
    let queue = Arc::new(FakeQueue::default());
    let client = Arc::new(FakeEndpointClient::new());
    let resolver = Arc::new(FakeAuthResolver::default());
    let completion = Arc::new(FakeTaskCompletion::default());
    let telemetry = Arc::new(FakeTelemetry::default());
    let registry = Arc::new(YieldRegistry::new());

    let driver = ExecuteDriver::new(
        store.clone(),
        queue.clone(),
        client.clone(),
        resolver.clone(),
        completion.clone(),
        telemetry.clone(),
        registry.clone(),
        true,
    );
    let preprocess = PreprocessDriver::new(store.clone(), client.clone());

    Harness {
        store,
        queue,
        client,
        resolver,
        completion,
        telemetry,
        registry,
        driver,
        preprocess,
    }
}

pub fn input(run_id: Uuid) -> ExecuteJobInput {
    ExecuteJobInput {
        run_id,
        is_retry: false,
        resume_task_id: None,
    }
}

pub fn ok_response(body: &str, duration_ms: i64) -> EndpointCallOutcome {
    status_response(200, body, duration_ms)
}

pub fn status_response(status: u16, body: &str, duration_ms: i64) -> EndpointCallOutcome {
    EndpointCallOutcome::Response(RawEndpointResponse {
        status,
        headers: EndpointHeaders::default(),
        body: body.to_string(),
        duration_ms,
        timed_out: false,
    })
}

pub fn response_with_headers(
    body: &str,
    duration_ms: i64,
    headers: EndpointHeaders,
) -> EndpointCallOutcome {
    EndpointCallOutcome::Response(RawEndpointResponse {
        status: 200,
        headers,
        body: body.to_string(),
        duration_ms,
        timed_out: false,
    })
}

/// The timeout-progress snapshot a chunk that created `task_count` tasks
/// would leave behind.
pub fn progress(latest_task: Option<TaskSummary>, task_count: i64) -> TimeoutProgress {
    TimeoutProgress {
        latest_task,
        task_count,
    }
}
