//! Preprocess Driver
//!
//! Runs the PREPROCESS step: one call to the endpoint's preprocess route,
//! then either an abort, a recorded failure, or the transition to `STARTED`
//! with an execute chunk enqueued. The endpoint is never retried from here;
//! failures other than an abort are transient and the run proceeds to
//! execution regardless.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use conveyor_core::model::{EnvironmentType, RunAggregate, RunStatus};
use conveyor_core::ports::{EndpointClient, EnqueueOptions, RunStore};
use conveyor_core::wire::{
    EndpointCallOutcome, EnvironmentInfo, EventEnvelope, JobIdentity, OrganizationInfo,
    PreprocessRequest, PreprocessResponse, PreprocessRunInfo,
};
use conveyor_core::Result;

use super::account_info;

pub struct PreprocessDriver {
    store: Arc<dyn RunStore>,
    client: Arc<dyn EndpointClient>,
}

impl PreprocessDriver {
    pub fn new(store: Arc<dyn RunStore>, client: Arc<dyn EndpointClient>) -> Self {
        Self { store, client }
    }

    pub async fn preprocess(&self, run_id: Uuid) -> Result<()> {
        let Some(aggregate) = self.store.load_aggregate(run_id).await? else {
            debug!(run_id = %run_id, "Preprocess for unknown run, skipping");
            return Ok(());
        };

        if aggregate.run.is_terminal() {
            debug!(run_id = %run_id, "Preprocess for terminal run, skipping");
            return Ok(());
        }

        let request = build_preprocess_request(&aggregate);
        let outcome = self.client.preprocess(&aggregate.endpoint, &request).await?;

        let enqueue = EnqueueOptions {
            skip_retrying: aggregate.environment.env_type == EnvironmentType::Development,
        };

        let raw = match outcome {
            EndpointCallOutcome::NoResponse { message, .. } => {
                warn!(run_id = %run_id, %message, "Preprocess got no response");
                return self
                    .store
                    .fail_preprocess(
                        run_id,
                        RunStatus::Failure,
                        json!({ "message": format!("Could not connect to endpoint: {}", message) }),
                        enqueue,
                    )
                    .await;
            }
            EndpointCallOutcome::Response(raw) => raw,
        };

        if !raw.is_success() {
            return self
                .store
                .fail_preprocess(
                    run_id,
                    RunStatus::Failure,
                    json!({
                        "message": format!("Endpoint responded with {} status", raw.status)
                    }),
                    enqueue,
                )
                .await;
        }

        let body = match serde_json::from_str::<PreprocessResponse>(&raw.body) {
            Ok(body) => body,
            Err(e) => {
                return self
                    .store
                    .fail_preprocess(
                        run_id,
                        RunStatus::Failure,
                        json!({
                            "message": format!("Endpoint returned an invalid preprocess response: {}", e)
                        }),
                        enqueue,
                    )
                    .await;
            }
        };

        if body.abort {
            return self
                .store
                .fail_preprocess(
                    run_id,
                    RunStatus::Aborted,
                    json!({ "message": "Endpoint aborted the run during preprocessing" }),
                    enqueue,
                )
                .await;
        }

        self.store
            .complete_preprocess(run_id, body.properties, enqueue)
            .await
    }
}

fn build_preprocess_request(aggregate: &RunAggregate) -> PreprocessRequest {
    PreprocessRequest {
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
        run: PreprocessRunInfo {
            id: aggregate.run.id,
            is_test: aggregate.run.is_test,
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
    }
}
