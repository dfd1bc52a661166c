//! HTTP clients for the coordinator's internal collaborators: the
//! connection-auth resolver and the lower-level task-completion service.
//! Error bodies are reduced to their message, mirroring how the endpoint
//! client treats unhealthy responses.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use conveyor_core::model::{ConnectionAuth, RunConnection};
use conveyor_core::ports::{ConnectionAuthResolver, TaskCompletion, TaskCompletionService};
use conveyor_core::{CoordinatorError, Result};

fn joined(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(body);
    format!("HTTP {}: {}", status, message)
}

/// Resolves run connections to materialised credentials.
pub struct HttpConnectionAuthResolver {
    base_url: String,
    client: reqwest::Client,
}

impl HttpConnectionAuthResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResolveConnectionsRequest<'a> {
    connections: &'a [RunConnection],
}

#[async_trait]
impl ConnectionAuthResolver for HttpConnectionAuthResolver {
    async fn resolve(
        &self,
        connections: &[RunConnection],
    ) -> Result<HashMap<String, ConnectionAuth>> {
        if connections.is_empty() {
            return Ok(HashMap::new());
        }

        let response = self
            .client
            .post(joined(&self.base_url, "/resolve"))
            .json(&ResolveConnectionsRequest { connections })
            .send()
            .await
            .map_err(|e| CoordinatorError::Internal(e.into()))?;

        if !response.status().is_success() {
            return Err(CoordinatorError::InvalidInput(
                error_message(response).await,
            ));
        }

        response
            .json::<HashMap<String, ConnectionAuth>>()
            .await
            .map_err(|e| CoordinatorError::Internal(e.into()))
    }
}

/// Completes a task on behalf of an auto-yielding endpoint.
pub struct HttpTaskCompletionClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTaskCompletionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteTaskRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<serde_json::Value>,
}

#[async_trait]
impl TaskCompletionService for HttpTaskCompletionClient {
    async fn complete_task(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        completion: TaskCompletion,
    ) -> Result<()> {
        let response = self
            .client
            .post(joined(
                &self.base_url,
                &format!("/runs/{}/tasks/{}/complete", run_id, task_id),
            ))
            .json(&CompleteTaskRequest {
                properties: completion.properties,
                output: completion.output,
            })
            .send()
            .await
            .map_err(|e| CoordinatorError::Internal(e.into()))?;

        if !response.status().is_success() {
            return Err(CoordinatorError::Conflict(error_message(response).await));
        }
        Ok(())
    }
}
