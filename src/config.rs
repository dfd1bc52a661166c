//! Coordinator configuration, loaded from the environment.
//!
//! `BLOCKED_ORGS` is deliberately not cached here: the execute driver
//! re-reads it on every call so an operator can block an organisation
//! without a restart.

use uuid::Uuid;

/// Default worker poll interval when the queue is empty.
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default per-request timeout for endpoint calls. Generous on purpose: the
/// endpoint's own chunk timer is the real limit.
const DEFAULT_ENDPOINT_REQUEST_TIMEOUT_MS: u64 = 300_000;

const DEFAULT_DATABASE_POOL_SIZE: u32 = 10;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub database_url: String,
    pub database_pool_size: u32,
    pub worker_id: String,
    pub worker_poll_interval_ms: u64,
    pub endpoint_request_timeout_ms: u64,
    /// Base URL of the connection-auth resolver service.
    pub auth_resolver_url: String,
    /// Base URL of the lower-level task-completion service.
    pub task_completion_url: String,
    /// Compatibility switch for the deprecated `resume_task_id` input.
    pub accept_legacy_resume_task: bool,
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;

        Ok(Self {
            database_url,
            database_pool_size: env_parsed("DATABASE_POOL_SIZE", DEFAULT_DATABASE_POOL_SIZE)?,
            worker_id: std::env::var("WORKER_ID")
                .unwrap_or_else(|_| format!("worker-{}", std::process::id())),
            worker_poll_interval_ms: env_parsed(
                "WORKER_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )?,
            endpoint_request_timeout_ms: env_parsed(
                "ENDPOINT_REQUEST_TIMEOUT_MS",
                DEFAULT_ENDPOINT_REQUEST_TIMEOUT_MS,
            )?,
            auth_resolver_url: std::env::var("AUTH_RESOLVER_URL")
                .unwrap_or_else(|_| "http://localhost:3040".to_string()),
            task_completion_url: std::env::var("TASK_COMPLETION_URL")
                .unwrap_or_else(|_| "http://localhost:3041".to_string()),
            accept_legacy_resume_task: env_parsed("ACCEPT_LEGACY_RESUME_TASK", true)?,
        })
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Whether the organisation is on the blocked list right now. The list is a
/// substring match so operators can paste ids with or without separators.
pub fn organization_is_blocked(organization_id: &Uuid) -> bool {
    match std::env::var("BLOCKED_ORGS") {
        Ok(list) => blocked_list_contains(&list, organization_id),
        Err(_) => false,
    }
}

fn blocked_list_contains(list: &str, organization_id: &Uuid) -> bool {
    !list.is_empty() && list.contains(&organization_id.to_string())
}
