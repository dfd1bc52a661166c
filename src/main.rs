//! Conveyor Worker
//!
//! Entry point for the run coordinator worker process.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor::config::CoordinatorConfig;
use conveyor::coordinator::{ExecuteDriver, PreprocessDriver, YieldRegistry};
use conveyor::endpoint::HttpEndpointClient;
use conveyor::services::{HttpConnectionAuthResolver, HttpTaskCompletionClient};
use conveyor::telemetry::LoggingTelemetrySink;
use conveyor::worker::RunWorker;
use conveyor_postgres::{PgJobQueue, PgRunStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Conveyor run worker");

    let config = CoordinatorConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_pool_size)
        .connect(&config.database_url)
        .await?;

    tracing::info!(
        worker_id = %config.worker_id,
        pool_size = config.database_pool_size,
        "Connected to database"
    );

    let store = Arc::new(PgRunStore::new(pool.clone()));
    let queue = Arc::new(PgJobQueue::new(pool));
    let client = Arc::new(HttpEndpointClient::new(Duration::from_millis(
        config.endpoint_request_timeout_ms,
    ))?);
    let auth_resolver = Arc::new(HttpConnectionAuthResolver::new(&config.auth_resolver_url));
    let task_completion = Arc::new(HttpTaskCompletionClient::new(&config.task_completion_url));
    let telemetry = Arc::new(LoggingTelemetrySink);
    let yield_registry = Arc::new(YieldRegistry::new());

    let preprocess = Arc::new(PreprocessDriver::new(store.clone(), client.clone()));
    let execute = Arc::new(ExecuteDriver::new(
        store,
        queue.clone(),
        client,
        auth_resolver,
        task_completion,
        telemetry,
        yield_registry,
        config.accept_legacy_resume_task,
    ));

    let worker = RunWorker::new(
        queue,
        preprocess,
        execute,
        Duration::from_millis(config.worker_poll_interval_ms),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;

    tracing::info!("Conveyor run worker stopped");
    Ok(())
}
