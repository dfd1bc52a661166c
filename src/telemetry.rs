//! Execution-event telemetry.
//!
//! The real sink is an external collaborator; this implementation emits
//! structured tracing events, which is what the worker binary ships with.
//! Emission is best-effort and never interrupts the state machine.

use async_trait::async_trait;

use conveyor_core::ports::{ExecutionEvent, ExecutionEventType, TelemetrySink};
use conveyor_core::Result;

pub struct LoggingTelemetrySink;

#[async_trait]
impl TelemetrySink for LoggingTelemetrySink {
    async fn execution_event(&self, event: ExecutionEvent) -> Result<()> {
        let event_type = match event.event_type {
            ExecutionEventType::Start => "start",
            ExecutionEventType::Finish => "finish",
        };
        tracing::info!(
            event_type,
            event_time = %event.event_time,
            drift_ms = event.drift_ms,
            organization_id = %event.organization_id,
            environment_id = %event.environment_id,
            project_id = %event.project_id,
            job_id = %event.job_id,
            run_id = %event.run_id,
            "Run execution event"
        );
        Ok(())
    }
}
