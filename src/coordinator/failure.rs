//! Failure & Retry Policy
//!
//! Maps an endpoint call outcome onto the state machine's branches. Only the
//! retry branch propagates upward (the queue reschedules the message); every
//! other branch is a normal return that the drivers persist through the
//! store.

use serde_json::json;

use conveyor_core::model::{RunStatus, TaskStatus};
use conveyor_core::wire::{EndpointCallOutcome, ErrorPayload, ExecuteResponse};

/// One branch of the response classification table.
#[derive(Debug)]
pub enum Classification {
    /// Transport-level trouble: throw upward so the queue reschedules.
    Retry {
        message: String,
        output: Option<serde_json::Value>,
    },
    /// Non-retryable failure persisted through `fail_execution`.
    Fail {
        status: RunStatus,
        output: serde_json::Value,
        duration_ms: i64,
    },
    /// Recognised endpoint timeout; the timeout-resume path decides whether
    /// it was forward progress.
    Timeout { duration_ms: i64 },
    /// A schema-valid body to dispatch on.
    Response {
        response: ExecuteResponse,
        duration_ms: i64,
    },
}

/// Classify an execute-route outcome. Order matters and follows the state
/// machine: no response, unhealthy status, invalid body, valid body.
pub fn classify_execute_outcome(outcome: EndpointCallOutcome) -> Classification {
    let raw = match outcome {
        EndpointCallOutcome::NoResponse { message, .. } => {
            return Classification::Retry {
                message: format!("Could not connect to endpoint: {}", message),
                output: None,
            }
        }
        EndpointCallOutcome::Response(raw) => raw,
    };

    if !raw.is_success() {
        // A schema-valid error body decides retryability by status class.
        if let Ok(error) = serde_json::from_str::<ErrorPayload>(&raw.body) {
            let payload = json!(error);
            if raw.is_client_error() {
                return Classification::Fail {
                    status: RunStatus::Failure,
                    output: payload,
                    duration_ms: raw.duration_ms,
                };
            }
            return Classification::Retry {
                message: error.message,
                output: Some(payload),
            };
        }

        if raw.is_client_error() && raw.status != 408 {
            return Classification::Fail {
                status: RunStatus::Failure,
                output: json!({
                    "message": format!("Endpoint responded with {} status", raw.status)
                }),
                duration_ms: raw.duration_ms,
            };
        }

        if raw.is_timeout() {
            return Classification::Timeout {
                duration_ms: raw.duration_ms,
            };
        }

        return Classification::Retry {
            message: format!("Endpoint responded with {} status", raw.status),
            output: None,
        };
    }

    match serde_json::from_str::<ExecuteResponse>(&raw.body) {
        Ok(response) => Classification::Response {
            response,
            duration_ms: raw.duration_ms,
        },
        Err(e) => Classification::Fail {
            status: RunStatus::Failure,
            output: json!({
                "message": format!("Endpoint returned an invalid execution response: {}", e)
            }),
            duration_ms: raw.duration_ms,
        },
    }
}

/// Open tasks of a failed run collapse to `CANCELED` on a timeout and
/// `ERRORED` on everything else.
pub fn cascade_status_for(run_status: RunStatus) -> TaskStatus {
    match run_status {
        RunStatus::TimedOut => TaskStatus::Canceled,
        _ => TaskStatus::Errored,
    }
}
