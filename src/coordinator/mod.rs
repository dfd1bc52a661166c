//! The run coordinator: preprocess driver, execute driver (the state
//! machine), failure classification, and the yield registry.

pub mod execute;
pub mod failure;
pub mod preprocess;
pub mod yield_registry;

pub use execute::{ExecuteDriver, ExecuteJobInput};
pub use preprocess::PreprocessDriver;
pub use yield_registry::{RunRegistration, YieldRegistry};

use thiserror::Error;

use conveyor_core::model::RunAggregate;
use conveyor_core::wire::AccountInfo;
use conveyor_core::CoordinatorError;

/// Outcome type of the execute driver. The only exception-like control flow
/// in the coordinator is the retry variant: the worker loop interprets it as
/// "reschedule this queue message".
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("retrying run execution: {message}")]
    Retry {
        message: String,
        output: Option<serde_json::Value>,
    },
    #[error(transparent)]
    Internal(#[from] CoordinatorError),
}

pub(crate) fn account_info(aggregate: &RunAggregate) -> Option<AccountInfo> {
    aggregate
        .external_account
        .as_ref()
        .map(|account| AccountInfo {
            id: account.identifier.clone(),
            metadata: account.metadata.clone(),
        })
}
