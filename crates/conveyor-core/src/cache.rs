//! Cached-Task Packing
//!
//! Deterministically selects a prefix of a run's completed tasks to embed in
//! the execute body without blowing the serialised byte budget. Endpoints on
//! the lazy-cached-tasks protocol receive a cursor pointing at the first
//! task that did not fit, so they can page in the rest on demand; legacy
//! endpoints just get the prefix.

use crate::model::CompletedTaskSummary;
use crate::wire::CachedTask;

/// Result of packing tasks under a byte budget.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTasks {
    pub tasks: Vec<CachedTask>,
    /// Id of the first task that did not fit, as an opaque page cursor.
    pub cursor: Option<String>,
}

impl From<&CompletedTaskSummary> for CachedTask {
    fn from(task: &CompletedTaskSummary) -> Self {
        Self {
            id: task.id,
            idempotency_key: task.idempotency_key.clone(),
            status: task.status,
            noop: task.noop,
            // An undefined output is omitted from the body entirely so the
            // endpoint can tell it apart from a JSON null.
            output: if task.output_is_undefined {
                None
            } else {
                task.output.clone()
            },
            parent_id: task.parent_id,
        }
    }
}

/// Pack a prefix of `tasks` (already ordered ascending by id) whose
/// serialised size stays within `byte_limit`.
pub fn prepare_tasks(tasks: &[CompletedTaskSummary], byte_limit: usize) -> PreparedTasks {
    let mut packed = Vec::new();
    let mut used = 0usize;

    for (index, task) in tasks.iter().enumerate() {
        let wire = CachedTask::from(task);
        let size = serialized_size(&wire);
        if used + size > byte_limit {
            return PreparedTasks {
                tasks: packed,
                cursor: Some(tasks[index].id.to_string()),
            };
        }
        used += size;
        packed.push(wire);
    }

    PreparedTasks {
        tasks: packed,
        cursor: None,
    }
}

/// Legacy packing for endpoints that predate cursors: same prefix rule, no
/// continuation.
pub fn prepare_legacy_tasks(tasks: &[CompletedTaskSummary], byte_limit: usize) -> Vec<CachedTask> {
    prepare_tasks(tasks, byte_limit).tasks
}

fn serialized_size(task: &CachedTask) -> usize {
    // Serialising a CachedTask cannot fail: every field is a plain value.
    serde_json::to_string(task).map(|s| s.len()).unwrap_or(0)
}
