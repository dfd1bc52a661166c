//! Yield Coordinator
//!
//! Process-wide registry of runs currently executing a chunk. An
//! out-of-band signal calls `force_yield` to ask the endpoint to yield at
//! its next checkpoint; the flag is consumed when the next body is built
//! and cleared on every resume path. Registration is RAII so a run is
//! deregistered on every exit path, including errors.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use conveyor_core::ports::RunStore;
use conveyor_core::Result;

#[derive(Default)]
pub struct YieldRegistry {
    running: Mutex<HashSet<Uuid>>,
}

impl YieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the run as mid-flight for the lifetime of the returned guard.
    pub fn register(self: &Arc<Self>, run_id: Uuid) -> RunRegistration {
        self.lock().insert(run_id);
        RunRegistration {
            registry: Arc::clone(self),
            run_id,
        }
    }

    pub fn is_registered(&self, run_id: Uuid) -> bool {
        self.lock().contains(&run_id)
    }

    /// Request a mid-flight run to yield at its earliest checkpoint.
    /// Returns whether the run was actually executing a chunk; idle and
    /// terminal runs are left alone.
    pub async fn force_yield(&self, store: &dyn RunStore, run_id: Uuid) -> Result<bool> {
        if !self.is_registered(run_id) {
            return Ok(false);
        }
        store.set_force_yield(run_id, true).await?;
        Ok(true)
    }

    fn deregister(&self, run_id: Uuid) {
        self.lock().remove(&run_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        // A panic while holding the lock leaves the set intact.
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Guard returned by [`YieldRegistry::register`].
pub struct RunRegistration {
    registry: Arc<YieldRegistry>,
    run_id: Uuid,
}

impl Drop for RunRegistration {
    fn drop(&mut self) {
        self.registry.deregister(self.run_id);
    }
}
