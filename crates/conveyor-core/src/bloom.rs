//! No-op Task Bloom Filter
//!
//! Probabilistic set of idempotency keys for tasks that completed as no-ops.
//! The endpoint treats membership as "probably a cached no-op", so false
//! positives are acceptable; false negatives are not. Probe positions come
//! from double hashing over a SHA-256 digest, and the filter serialises to a
//! hex string so it can travel in the execute body.

use sha2::{Digest, Sha256};

use crate::model::{CompletedTaskSummary, TaskStatus};
use crate::{NOOP_TASK_SET_HASHES, NOOP_TASK_SET_SIZE};

/// Fixed-size Bloom filter over task idempotency keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoopTaskSet {
    bits: Vec<u8>,
}

impl NoopTaskSet {
    pub fn new() -> Self {
        Self {
            bits: vec![0u8; NOOP_TASK_SET_SIZE / 8],
        }
    }

    pub fn insert(&mut self, key: &str) {
        for index in probe_indices(key) {
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        probe_indices(key).all(|index| self.bits[index / 8] & (1 << (index % 8)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }

    /// Hex form embedded in the execute body.
    pub fn serialize(&self) -> String {
        hex::encode(&self.bits)
    }

    pub fn deserialize(raw: &str) -> Result<Self, String> {
        let bits = hex::decode(raw).map_err(|e| format!("Invalid noop task set: {}", e))?;
        if bits.len() != NOOP_TASK_SET_SIZE / 8 {
            return Err(format!(
                "Invalid noop task set length: {} bytes",
                bits.len()
            ));
        }
        Ok(Self { bits })
    }
}

impl Default for NoopTaskSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Double hashing: split one SHA-256 digest into two 64-bit lanes and derive
/// every probe position from them. Deterministic across processes.
fn probe_indices(key: &str) -> impl Iterator<Item = usize> {
    let digest = Sha256::digest(key.as_bytes());
    let mut h1 = [0u8; 8];
    let mut h2 = [0u8; 8];
    h1.copy_from_slice(&digest[0..8]);
    h2.copy_from_slice(&digest[8..16]);
    let h1 = u64::from_be_bytes(h1);
    let h2 = u64::from_be_bytes(h2);
    (0..NOOP_TASK_SET_HASHES as u64)
        .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % NOOP_TASK_SET_SIZE as u64) as usize)
}

/// Build the filter over every `COMPLETED` no-op task.
pub fn prepare_noop_tasks_bloom_filter(tasks: &[CompletedTaskSummary]) -> NoopTaskSet {
    let mut set = NoopTaskSet::new();
    for task in tasks {
        if task.status == TaskStatus::Completed && task.noop {
            set.insert(&task.idempotency_key);
        }
    }
    set
}
