//! Per-execution lock registry
//!
//! Engine operations against the same execution id must not interleave:
//! the state machine's preconditions are validated against a loaded copy
//! and would be unsound under concurrent mutation. Each execution id maps
//! to one async mutex, created on first use.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-execution async locks.
#[derive(Default)]
pub struct LockRegistry {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for an execution id, creating it on first use.
    /// The guard serializes every engine operation on that execution.
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry for a retired execution. Safe to call while a
    /// guard is held; existing guards keep their mutex alive via Arc.
    pub async fn retire(&self, id: &str) {
        let mut map = self.inner.lock().await;
        map.remove(id);
    }

    /// Number of tracked executions (diagnostics).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
