//! Per-run mutual exclusion: guards against two orchestrator drivers
//! (e.g. a redelivered `orchestrator` queue job) racing the same run's
//! iteration (spec §4.5 fence acquisition).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct RunFence {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RunFence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, run_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(run_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_for_first_to_drop() {
        let fence = RunFence::new();
        let guard = fence.acquire("run-1").await;
        let fence2 = fence.clone();
        let handle = tokio::spawn(async move {
            let _guard = fence2.acquire("run-1").await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn distinct_runs_do_not_contend() {
        let fence = RunFence::new();
        let _a = fence.acquire("run-1").await;
        let b = tokio::time::timeout(std::time::Duration::from_millis(50), fence.acquire("run-2")).await;
        assert!(b.is_ok());
    }
}
