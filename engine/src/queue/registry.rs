//! Owns the four named queues and dispatches `enqueue`/`status`/worker
//! registration by name (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use super::config::QueueConfig;
use super::core::Scheduler;
use super::job::{Job, JobStatus};

pub const QUEUE_NAMES: [&str; 4] = ["micro", "meso", "meta", "orchestrator"];

pub struct QueueRegistry {
    queues: HashMap<&'static str, Arc<Scheduler>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        let queues = QUEUE_NAMES
            .into_iter()
            .map(|name| (name, Arc::new(Scheduler::new(name, QueueConfig::for_queue(name)))))
            .collect();
        Self { queues }
    }

    pub fn queue(&self, name: &str) -> Option<Arc<Scheduler>> {
        self.queues.get(name).cloned()
    }

    pub async fn enqueue(&self, name: &str, job: Job) -> Option<String> {
        Some(self.queue(name)?.enqueue(job).await)
    }

    pub async fn status(&self, name: &str, job_id: &str) -> Option<JobStatus> {
        self.queue(name)?.status(job_id).await
    }

    /// Drain every pending/running job for `run_id` across all four
    /// queues (spec §4.3 cancellation).
    pub async fn cancel_run(&self, run_id: &str) -> Vec<Job> {
        let mut drained = Vec::new();
        for name in QUEUE_NAMES {
            if let Some(queue) = self.queue(name) {
                drained.extend(queue.cancel_run(run_id).await);
            }
        }
        drained
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let registry = QueueRegistry::new();
        let job_id = registry.enqueue("micro", Job::new("a", "run-1", serde_json::json!({}), 3)).await;
        assert_eq!(job_id, Some("a".to_string()));
        assert!(registry.status("micro", "a").await.is_some());
        assert!(registry.status("nonexistent", "a").await.is_none());
    }

    #[tokio::test]
    async fn cancel_run_sweeps_all_queues() {
        let registry = QueueRegistry::new();
        registry.enqueue("micro", Job::new("a", "run-1", serde_json::json!({}), 3)).await;
        registry.enqueue("meso", Job::new("b", "run-1", serde_json::json!({}), 3)).await;
        registry.enqueue("meta", Job::new("c", "run-2", serde_json::json!({}), 3)).await;
        let drained = registry.cancel_run("run-1").await;
        assert_eq!(drained.len(), 2);
    }
}
