//! One scheduler per named queue: a FIFO binary heap of waiting jobs, a
//! running set bounded by the queue's concurrency limit, a sliding-window
//! rate limiter, and a retry/backoff ledger.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use super::config::QueueConfig;
use super::job::{Job, JobState, JobStatus, ScheduledJob};

struct SchedulerInner {
    queue: BinaryHeap<ScheduledJob>,
    running: HashMap<String, ScheduledJob>,
    statuses: HashMap<String, JobStatus>,
    request_times: VecDeque<Instant>,
}

pub struct Scheduler {
    name: &'static str,
    config: QueueConfig,
    inner: Mutex<SchedulerInner>,
    notify: Notify,
}

impl Scheduler {
    pub fn new(name: &'static str, config: QueueConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(SchedulerInner {
                queue: BinaryHeap::new(),
                running: HashMap::new(),
                statuses: HashMap::new(),
                request_times: VecDeque::new(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Admit a job. Never blocks: `enqueue` only appends to the waiting
    /// heap, the broker absorbs backpressure (spec §4.3).
    pub async fn enqueue(&self, job: Job) -> String {
        let job_id = job.job_id.clone();
        let mut inner = self.inner.lock().await;
        inner.statuses.insert(
            job_id.clone(),
            JobStatus {
                state: JobState::Queued,
                attempt: 0,
                progress: 0,
                last_error: None,
            },
        );
        inner.queue.push(ScheduledJob {
            job,
            attempt: 0,
            submitted_at: Instant::now(),
            started_at: None,
        });
        debug!(queue = self.name, job_id = %job_id, "enqueued");
        self.notify.notify_waiters();
        job_id
    }

    pub async fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.inner.lock().await.statuses.get(job_id).cloned()
    }

    /// Pull the next job a worker may run, respecting the concurrency
    /// limit and the sliding-window rate limit. Suspends until a slot is
    /// free.
    pub async fn next_job(&self) -> Job {
        loop {
            {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();
                let window_start = now - self.config.rate_window();
                while inner.request_times.front().map(|t| *t < window_start).unwrap_or(false) {
                    inner.request_times.pop_front();
                }
                if inner.running.len() < self.config.max_concurrent
                    && inner.request_times.len() < self.config.max_requests_per_window as usize
                {
                    if let Some(mut scheduled) = inner.queue.pop() {
                        scheduled.started_at = Some(now);
                        scheduled.attempt += 1;
                        inner.request_times.push_back(now);
                        if let Some(status) = inner.statuses.get_mut(&scheduled.job.job_id) {
                            status.state = JobState::Running;
                            status.attempt = scheduled.attempt;
                        }
                        let job = scheduled.job.clone();
                        inner.running.insert(job.job_id.clone(), scheduled);
                        return job;
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn succeed(&self, job_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.running.remove(job_id);
        if let Some(status) = inner.statuses.get_mut(job_id) {
            status.state = JobState::Succeeded;
            status.progress = 100;
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Record a failed attempt. While attempts remain, the job is
    /// re-queued after an exponential backoff; once `max_attempts` is
    /// exhausted the job is left failed and `true` is returned so the
    /// caller can raise a `job_failed` signal to the orchestrator.
    pub async fn fail(&self, job_id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        let removed = {
            let mut inner = self.inner.lock().await;
            let removed = inner.running.remove(job_id);
            if let Some(scheduled) = &removed {
                let exhausted = scheduled.attempt >= scheduled.job.max_attempts;
                if let Some(status) = inner.statuses.get_mut(job_id) {
                    status.last_error = Some(error.clone());
                    status.state = if exhausted { JobState::Failed } else { JobState::Queued };
                }
            }
            removed
        };
        self.notify.notify_waiters();
        let Some(scheduled) = removed else {
            return false;
        };
        if scheduled.attempt >= scheduled.job.max_attempts {
            warn!(queue = self.name, job_id, attempts = scheduled.attempt, "job exhausted max attempts");
            return true;
        }
        let backoff = self.config.backoff_for(scheduled.attempt);
        tokio::time::sleep(backoff).await;
        let mut inner = self.inner.lock().await;
        inner.queue.push(ScheduledJob {
            job: scheduled.job,
            attempt: scheduled.attempt,
            submitted_at: Instant::now(),
            started_at: None,
        });
        drop(inner);
        self.notify.notify_waiters();
        false
    }

    /// Drain every queued or running job tagged with `run_id`. The
    /// caller emits one terminal log entry per drained job (spec §4.3
    /// cancellation).
    pub async fn cancel_run(&self, run_id: &str) -> Vec<Job> {
        let mut inner = self.inner.lock().await;
        let mut drained = Vec::new();
        let waiting: Vec<ScheduledJob> = inner.queue.drain().collect();
        for scheduled in waiting {
            if scheduled.job.run_id == run_id {
                drained.push(scheduled.job);
            } else {
                inner.queue.push(scheduled);
            }
        }
        let running_ids: Vec<String> = inner
            .running
            .iter()
            .filter(|(_, s)| s.job.run_id == run_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in running_ids {
            if let Some(scheduled) = inner.running.remove(&id) {
                drained.push(scheduled.job);
            }
        }
        for job in &drained {
            inner.statuses.remove(&job.job_id);
        }
        drop(inner);
        self.notify.notify_waiters();
        drained
    }

    pub async fn depth(&self) -> usize {
        self.inner.lock().await.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, run_id: &str) -> Job {
        Job::new(id, run_id, serde_json::json!({}), 3)
    }

    #[tokio::test]
    async fn concurrency_limit_queues_excess_jobs() {
        let scheduler = Scheduler::new("micro", QueueConfig { max_concurrent: 1, ..Default::default() });
        scheduler.enqueue(job("a", "run-1")).await;
        scheduler.enqueue(job("b", "run-1")).await;
        let first = scheduler.next_job().await;
        assert_eq!(first.job_id, "a");
        assert_eq!(scheduler.depth().await, 1);
    }

    #[tokio::test]
    async fn failed_job_is_requeued_until_attempts_exhausted() {
        let scheduler = Scheduler::new(
            "micro",
            QueueConfig { max_concurrent: 1, base_backoff_ms: 1, ..Default::default() },
        );
        scheduler.enqueue(Job::new("a", "run-1", serde_json::json!({}), 2)).await;
        scheduler.next_job().await;
        assert!(!scheduler.fail("a", "boom").await);
        let retried = scheduler.next_job().await;
        assert_eq!(retried.job_id, "a");
        assert!(scheduler.fail("a", "boom again").await);
        let status = scheduler.status("a").await.unwrap();
        assert_eq!(status.state, JobState::Failed);
    }

    #[tokio::test]
    async fn cancel_run_drains_only_matching_jobs() {
        let scheduler = Scheduler::new("micro", QueueConfig { max_concurrent: 5, ..Default::default() });
        scheduler.enqueue(job("a", "run-1")).await;
        scheduler.enqueue(job("b", "run-2")).await;
        let drained = scheduler.cancel_run("run-1").await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].job_id, "a");
        assert_eq!(scheduler.depth().await, 1);
    }
}
