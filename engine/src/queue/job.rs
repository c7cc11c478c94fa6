//! A unit of work flowing through a named queue.

use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub attempt: u32,
    pub progress: u32,
    pub last_error: Option<String>,
}

/// A queued job. `payload` is opaque JSON the worker on the other end
/// deserializes; `run_id` is only used for cancellation draining.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub run_id: String,
    pub payload: serde_json::Value,
    pub max_attempts: u32,
}

impl Job {
    pub fn new(job_id: impl Into<String>, run_id: impl Into<String>, payload: serde_json::Value, max_attempts: u32) -> Self {
        Self {
            job_id: job_id.into(),
            run_id: run_id.into(),
            payload,
            max_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ScheduledJob {
    pub job: Job,
    pub attempt: u32,
    pub submitted_at: Instant,
    pub started_at: Option<Instant>,
}

impl Eq for ScheduledJob {}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.job.job_id == other.job.job_id
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // FIFO within a queue: earlier submission sorts greater so it
        // surfaces first out of the max-heap.
        other.submitted_at.cmp(&self.submitted_at)
    }
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
