//! The Run entity (spec §3) — one end-to-end analysis of a paper set
//! against a research query.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;
use super::result::ResultData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Converged,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal states are monotone: once entered, a Run never mutates
    /// again except for `completed_at` (spec §3 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Converged => "converged",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub workspace_id: String,
    pub owner_id: String,
    pub query: String,
    pub domains: Vec<String>,
    pub max_iterations: u32,
    pub convergence_threshold: f64,
    pub status: RunStatus,
    pub current_iteration: u32,
    pub progress_percentage: u32,
    pub results: Option<ResultData>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

impl Run {
    pub fn new(
        workspace_id: impl Into<String>,
        owner_id: impl Into<String>,
        query: impl Into<String>,
        domains: Vec<String>,
        max_iterations: u32,
        convergence_threshold: f64,
    ) -> Self {
        let now = now_ms();
        Self {
            run_id: generate_id(),
            workspace_id: workspace_id.into(),
            owner_id: owner_id.into(),
            query: query.into(),
            domains,
            max_iterations: max_iterations.clamp(1, 10),
            convergence_threshold: convergence_threshold.clamp(0.0, 1.0),
            status: RunStatus::Pending,
            current_iteration: 0,
            progress_percentage: 0,
            results: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(now_ms());
        self.updated_at = now_ms();
    }

    pub fn set_progress(&mut self, iteration: u32) {
        self.current_iteration = iteration;
        let pct = ((100 * iteration) / self.max_iterations.max(1)).min(99);
        self.progress_percentage = self.progress_percentage.max(pct);
        self.updated_at = now_ms();
    }

    pub fn finish(&mut self, status: RunStatus, results: Option<ResultData>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.results = results;
        self.progress_percentage = 100;
        self.completed_at = Some(now_ms());
        self.updated_at = now_ms();
    }

    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(now_ms());
        self.updated_at = now_ms();
        true
    }
}

impl Record for Run {
    fn id(&self) -> &str {
        &self.run_id
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "runs"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".into(), IndexValue::String(self.status.to_string()));
        fields.insert("workspace_id".into(), IndexValue::String(self.workspace_id.clone()));
        fields.insert("owner_id".into(), IndexValue::String(self.owner_id.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_bounds() {
        let run = Run::new("ws", "user", "q", vec![], 99, 2.0);
        assert_eq!(run.max_iterations, 10);
        assert_eq!(run.convergence_threshold, 1.0);
    }

    #[test]
    fn progress_is_monotone_nondecreasing() {
        let mut run = Run::new("ws", "user", "q", vec![], 4, 0.5);
        run.set_progress(1);
        assert_eq!(run.progress_percentage, 25);
        run.set_progress(1);
        assert_eq!(run.progress_percentage, 25);
        run.set_progress(3);
        assert_eq!(run.progress_percentage, 75);
    }

    #[test]
    fn progress_caps_below_terminal_percentage() {
        let mut run = Run::new("ws", "user", "q", vec![], 1, 0.5);
        run.set_progress(1);
        assert_eq!(run.progress_percentage, 99);
    }

    #[test]
    fn cancel_is_rejected_once_terminal() {
        let mut run = Run::new("ws", "user", "q", vec![], 1, 0.5);
        run.finish(RunStatus::Completed, None);
        assert!(!run.cancel());
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn cancel_succeeds_from_running() {
        let mut run = Run::new("ws", "user", "q", vec![], 1, 0.5);
        run.start();
        assert!(run.cancel());
        assert_eq!(run.status, RunStatus::Cancelled);
    }
}
