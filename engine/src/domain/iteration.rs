//! The Iteration entity (spec §3) — one Micro→Meso→Meta refinement cycle.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    #[default]
    Active,
    Succeeded,
    Failed,
}

impl std::fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub iteration_id: String,
    pub run_id: String,
    pub iteration_number: u32,
    pub status: IterationStatus,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    /// Present iff `status == Succeeded` (spec §8 quantified invariant).
    pub convergence_score: Option<f64>,
    pub updated_at: i64,
}

impl Iteration {
    pub fn new(run_id: impl Into<String>, iteration_number: u32) -> Self {
        let now = now_ms();
        Self {
            iteration_id: generate_id(),
            run_id: run_id.into(),
            iteration_number,
            status: IterationStatus::Active,
            started_at: now,
            ended_at: None,
            convergence_score: None,
            updated_at: now,
        }
    }

    pub fn succeed(&mut self, convergence_score: f64) {
        self.status = IterationStatus::Succeeded;
        self.convergence_score = Some(convergence_score);
        self.ended_at = Some(now_ms());
        self.updated_at = now_ms();
    }

    pub fn fail(&mut self) {
        self.status = IterationStatus::Failed;
        self.convergence_score = None;
        self.ended_at = Some(now_ms());
        self.updated_at = now_ms();
    }
}

impl Record for Iteration {
    fn id(&self) -> &str {
        &self.iteration_id
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "iterations"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("run_id".into(), IndexValue::String(self.run_id.clone()));
        fields.insert("status".into(), IndexValue::String(self.status.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convergence_score_absent_unless_succeeded() {
        let mut it = Iteration::new("run-1", 1);
        assert!(it.convergence_score.is_none());
        it.fail();
        assert!(it.convergence_score.is_none());

        let mut it = Iteration::new("run-1", 1);
        it.succeed(0.8);
        assert_eq!(it.convergence_score, Some(0.8));
    }
}
