//! The Result Record entity (spec §3) — the terminal payload of a run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPriority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for GapPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct GapScores {
    pub importance: f64,
    pub novelty: f64,
    pub feasibility: f64,
    pub impact: f64,
    pub confidence: f64,
}

impl GapScores {
    /// The fixed-weight composite of spec §4.4.3 step 2.
    pub fn composite(&self) -> f64 {
        0.35 * self.importance + 0.25 * self.novelty + 0.20 * self.feasibility + 0.20 * self.impact
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedGap {
    pub gap: String,
    pub theme: String,
    pub priority: GapPriority,
    pub rationale: String,
    pub scores: GapScores,
    pub ranking: u32,
    pub evidence_paper_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResultData {
    #[serde(rename = "rankedGaps")]
    pub ranked_gaps: Vec<RankedGap>,
    #[serde(rename = "crossDomainPatterns")]
    pub cross_domain_patterns: Vec<serde_json::Value>,
    #[serde(rename = "researchFrontiers")]
    pub research_frontiers: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub result_id: String,
    pub run_id: String,
    pub data: ResultData,
    pub created_at: i64,
}

impl ResultRecord {
    pub fn new(run_id: impl Into<String>, data: ResultData) -> Self {
        Self {
            result_id: generate_id(),
            run_id: run_id.into(),
            data,
            created_at: now_ms(),
        }
    }
}

impl Record for ResultRecord {
    fn id(&self) -> &str {
        // run_id is the natural key: at most one result record per run
        // (spec §3). Using it as the id turns "create once" into the
        // store's own uniqueness guarantee.
        &self.run_id
    }
    fn updated_at(&self) -> i64 {
        self.created_at
    }
    fn collection_name() -> &'static str {
        "results"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("run_id".into(), IndexValue::String(self.run_id.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_matches_fixed_weights() {
        let scores = GapScores {
            importance: 1.0,
            novelty: 1.0,
            feasibility: 1.0,
            impact: 1.0,
            confidence: 0.9,
        };
        assert!((scores.composite() - 1.0).abs() < 1e-9);
    }
}
