//! Structured-output payloads the Micro and Meso agents produce, plus
//! the plain-function text similarity helpers shared by clustering and
//! dedup (spec §4.4.2). No embedding provider is in scope, so these
//! treat gap/paper text as bag-of-words vectors over a shared token
//! space — a model-agnostic stand-in for an embedding similarity.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::GapPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapType {
    StatedFutureWork,
    StatedLimitation,
    InferredGap,
    MethodologicalGap,
}

impl GapType {
    /// Explicit gaps come from the paper's own text; inferred ones are
    /// the agent's synthesis (spec §4.4.1 step 3).
    pub fn source(self) -> &'static str {
        match self {
            Self::StatedFutureWork | Self::StatedLimitation => "paper_explicit",
            Self::InferredGap | Self::MethodologicalGap => "inferred",
        }
    }
}

fn default_confidence() -> f64 {
    0.75
}

/// One gap as extracted by a Micro agent, after post-processing
/// (`source` derived, `confidence` defaulted, `paper_id`/`paper_title`
/// stamped — spec §4.4.1 steps 3-4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroGap {
    pub description: String,
    #[serde(rename = "type")]
    pub gap_type: GapType,
    pub priority: GapPriority,
    pub rationale: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub paper_id: String,
    #[serde(default)]
    pub paper_title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MicroOutput {
    #[serde(rename = "researchGaps")]
    pub research_gaps: Vec<MicroGap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MesoTheme {
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifiedGapBucket {
    pub priority: GapPriority,
    pub count: u32,
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MesoCluster {
    pub theme: MesoTheme,
    pub papers: Vec<String>,
    #[serde(rename = "identifiedGaps")]
    pub identified_gaps: Vec<IdentifiedGapBucket>,
    pub cohesion: f64,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MesoOutput {
    pub clusters: Vec<MesoCluster>,
}

/// Lowercased, alphanumeric-run tokenization. Shared by Jaccard dedup
/// and the bag-of-words cosine clustering measure.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Normalized Jaccard similarity over token sets (spec §4.4.2 gap
/// dedup threshold 0.7).
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 { 0.0 } else { intersection as f64 / union as f64 }
}

fn term_frequency(text: &str) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    counts
}

/// Cosine similarity between two texts' term-frequency vectors, used as
/// the model-agnostic "embedding space" for cluster assignment (spec
/// §4.4.2 threshold 0.6).
pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    let va = term_frequency(a);
    let vb = term_frequency(b);
    let dot: f64 = va.iter().map(|(k, v)| v * vb.get(k).copied().unwrap_or(0.0)).sum();
    let norm_a = va.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = vb.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot / (norm_a * norm_b) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_of_identical_sets_is_one() {
        let a = token_set("limited generalization across domains");
        let b = token_set("limited generalization across domains");
        assert!((jaccard(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_of_disjoint_sets_is_zero() {
        let a = token_set("apples and oranges");
        let b = token_set("quantum computing hardware");
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn cosine_similarity_rewards_shared_vocabulary() {
        let high = cosine_similarity(
            "lack of cross domain evaluation for the proposed method",
            "the method lacks cross domain evaluation entirely",
        );
        let low = cosine_similarity(
            "lack of cross domain evaluation for the proposed method",
            "unrelated discussion of hardware power budgets",
        );
        assert!(high > low);
    }

    #[test]
    fn gap_type_source_mapping() {
        assert_eq!(GapType::StatedLimitation.source(), "paper_explicit");
        assert_eq!(GapType::InferredGap.source(), "inferred");
    }
}
