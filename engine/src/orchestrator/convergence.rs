//! Convergence scoring (spec §4.5): the fraction of the current
//! iteration's top-10 ranked gaps that match a prior iteration's top-10
//! by normalized text, weighted by composite score.

use crate::domain::RankedGap;
use crate::workers::schemas::{jaccard, token_set};

/// Two gap descriptions are treated as "the same gap" once their
/// token-Jaccard similarity clears this bar.
const MATCH_THRESHOLD: f64 = 0.7;
const TOP_N: usize = 10;

/// Iteration 1 has no prior to compare against and always scores 0
/// (spec §4.5) — callers should special-case that rather than calling
/// this with an empty `prior`, since an empty prior is indistinguishable
/// from "nothing matched" here.
pub fn score(current: &[RankedGap], prior: &[RankedGap]) -> f64 {
    if prior.is_empty() {
        return 0.0;
    }
    let current_top = &current[..current.len().min(TOP_N)];
    let prior_top = &prior[..prior.len().min(TOP_N)];

    let total_weight: f64 = current_top.iter().map(|g| g.scores.composite()).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }

    let matched_weight: f64 = current_top
        .iter()
        .filter(|gap| {
            let tokens = token_set(&gap.gap);
            prior_top.iter().any(|prior_gap| jaccard(&tokens, &token_set(&prior_gap.gap)) >= MATCH_THRESHOLD)
        })
        .map(|gap| gap.scores.composite())
        .sum();

    matched_weight / total_weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GapPriority, GapScores};

    fn gap(text: &str, composite_inputs: f64) -> RankedGap {
        RankedGap {
            gap: text.to_string(),
            theme: "theme".to_string(),
            priority: GapPriority::High,
            rationale: "r".to_string(),
            scores: GapScores { importance: composite_inputs, novelty: composite_inputs, feasibility: composite_inputs, impact: composite_inputs, confidence: 0.9 },
            ranking: 1,
            evidence_paper_ids: vec![],
        }
    }

    #[test]
    fn empty_prior_scores_zero() {
        let current = vec![gap("some gap", 0.8)];
        assert_eq!(score(&current, &[]), 0.0);
    }

    #[test]
    fn identical_top_lists_score_one() {
        let gaps = vec![gap("lack of cross domain evaluation", 0.8), gap("no low resource language support", 0.6)];
        assert!((score(&gaps, &gaps) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn completely_disjoint_lists_score_zero() {
        let current = vec![gap("lack of cross domain evaluation", 0.8)];
        let prior = vec![gap("hardware power budget is unmeasured", 0.8)];
        assert_eq!(score(&current, &prior), 0.0);
    }

    #[test]
    fn partial_overlap_weighted_by_composite() {
        let current = vec![gap("lack of cross domain evaluation", 0.9), gap("totally unrelated new gap", 0.1)];
        let prior = vec![gap("lack of cross domain evaluation entirely", 0.9)];
        let s = score(&current, &prior);
        assert!(s > 0.8 && s < 1.0);
    }
}
