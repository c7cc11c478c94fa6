//! Meta agent (spec §4.4.3): cross-domain ranking over one iteration's
//! Meso clusters. Gap scoring and ranking are computed as plain,
//! deterministic arithmetic over the Meso-computed `cluster_size`/
//! `cohesion` features and the prior iteration's gap set — the model
//! never sees the scoring step and cannot make it non-reproducible. The
//! Gateway call is reserved for the one genuinely open-ended piece of
//! this agent: spotting cross-domain patterns and research frontiers
//! over the already-ranked gaps.

use std::collections::HashSet;

use crate::domain::{GapPriority, GapScores, RankedGap, ResultData};
use crate::llm::{AgentTier, CompletionRequest, Gateway, LlmError};

use super::prompts;
use super::schemas::{MesoOutput, jaccard, token_set};

const TOP_N: usize = 20;

/// Clusters above this many papers don't make a gap any more important
/// or any harder to act on; normalizing against it keeps `size_factor`
/// in [0,1] without one enormous cluster saturating every score.
const CLUSTER_SIZE_CAP: f64 = 8.0;

pub struct MetaOutcome {
    pub result: ResultData,
    pub provider: String,
    pub latency_ms: u64,
}

/// One candidate gap pulled out of a Meso cluster bucket, still carrying
/// the cluster features needed to score it (spec §4.4.3 step 1).
struct Candidate {
    gap: String,
    theme: String,
    priority: GapPriority,
    cluster_size: usize,
    cohesion: f64,
    evidence_paper_ids: Vec<String>,
}

fn priority_weight(priority: GapPriority) -> f64 {
    match priority {
        GapPriority::High => 1.0,
        GapPriority::Medium => 0.6,
        GapPriority::Low => 0.3,
    }
}

fn size_factor(size: usize) -> f64 {
    (size as f64 / CLUSTER_SIZE_CAP).min(1.0)
}

/// Flattens every cluster's gap buckets into scorable candidates (spec
/// §4.4.3 step 1).
fn candidates_from_clusters(clusters: &MesoOutput) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for cluster in &clusters.clusters {
        for bucket in &cluster.identified_gaps {
            for gap in &bucket.gaps {
                candidates.push(Candidate {
                    gap: gap.clone(),
                    theme: cluster.theme.label.clone(),
                    priority: bucket.priority,
                    cluster_size: cluster.size,
                    cohesion: cluster.cohesion.clamp(0.0, 1.0),
                    evidence_paper_ids: cluster.papers.clone(),
                });
            }
        }
    }
    candidates
}

/// `g`: 1 minus the highest token-overlap similarity against any gap in
/// the prior iteration's top gaps. A gap with no precedent (or a first
/// iteration with no prior output at all) is maximally novel.
fn novelty(gap: &str, prior_tokens: &[HashSet<String>]) -> f64 {
    if prior_tokens.is_empty() {
        return 1.0;
    }
    let tokens = token_set(gap);
    let most_similar = prior_tokens.iter().map(|prior| jaccard(&tokens, prior)).fold(0.0_f64, f64::max);
    (1.0 - most_similar).clamp(0.0, 1.0)
}

/// Computes `importance`/`novelty`/`feasibility`/`impact` per spec
/// §4.4.3 step 2, each bounded to [0,1] and a pure function of the
/// candidate's priority/cluster_size/cohesion plus, for novelty, the
/// prior iteration's gap set.
fn score(candidate: &Candidate, prior_tokens: &[HashSet<String>]) -> GapScores {
    let priority = priority_weight(candidate.priority);
    let size = size_factor(candidate.cluster_size);

    // f: higher-priority gaps from tighter, better-evidenced clusters matter more.
    let importance = (0.6 * priority + 0.25 * candidate.cohesion + 0.15 * size).clamp(0.0, 1.0);
    let novelty = novelty(&candidate.gap, prior_tokens);
    // h: a cohesive cluster describes a well-scoped problem; a sprawling one is harder to act on.
    let feasibility = (0.7 * candidate.cohesion + 0.3 * (1.0 - size)).clamp(0.0, 1.0);
    // k: priority and breadth of supporting evidence both raise the ceiling on research impact.
    let impact = (0.5 * priority + 0.5 * size).clamp(0.0, 1.0);

    GapScores { importance, novelty, feasibility, impact, confidence: candidate.cohesion }
}

fn rationale_for(candidate: &Candidate) -> String {
    format!(
        "supported by {} paper(s) in the \"{}\" cluster (cohesion {:.2})",
        candidate.evidence_paper_ids.len(),
        candidate.theme,
        candidate.cohesion
    )
}

/// Runs a Meta agent over one iteration's clusters: scores and ranks
/// gaps deterministically, then calls the Gateway once for cross-domain
/// commentary over the ranked result (spec §4.4.3 steps 1-4), reusing
/// the prior iteration's top-10 (if any) for novelty scoring and prompt
/// continuity.
pub async fn run(gateway: &Gateway, clusters: &MesoOutput, prior_top10: Option<&[RankedGap]>) -> Result<MetaOutcome, String> {
    let prior_tokens: Vec<HashSet<String>> = prior_top10.unwrap_or(&[]).iter().map(|gap| token_set(&gap.gap)).collect();

    let ranked_gaps = candidates_from_clusters(clusters)
        .into_iter()
        .map(|candidate| RankedGap {
            gap: candidate.gap.clone(),
            theme: candidate.theme.clone(),
            priority: candidate.priority,
            rationale: rationale_for(&candidate),
            scores: score(&candidate, &prior_tokens),
            ranking: 0,
            evidence_paper_ids: candidate.evidence_paper_ids.clone(),
        })
        .collect();

    let mut data = ResultData { ranked_gaps, ..ResultData::default() };
    rank(&mut data);

    let prior_json = prior_top10.map(|gaps| serde_json::to_string(gaps).unwrap_or_default());
    let (cross_domain_patterns, research_frontiers, provider, latency_ms) = synthesize_cross_domain(gateway, &data, prior_json.as_deref()).await?;
    data.cross_domain_patterns = cross_domain_patterns;
    data.research_frontiers = research_frontiers;

    Ok(MetaOutcome { result: data, provider, latency_ms })
}

/// Spec §4.4.3 step 4: the only part of the Meta agent that actually
/// needs the model. Scoring and ranking are already final by the time
/// this is called; the model only adds `crossDomainPatterns`/
/// `researchFrontiers` commentary on top.
async fn synthesize_cross_domain(
    gateway: &Gateway,
    data: &ResultData,
    prior_gaps_json: Option<&str>,
) -> Result<(Vec<serde_json::Value>, Vec<serde_json::Value>, String, u64), String> {
    let ranked_gaps_json = serde_json::to_string(&data.ranked_gaps).map_err(|e| format!("ERR_INVARIANT: {e}"))?;

    let request = CompletionRequest {
        system_prompt: prompts::meta_system().to_string(),
        prompt: prompts::meta_user(&ranked_gaps_json, prior_gaps_json),
        agent_tier: AgentTier::Meta,
        preferred_provider: None,
        max_tokens: 8192,
        temperature: 0.4,
        expect_json: true,
    };

    let mut last_error = String::new();
    for attempt in 0..2 {
        match gateway.generate(request.clone()).await {
            Ok(result) => match parse_cross_domain(&result.parsed) {
                Ok((patterns, frontiers)) => return Ok((patterns, frontiers, result.provider, result.latency_ms)),
                Err(e) => {
                    last_error = format!("ERR_SCHEMA: {e}");
                    if attempt == 0 {
                        continue;
                    }
                }
            },
            Err(e) => {
                if matches!(e, LlmError::Schema(_)) && attempt == 0 {
                    last_error = format!("ERR_SCHEMA: {e}");
                    continue;
                }
                return Err(e.taxonomy_code().to_string());
            }
        }
    }
    Err(last_error)
}

fn parse_cross_domain(parsed: &Option<serde_json::Value>) -> Result<(Vec<serde_json::Value>, Vec<serde_json::Value>), serde_json::Error> {
    let value = parsed.clone().unwrap_or(serde_json::json!({}));
    let patterns = value.get("crossDomainPatterns").cloned().unwrap_or(serde_json::json!([]));
    let frontiers = value.get("researchFrontiers").cloned().unwrap_or(serde_json::json!([]));
    Ok((serde_json::from_value(patterns)?, serde_json::from_value(frontiers)?))
}

/// Composite score descending, then higher importance, then higher
/// impact, then lexical order of gap text, then more evidence papers
/// (spec §4.4.3 tie-break order), finally trims to the top 20.
fn rank(data: &mut ResultData) {
    data.ranked_gaps.sort_by(|a, b| {
        b.scores
            .composite()
            .total_cmp(&a.scores.composite())
            .then_with(|| b.scores.importance.total_cmp(&a.scores.importance))
            .then_with(|| b.scores.impact.total_cmp(&a.scores.impact))
            .then_with(|| a.gap.cmp(&b.gap))
            .then_with(|| b.evidence_paper_ids.len().cmp(&a.evidence_paper_ids.len()))
    });
    data.ranked_gaps.truncate(TOP_N);
    for (i, gap) in data.ranked_gaps.iter_mut().enumerate() {
        gap.ranking = i as u32 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::GapScores;
    use crate::workers::schemas::{IdentifiedGapBucket, MesoCluster, MesoTheme};

    fn sandbox_gateway() -> Gateway {
        Gateway::new(&EngineConfig { providers: vec![], sandbox_fallback: true, ..EngineConfig::default() }).unwrap()
    }

    fn ranked_gap(gap: &str, importance: f64, impact: f64, evidence: usize) -> RankedGap {
        RankedGap {
            gap: gap.to_string(),
            theme: "theme".to_string(),
            priority: crate::domain::GapPriority::High,
            rationale: "why".to_string(),
            scores: GapScores { importance, novelty: 0.5, feasibility: 0.5, impact, confidence: 0.9 },
            ranking: 0,
            evidence_paper_ids: (0..evidence).map(|i| format!("p{i}")).collect(),
        }
    }

    fn two_cluster_output() -> MesoOutput {
        MesoOutput {
            clusters: vec![
                MesoCluster {
                    theme: MesoTheme { label: "generalization".into(), keywords: vec![] },
                    papers: vec!["p1".into(), "p2".into(), "p3".into()],
                    identified_gaps: vec![IdentifiedGapBucket {
                        priority: GapPriority::High,
                        count: 1,
                        gaps: vec!["lacks cross-domain evaluation".into()],
                    }],
                    cohesion: 0.9,
                    size: 3,
                },
                MesoCluster {
                    theme: MesoTheme { label: "efficiency".into(), keywords: vec![] },
                    papers: vec!["p4".into()],
                    identified_gaps: vec![IdentifiedGapBucket {
                        priority: GapPriority::Low,
                        count: 1,
                        gaps: vec!["no ablation on batch size".into()],
                    }],
                    cohesion: 0.3,
                    size: 1,
                },
            ],
        }
    }

    #[tokio::test]
    async fn run_against_sandbox_produces_ranked_gaps_with_sequential_ranking() {
        let gateway = sandbox_gateway();
        let clusters = two_cluster_output();
        let outcome = run(&gateway, &clusters, None).await.unwrap();
        assert_eq!(outcome.result.ranked_gaps.len(), 2);
        for (i, gap) in outcome.result.ranked_gaps.iter().enumerate() {
            assert_eq!(gap.ranking, i as u32 + 1);
        }
        // the high-priority, high-cohesion cluster outranks the low-priority one.
        assert_eq!(outcome.result.ranked_gaps[0].gap, "lacks cross-domain evaluation");
    }

    #[tokio::test]
    async fn scoring_is_deterministic_across_repeated_runs() {
        let gateway = sandbox_gateway();
        let clusters = two_cluster_output();
        let a = run(&gateway, &clusters, None).await.unwrap();
        let b = run(&gateway, &clusters, None).await.unwrap();
        assert_eq!(a.result.ranked_gaps[0].scores.importance, b.result.ranked_gaps[0].scores.importance);
        assert_eq!(a.result.ranked_gaps[0].scores.feasibility, b.result.ranked_gaps[0].scores.feasibility);
    }

    #[test]
    fn novelty_is_maximal_with_no_prior_output() {
        assert_eq!(novelty("a brand new gap", &[]), 1.0);
    }

    #[test]
    fn novelty_drops_for_a_gap_repeated_from_the_prior_iteration() {
        let prior_tokens = vec![token_set("lacks cross-domain evaluation of the method")];
        let repeated = novelty("lacks cross-domain evaluation of the method", &prior_tokens);
        let fresh = novelty("entirely unrelated concern about dataset licensing", &prior_tokens);
        assert!(repeated < fresh);
    }

    #[test]
    fn rank_orders_by_composite_score_descending() {
        let mut data = ResultData {
            ranked_gaps: vec![ranked_gap("low", 0.2, 0.2, 1), ranked_gap("high", 0.9, 0.9, 1)],
            ..ResultData::default()
        };
        rank(&mut data);
        assert_eq!(data.ranked_gaps[0].gap, "high");
        assert_eq!(data.ranked_gaps[0].ranking, 1);
    }

    #[test]
    fn rank_breaks_composite_ties_by_importance_then_impact_then_lexical_then_evidence() {
        let mut data = ResultData {
            ranked_gaps: vec![ranked_gap("zeta", 0.5, 0.5, 3), ranked_gap("alpha", 0.5, 0.5, 1)],
            ..ResultData::default()
        };
        rank(&mut data);
        // equal composite/importance/impact: lexical order wins over evidence count.
        assert_eq!(data.ranked_gaps[0].gap, "alpha");
    }

    #[test]
    fn rank_truncates_to_top_twenty() {
        let gaps: Vec<RankedGap> = (0..30).map(|i| ranked_gap(&format!("gap-{i}"), 0.5, 0.5, 1)).collect();
        let mut data = ResultData { ranked_gaps: gaps, ..ResultData::default() };
        rank(&mut data);
        assert_eq!(data.ranked_gaps.len(), 20);
    }
}
