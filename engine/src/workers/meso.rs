//! Meso agent (spec §4.4.2): per-iteration synthesis across every
//! Micro output — dedup near-duplicate gaps, cluster by theme, and
//! bucket each cluster's gaps by priority.
//!
//! Clustering uses the bag-of-words cosine measure from `schemas`
//! rather than an LLM-driven single-shot call: the spec allows either
//! path, and the embedding-based one keeps this stage a pure, fully
//! unit-testable function with no network dependency.

use std::collections::HashMap;

use crate::domain::GapPriority;

use super::schemas::{cosine_similarity, jaccard, token_set, tokenize, GapType, IdentifiedGapBucket, MesoCluster, MesoOutput, MesoTheme, MicroGap};

/// Cosine similarity threshold for assigning a gap to an existing
/// cluster (spec §4.4.2).
const CLUSTER_THRESHOLD: f64 = 0.6;
/// Jaccard threshold for treating two gap descriptions as duplicates
/// (spec §4.4.2).
const DEDUP_THRESHOLD: f64 = 0.7;
/// A cluster with fewer than two members is folded into "miscellaneous"
/// unless its own cohesion clears this bar (spec §4.4.2).
const MISC_COHESION_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct DedupedGap {
    pub description: String,
    pub gap_type: GapType,
    pub priority: GapPriority,
    pub rationale: String,
    pub confidence: f64,
    pub paper_ids: Vec<String>,
}

/// Merges near-duplicate gaps (Jaccard ≥ 0.7 over description tokens),
/// keeping the highest confidence seen and the union of evidence papers.
pub fn dedup_gaps(gaps: &[MicroGap]) -> Vec<DedupedGap> {
    let mut deduped: Vec<DedupedGap> = Vec::new();
    for gap in gaps {
        let tokens = token_set(&gap.description);
        let existing = deduped.iter_mut().find(|d| jaccard(&token_set(&d.description), &tokens) >= DEDUP_THRESHOLD);
        match existing {
            Some(d) => {
                d.confidence = d.confidence.max(gap.confidence);
                if !d.paper_ids.contains(&gap.paper_id) {
                    d.paper_ids.push(gap.paper_id.clone());
                }
            }
            None => deduped.push(DedupedGap {
                description: gap.description.clone(),
                gap_type: gap.gap_type,
                priority: gap.priority,
                rationale: gap.rationale.clone(),
                confidence: gap.confidence,
                paper_ids: vec![gap.paper_id.clone()],
            }),
        }
    }
    deduped
}

/// Greedy single-pass assignment: each gap joins the most similar
/// existing cluster (by cosine similarity to that cluster's first
/// member) if it clears the threshold, else starts a new cluster.
/// Deterministic given a stable input order.
pub fn cluster_gaps(gaps: &[DedupedGap]) -> Vec<Vec<usize>> {
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for (i, gap) in gaps.iter().enumerate() {
        let mut best: Option<(usize, f64)> = None;
        for (ci, cluster) in clusters.iter().enumerate() {
            let representative = &gaps[cluster[0]];
            let similarity = cosine_similarity(&gap.description, &representative.description);
            if similarity >= CLUSTER_THRESHOLD && best.map(|(_, b)| similarity > b).unwrap_or(true) {
                best = Some((ci, similarity));
            }
        }
        match best {
            Some((ci, _)) => clusters[ci].push(i),
            None => clusters.push(vec![i]),
        }
    }
    clusters
}

/// Average pairwise cosine similarity within a cluster. A singleton has
/// no corroborating evidence, so its cohesion is 0, not 1 — this makes
/// the `<2 members merge unless cohesion >= 0.8` rule meaningful.
pub fn cohesion(descriptions: &[&str]) -> f64 {
    if descriptions.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut count = 0u32;
    for i in 0..descriptions.len() {
        for j in (i + 1)..descriptions.len() {
            total += cosine_similarity(descriptions[i], descriptions[j]);
            count += 1;
        }
    }
    if count == 0 { 0.0 } else { total / f64::from(count) }
}

/// Folds clusters with fewer than two members into a single
/// miscellaneous bucket, unless their own cohesion already clears the
/// bar. Returns the merged cluster list and the index of the
/// miscellaneous bucket, if one was created.
fn merge_small_clusters(clusters: Vec<Vec<usize>>, gaps: &[DedupedGap]) -> (Vec<Vec<usize>>, Option<usize>) {
    let mut kept = Vec::new();
    let mut misc = Vec::new();
    for cluster in clusters {
        let descriptions: Vec<&str> = cluster.iter().map(|&i| gaps[i].description.as_str()).collect();
        if cluster.len() < 2 && cohesion(&descriptions) < MISC_COHESION_THRESHOLD {
            misc.extend(cluster);
        } else {
            kept.push(cluster);
        }
    }
    let misc_index = if misc.is_empty() {
        None
    } else {
        kept.push(misc);
        Some(kept.len() - 1)
    };
    (kept, misc_index)
}

fn priority_rank(priority: GapPriority) -> u8 {
    match priority {
        GapPriority::High => 2,
        GapPriority::Medium => 1,
        GapPriority::Low => 0,
    }
}

fn identified_gaps(members: &[&DedupedGap]) -> Vec<IdentifiedGapBucket> {
    let mut buckets: HashMap<GapPriority, Vec<String>> = HashMap::new();
    for gap in members {
        buckets.entry(gap.priority).or_default().push(gap.description.clone());
    }
    let mut result: Vec<IdentifiedGapBucket> = buckets
        .into_iter()
        .map(|(priority, gaps)| IdentifiedGapBucket { priority, count: gaps.len() as u32, gaps })
        .collect();
    result.sort_by(|a, b| priority_rank(b.priority).cmp(&priority_rank(a.priority)));
    result
}

fn derive_theme(members: &[&DedupedGap]) -> MesoTheme {
    let mut frequencies: HashMap<String, u32> = HashMap::new();
    for gap in members {
        for token in tokenize(&gap.description) {
            if token.len() > 3 {
                *frequencies.entry(token).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, u32)> = frequencies.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let keywords: Vec<String> = ranked.iter().take(3).map(|(k, _)| k.clone()).collect();
    let label = keywords.first().cloned().unwrap_or_else(|| "theme".to_string());
    MesoTheme { label, keywords }
}

/// Runs the full Meso synthesis over one iteration's Micro output. An
/// empty input produces an empty cluster list (spec §4.4.2: the
/// orchestrator treats that as a non-recoverable iteration failure).
pub fn run(gaps: Vec<MicroGap>) -> MesoOutput {
    if gaps.is_empty() {
        return MesoOutput::default();
    }
    let deduped = dedup_gaps(&gaps);
    let raw_clusters = cluster_gaps(&deduped);
    let (merged, misc_index) = merge_small_clusters(raw_clusters, &deduped);

    let clusters = merged
        .iter()
        .enumerate()
        .map(|(i, indices)| {
            let members: Vec<&DedupedGap> = indices.iter().map(|&idx| &deduped[idx]).collect();
            let descriptions: Vec<&str> = members.iter().map(|g| g.description.as_str()).collect();
            let mut papers: Vec<String> = members.iter().flat_map(|g| g.paper_ids.clone()).collect();
            papers.sort();
            papers.dedup();
            let theme =
                if Some(i) == misc_index { MesoTheme { label: "miscellaneous".to_string(), keywords: vec![] } } else { derive_theme(&members) };
            MesoCluster { theme, papers, identified_gaps: identified_gaps(&members), cohesion: cohesion(&descriptions), size: members.len() }
        })
        .collect();

    MesoOutput { clusters }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GapPriority;

    fn gap(description: &str, paper_id: &str, priority: GapPriority) -> MicroGap {
        MicroGap {
            description: description.to_string(),
            gap_type: GapType::InferredGap,
            priority,
            rationale: "because".to_string(),
            confidence: 0.8,
            source: "inferred".to_string(),
            paper_id: paper_id.to_string(),
            paper_title: "title".to_string(),
        }
    }

    #[test]
    fn empty_input_produces_empty_clusters() {
        let output = run(vec![]);
        assert!(output.clusters.is_empty());
    }

    #[test]
    fn duplicate_gaps_merge_across_papers() {
        let gaps = vec![
            gap("lack of cross domain evaluation in the experiments", "p1", GapPriority::High),
            gap("experiments lack cross domain evaluation entirely", "p2", GapPriority::High),
        ];
        let deduped = dedup_gaps(&gaps);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].paper_ids.len(), 2);
    }

    #[test]
    fn distinct_gaps_cluster_separately_when_dissimilar() {
        let gaps = vec![
            gap("no evaluation on low resource languages", "p1", GapPriority::Medium),
            gap("no evaluation on low resource languages at all", "p2", GapPriority::Medium),
            gap("hardware power budget is never measured", "p3", GapPriority::Low),
            gap("power budget of the hardware setup is unmeasured", "p4", GapPriority::Low),
        ];
        let output = run(gaps);
        assert_eq!(output.clusters.len(), 2);
    }

    #[test]
    fn singleton_clusters_fold_into_miscellaneous() {
        let gaps = vec![
            gap("first completely unrelated topic about birds", "p1", GapPriority::Low),
            gap("second completely unrelated topic about rocks", "p2", GapPriority::Low),
        ];
        let output = run(gaps);
        assert_eq!(output.clusters.len(), 1);
        assert_eq!(output.clusters[0].theme.label, "miscellaneous");
        assert_eq!(output.clusters[0].size, 2);
    }
}
