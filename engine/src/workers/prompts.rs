//! Prompt templates for the three agent tiers, rendered with Handlebars
//! the way `render_prompt` does in the donor's loop engine, minus the
//! manual-replace shortcut that file falls back to.

use std::sync::OnceLock;

use handlebars::Handlebars;

const MICRO_SYSTEM: &str = "You are a research-gap extraction agent. Read one paper and identify \
concrete research gaps: things the authors state as future work or limitations, and gaps you can \
reasonably infer from the methodology or scope. Respond with a JSON array only, no prose, no code \
fences. Each element has fields: description, type (one of stated_future_work, stated_limitation, \
inferred_gap, methodological_gap), priority (high, medium, low), rationale, confidence (0.0-1.0).";

const MICRO_USER: &str = "Paper title: {{title}}
{{#if abstract}}Abstract: {{abstract}}
{{/if}}{{#if full_text}}Full text excerpt: {{full_text}}
{{/if}}
Extract the research gaps in this paper.";

const MESO_SYSTEM: &str = "You are a synthesis agent. You are given the research gaps extracted \
from every paper in one iteration. Group related gaps into thematic clusters. Respond with JSON \
only: {\"clusters\": [{\"theme\": {\"label\": ..., \"keywords\": [...]}, \"papers\": [paper ids], \
\"identifiedGaps\": [{\"priority\": ..., \"count\": ..., \"gaps\": [descriptions]}], \"cohesion\": \
0.0-1.0, \"size\": N}]}. Merge clusters of fewer than two papers into a single miscellaneous \
cluster unless their internal cohesion is 0.8 or higher.";

const MESO_USER: &str = "Research gaps from this iteration's papers:
{{gaps_json}}

Cluster these gaps by theme.";

const META_SYSTEM: &str = "You are a cross-domain synthesis agent. You are given a list of \
research gaps, already ranked by a deterministic scoring pipeline, possibly spanning multiple \
distinct research domains within the same run. Identify patterns that span domains and surface \
emerging research frontiers; do not re-rank or re-score the gaps. Respond with JSON only: \
{\"crossDomainPatterns\": [...], \"researchFrontiers\": [...]}.";

const META_USER: &str = "Ranked gaps from this iteration:
{{ranked_gaps_json}}
{{#if prior_gaps_json}}
Top gaps from the previous iteration, for continuity:
{{prior_gaps_json}}
{{/if}}

Identify cross-domain patterns and emerging research frontiers across these gaps.";

static ENGINE: OnceLock<Handlebars<'static>> = OnceLock::new();

fn engine() -> &'static Handlebars<'static> {
    ENGINE.get_or_init(|| {
        let mut hb = Handlebars::new();
        hb.set_strict_mode(false);
        hb.register_template_string("micro_user", MICRO_USER).expect("valid template");
        hb.register_template_string("meso_user", MESO_USER).expect("valid template");
        hb.register_template_string("meta_user", META_USER).expect("valid template");
        hb
    })
}

pub fn micro_system() -> &'static str {
    MICRO_SYSTEM
}

pub fn micro_user(title: &str, abstract_text: Option<&str>, full_text: Option<&str>) -> String {
    let context = serde_json::json!({ "title": title, "abstract": abstract_text, "full_text": full_text });
    engine().render("micro_user", &context).expect("template renders")
}

pub fn meso_system() -> &'static str {
    MESO_SYSTEM
}

pub fn meso_user(gaps_json: &str) -> String {
    let context = serde_json::json!({ "gaps_json": gaps_json });
    engine().render("meso_user", &context).expect("template renders")
}

pub fn meta_system() -> &'static str {
    META_SYSTEM
}

pub fn meta_user(ranked_gaps_json: &str, prior_gaps_json: Option<&str>) -> String {
    let context = serde_json::json!({ "ranked_gaps_json": ranked_gaps_json, "prior_gaps_json": prior_gaps_json });
    engine().render("meta_user", &context).expect("template renders")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micro_user_includes_title_and_abstract() {
        let rendered = micro_user("Attention Is All You Need", Some("We propose..."), None);
        assert!(rendered.contains("Attention Is All You Need"));
        assert!(rendered.contains("We propose..."));
    }

    #[test]
    fn micro_user_omits_missing_full_text_block() {
        let rendered = micro_user("Title", None, None);
        assert!(!rendered.contains("Full text excerpt"));
    }

    #[test]
    fn meta_user_omits_prior_gaps_block_when_absent() {
        let rendered = meta_user("[]", None);
        assert!(!rendered.contains("previous iteration"));
    }
}
