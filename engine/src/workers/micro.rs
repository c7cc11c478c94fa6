//! Micro agent (spec §4.4.1): one Gateway call per paper, extracting
//! stated and inferred research gaps.

use crate::domain::Paper;
use crate::llm::{AgentTier, CompletionRequest, Gateway};

use super::prompts;
use super::schemas::MicroOutput;

pub struct MicroOutcome {
    pub output: MicroOutput,
    pub provider: String,
    pub latency_ms: u64,
}

/// Runs a Micro agent against one paper. Retries once on `ERR_SCHEMA`
/// (the Gateway already attempts its own fence-repair parse internally;
/// this is the worker's own resend-the-call retry on top of that,
/// spec §4.4.1 step 5) before giving up.
pub async fn run(gateway: &Gateway, paper: &Paper) -> Result<MicroOutcome, String> {
    let system_prompt = prompts::micro_system().to_string();
    let prompt = prompts::micro_user(&paper.title, paper.r#abstract.as_deref(), paper.full_text.as_deref());
    let request = CompletionRequest {
        system_prompt,
        prompt,
        agent_tier: AgentTier::Micro,
        preferred_provider: None,
        max_tokens: 4096,
        temperature: 0.3,
        expect_json: true,
    };

    let mut last_error = String::new();
    for attempt in 0..2 {
        match gateway.generate(request.clone()).await {
            Ok(result) => match parse_output(&result.parsed, paper) {
                Ok(output) => {
                    return Ok(MicroOutcome { output, provider: result.provider, latency_ms: result.latency_ms });
                }
                Err(e) => {
                    last_error = format!("ERR_SCHEMA: {e}");
                    if attempt == 0 {
                        continue;
                    }
                }
            },
            Err(e) => {
                if matches!(e, crate::llm::LlmError::Schema(_)) && attempt == 0 {
                    last_error = format!("ERR_SCHEMA: {e}");
                    continue;
                }
                return Err(e.taxonomy_code().to_string());
            }
        }
    }
    Err(last_error)
}

fn parse_output(parsed: &Option<serde_json::Value>, paper: &Paper) -> Result<MicroOutput, serde_json::Error> {
    let value = parsed.clone().unwrap_or(serde_json::Value::Array(vec![]));
    // The agent is asked for a bare array; tolerate an object wrapper too.
    let array = if value.is_array() { value } else { value.get("researchGaps").cloned().unwrap_or(serde_json::Value::Array(vec![])) };
    let mut output: MicroOutput = serde_json::from_value(serde_json::json!({ "researchGaps": array }))?;
    for gap in &mut output.research_gaps {
        gap.source = gap.gap_type.source().to_string();
        gap.paper_id = paper.paper_id.clone();
        gap.paper_title = paper.title.clone();
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn sandbox_gateway() -> Gateway {
        Gateway::new(&EngineConfig { providers: vec![], sandbox_fallback: true, ..EngineConfig::default() }).unwrap()
    }

    #[tokio::test]
    async fn run_against_sandbox_stamps_paper_identity() {
        let gateway = sandbox_gateway();
        let paper = Paper::new("run-1", "A Survey of Widgets", Some("We survey widgets.".into()), None, 0);
        let outcome = run(&gateway, &paper).await.unwrap();
        assert!(!outcome.output.research_gaps.is_empty());
        for gap in &outcome.output.research_gaps {
            assert_eq!(gap.paper_id, paper.paper_id);
            assert_eq!(gap.paper_title, "A Survey of Widgets");
            assert!(!gap.source.is_empty());
        }
    }

    #[test]
    fn parse_output_tolerates_object_wrapper() {
        let paper = Paper::new("run-1", "Title", None, None, 0);
        let value = serde_json::json!({
            "researchGaps": [
                {"description": "d", "type": "inferred_gap", "priority": "medium", "rationale": "r"}
            ]
        });
        let output = parse_output(&Some(value), &paper).unwrap();
        assert_eq!(output.research_gaps.len(), 1);
        assert_eq!(output.research_gaps[0].confidence, 0.75);
    }
}
