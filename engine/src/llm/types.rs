//! Provider-agnostic completion request/response types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTier {
    Micro,
    Meso,
    Meta,
}

impl AgentTier {
    /// Per-tier timeout (spec §4.2): 30s for Micro, 60s for Meso/Meta.
    pub fn timeout(self) -> Duration {
        match self {
            Self::Micro => Duration::from_secs(30),
            Self::Meso | Self::Meta => Duration::from_secs(60),
        }
    }
}

/// A single completion request. `expect_json` carries the schema the
/// caller wants the output validated against, not sent to the provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub agent_tier: AgentTier,
    pub preferred_provider: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub expect_json: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}
