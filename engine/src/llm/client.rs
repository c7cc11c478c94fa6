//! `LlmClient` trait: the one seam every provider implements.

use async_trait::async_trait;

use super::error::LlmError;
use super::types::{CompletionRequest, CompletionResponse};

/// Stateless LLM client — each call is independent, no conversation state
/// is carried between agent invocations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Stable identifier used in the provider cascade and persisted
    /// against the Agent Record (spec §4.2 observable contract).
    fn provider_id(&self) -> &str;

    /// Context window in tokens, used for the pre-dispatch budget check.
    fn context_window(&self) -> u32;
}
