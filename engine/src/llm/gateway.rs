//! `Gateway`: owns the ordered provider cascade, per-provider rate
//! limiters, and the retry/cascade/schema-repair logic as a single
//! call-site (spec §4.2).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, warn};

use crate::config::{EngineConfig, ProviderConfig};

use super::anthropic::AnthropicClient;
use super::client::LlmClient;
use super::error::LlmError;
use super::openai::OpenAIClient;
use super::sandbox::SandboxClient;
use super::types::CompletionRequest;
use tokio::sync::Mutex;

/// One `Gateway::generate` call's observable contract (spec §4.2).
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub parsed: Option<serde_json::Value>,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: u64,
}

pub fn create_client(config: &ProviderConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_config(config)?)),
        "openai" => Ok(Arc::new(OpenAIClient::from_config(config)?)),
        "sandbox" => Ok(Arc::new(SandboxClient::new())),
        other => Err(LlmError::InvalidResponse(format!(
            "unknown LLM provider '{other}'. Supported: anthropic, openai, sandbox"
        ))),
    }
}

/// Sliding one-minute requests-per-minute budget, shared across runs for
/// a given provider (spec §4.5 shared-resource policy).
struct RateLimiter {
    request_times: VecDeque<Instant>,
    max_per_minute: u32,
}

impl RateLimiter {
    fn new(max_per_minute: u32) -> Self {
        Self { request_times: VecDeque::new(), max_per_minute }
    }

    /// Returns the wait needed before another call is admitted.
    fn admit(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let window_start = now - Duration::from_secs(60);
        while self.request_times.front().map(|t| *t < window_start).unwrap_or(false) {
            self.request_times.pop_front();
        }
        if self.request_times.len() >= self.max_per_minute as usize {
            let oldest = *self.request_times.front().unwrap();
            Some(Duration::from_secs(60).saturating_sub(now - oldest))
        } else {
            self.request_times.push_back(now);
            None
        }
    }
}

pub struct Gateway {
    clients: Vec<Arc<dyn LlmClient>>,
    sandbox: Arc<dyn LlmClient>,
    sandbox_fallback: bool,
    limiters: Mutex<HashMap<String, RateLimiter>>,
}

impl Gateway {
    pub fn new(config: &EngineConfig) -> Result<Self, LlmError> {
        let clients = config.providers.iter().map(create_client).collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            clients,
            sandbox: Arc::new(SandboxClient::new()),
            sandbox_fallback: config.sandbox_fallback,
            limiters: Mutex::new(HashMap::new()),
        })
    }

    /// Test-only escape hatch for exercising the cascade with stub
    /// clients instead of real network-backed ones.
    #[cfg(test)]
    fn with_clients(clients: Vec<Arc<dyn LlmClient>>, sandbox_fallback: bool) -> Self {
        Self { clients, sandbox: Arc::new(SandboxClient::new()), sandbox_fallback, limiters: Mutex::new(HashMap::new()) }
    }

    /// `preferredProvider` first if present and configured, else cascade
    /// order as declared (spec §4.2).
    fn cascade_order(&self, preferred: Option<&str>) -> Vec<Arc<dyn LlmClient>> {
        let mut ordered = Vec::with_capacity(self.clients.len());
        if let Some(name) = preferred {
            if let Some(client) = self.clients.iter().find(|c| c.provider_id() == name) {
                ordered.push(client.clone());
            }
        }
        for client in &self.clients {
            if !ordered.iter().any(|c: &Arc<dyn LlmClient>| c.provider_id() == client.provider_id()) {
                ordered.push(client.clone());
            }
        }
        ordered
    }

    /// Defer (not retry) calls that would exceed the provider's
    /// requests-per-minute budget, with 1-5s jittered backoff.
    async fn wait_for_quota(&self, provider_id: &str) {
        let wait = {
            let mut limiters = self.limiters.lock().await;
            limiters.entry(provider_id.to_string()).or_insert_with(|| RateLimiter::new(500)).admit()
        };
        if let Some(wait) = wait {
            let jitter = Duration::from_millis(rand::rng().random_range(0..1_000));
            tokio::time::sleep(wait.min(Duration::from_secs(5)) + jitter).await;
        }
    }

    async fn call_with_retries(
        &self,
        client: &Arc<dyn LlmClient>,
        request: &CompletionRequest,
    ) -> Result<super::types::CompletionResponse, LlmError> {
        self.wait_for_quota(client.provider_id()).await;

        let estimated_tokens = (request.system_prompt.len() + request.prompt.len()) as u32 / 4;
        if estimated_tokens > client.context_window() {
            return Err(LlmError::InvalidResponse("prompt exceeds provider context window".into()));
        }

        const BACKOFFS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];
        let mut last_err = match client.complete(request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        for backoff in BACKOFFS {
            if !last_err.is_retryable() {
                return Err(last_err);
            }
            warn!(provider = client.provider_id(), error = %last_err, "retrying after transient error");
            tokio::time::sleep(backoff).await;
            match client.complete(request).await {
                Ok(response) => return Ok(response),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Strip ``` fences and prose preambles before a second parse
    /// attempt (spec §4.2 schema repair).
    fn repair_and_parse(text: &str) -> Option<serde_json::Value> {
        let trimmed = text.trim();
        let unfenced = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .map(str::trim_start)
            .and_then(|s| s.strip_suffix("```"))
            .map(str::trim)
            .unwrap_or(trimmed);
        if let Ok(value) = serde_json::from_str(unfenced) {
            return Some(value);
        }
        let start = unfenced.find(['{', '['])?;
        serde_json::from_str(&unfenced[start..]).ok()
    }

    fn to_result(response: super::types::CompletionResponse, expect_json: bool) -> Result<GenerateResult, LlmError> {
        let parsed = if expect_json {
            match serde_json::from_str::<serde_json::Value>(&response.text) {
                Ok(value) => Some(value),
                Err(_) => match Self::repair_and_parse(&response.text) {
                    Some(value) => Some(value),
                    None => return Err(LlmError::Schema(response.text)),
                },
            }
        } else {
            None
        };
        Ok(GenerateResult {
            text: response.text,
            parsed,
            provider: response.provider,
            model: response.model,
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            latency_ms: response.latency_ms,
        })
    }

    /// `generate(prompt, {agentType, preferredProvider?, maxTokens,
    /// temperature, expectJson?}) → Result` (spec §4.2).
    pub async fn generate(&self, request: CompletionRequest) -> Result<GenerateResult, LlmError> {
        let order = self.cascade_order(request.preferred_provider.as_deref());
        for client in &order {
            match self.call_with_retries(client, &request).await {
                Ok(response) => return Self::to_result(response, request.expect_json),
                Err(e) if matches!(e, LlmError::Schema(_)) => return Err(e),
                Err(e) => {
                    info!(provider = client.provider_id(), error = %e, "provider exhausted, cascading");
                }
            }
        }
        if self.sandbox_fallback {
            let response = self.sandbox.complete(&request).await?;
            return Self::to_result(response, request.expect_json);
        }
        Err(LlmError::NoProvider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::AgentTier;

    fn config_with_no_providers(sandbox_fallback: bool) -> EngineConfig {
        EngineConfig {
            providers: vec![],
            sandbox_fallback,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn falls_back_to_sandbox_when_no_providers_and_fallback_enabled() {
        let gateway = Gateway::new(&config_with_no_providers(true)).unwrap();
        let request = CompletionRequest {
            system_prompt: "sys".into(),
            prompt: "paper-1".into(),
            agent_tier: AgentTier::Micro,
            preferred_provider: None,
            max_tokens: 100,
            temperature: 0.0,
            expect_json: true,
        };
        let result = gateway.generate(request).await.unwrap();
        assert_eq!(result.provider, "sandbox");
        assert!(result.parsed.unwrap().is_array());
    }

    #[tokio::test]
    async fn no_provider_error_when_fallback_disabled() {
        let gateway = Gateway::new(&config_with_no_providers(false)).unwrap();
        let request = CompletionRequest {
            system_prompt: "sys".into(),
            prompt: "paper-1".into(),
            agent_tier: AgentTier::Micro,
            preferred_provider: None,
            max_tokens: 100,
            temperature: 0.0,
            expect_json: true,
        };
        let err = gateway.generate(request).await.unwrap_err();
        assert!(matches!(err, LlmError::NoProvider));
    }

    #[test]
    fn repair_and_parse_strips_code_fences() {
        let text = "```json\n{\"a\": 1}\n```";
        let parsed = Gateway::repair_and_parse(text).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn repair_and_parse_strips_prose_preamble() {
        let text = "Sure, here is the JSON:\n{\"a\": 1}";
        let parsed = Gateway::repair_and_parse(text).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    /// A stub client that always fails with a retryable server error,
    /// standing in for a provider returning 500 on every call.
    struct AlwaysFails(&'static str);

    #[async_trait::async_trait]
    impl LlmClient for AlwaysFails {
        async fn complete(&self, _request: &CompletionRequest) -> Result<super::super::types::CompletionResponse, LlmError> {
            Err(LlmError::ApiError { status: 500, message: "internal error".into() })
        }
        fn provider_id(&self) -> &str {
            self.0
        }
        fn context_window(&self) -> u32 {
            128_000
        }
    }

    /// A stub client that always returns a fixed, valid JSON body.
    struct AlwaysSucceeds(&'static str);

    #[async_trait::async_trait]
    impl LlmClient for AlwaysSucceeds {
        async fn complete(&self, _request: &CompletionRequest) -> Result<super::super::types::CompletionResponse, LlmError> {
            Ok(super::super::types::CompletionResponse {
                text: "[{\"gap\": \"stubbed gap\"}]".into(),
                provider: self.0.into(),
                model: "stub-model".into(),
                usage: super::super::types::TokenUsage::default(),
                latency_ms: 1,
            })
        }
        fn provider_id(&self) -> &str {
            self.0
        }
        fn context_window(&self) -> u32 {
            128_000
        }
    }

    #[tokio::test]
    async fn cascades_to_the_next_provider_when_the_first_fails() {
        let clients: Vec<Arc<dyn LlmClient>> = vec![Arc::new(AlwaysFails("primary")), Arc::new(AlwaysSucceeds("secondary"))];
        let gateway = Gateway::with_clients(clients, false);
        let request = CompletionRequest {
            system_prompt: "sys".into(),
            prompt: "paper-1".into(),
            agent_tier: AgentTier::Micro,
            preferred_provider: None,
            max_tokens: 100,
            temperature: 0.0,
            expect_json: true,
        };
        let result = gateway.generate(request).await.unwrap();
        assert_eq!(result.provider, "secondary");
        assert_eq!(result.parsed.unwrap()[0]["gap"], "stubbed gap");
    }

    #[tokio::test]
    async fn cascade_exhausted_with_fallback_disabled_reports_no_provider() {
        let clients: Vec<Arc<dyn LlmClient>> = vec![Arc::new(AlwaysFails("only"))];
        let gateway = Gateway::with_clients(clients, false);
        let request = CompletionRequest {
            system_prompt: "sys".into(),
            prompt: "paper-1".into(),
            agent_tier: AgentTier::Micro,
            preferred_provider: None,
            max_tokens: 100,
            temperature: 0.0,
            expect_json: true,
        };
        let err = gateway.generate(request).await.unwrap_err();
        assert!(matches!(err, LlmError::NoProvider));
    }
}
