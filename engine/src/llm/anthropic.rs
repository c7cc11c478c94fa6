//! Anthropic Messages API client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::ProviderConfig;

use super::client::LlmClient;
use super::error::LlmError;
use super::types::{CompletionRequest, CompletionResponse, TokenUsage};

pub struct AnthropicClient {
    provider_id: String,
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    context_window: u32,
}

impl AnthropicClient {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| LlmError::InvalidResponse(format!("environment variable {} not set", config.api_key_env)))?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(LlmError::Network)?;
        Ok(Self {
            provider_id: config.provider.clone(),
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
            context_window: config.context_window,
        })
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": [{"role": "user", "content": request.prompt}],
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(request);
        let started = Instant::now();

        let response = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { LlmError::Timeout(request.agent_tier.timeout()) } else { LlmError::Network(e) })?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited { retry_after: Duration::from_secs(retry_after) });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message });
        }

        let api_response: AnthropicResponse = response.json().await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let text = api_response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            text,
            provider: self.provider_id.clone(),
            model: self.model.clone(),
            usage: TokenUsage {
                prompt_tokens: api_response.usage.input_tokens as u32,
                completion_tokens: api_response.usage.output_tokens as u32,
            },
            latency_ms,
        })
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::AgentTier;

    #[test]
    fn build_request_body_caps_max_tokens_to_client_limit() {
        let client = AnthropicClient {
            provider_id: "anthropic".into(),
            model: "claude-sonnet-4".into(),
            api_key: "test-key".into(),
            base_url: "https://api.anthropic.com".into(),
            http: Client::new(),
            max_tokens: 1000,
            context_window: 200_000,
        };
        let request = CompletionRequest {
            system_prompt: "You are helpful".into(),
            prompt: "Hello".into(),
            agent_tier: AgentTier::Micro,
            preferred_provider: None,
            max_tokens: 5000,
            temperature: 0.2,
            expect_json: false,
        };
        let body = client.build_request_body(&request);
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["system"], "You are helpful");
    }
}
