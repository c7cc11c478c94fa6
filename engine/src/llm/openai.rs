//! OpenAI-compatible Chat Completions client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::ProviderConfig;

use super::client::LlmClient;
use super::error::LlmError;
use super::types::{CompletionRequest, CompletionResponse, TokenUsage};

pub struct OpenAIClient {
    provider_id: String,
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    context_window: u32,
}

impl OpenAIClient {
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
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.prompt},
            ],
        })
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(request);
        let started = Instant::now();

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
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

        let api_response: OpenAiResponse = response.json().await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let text = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            provider: self.provider_id.clone(),
            model: self.model.clone(),
            usage: TokenUsage {
                prompt_tokens: api_response.usage.prompt_tokens as u32,
                completion_tokens: api_response.usage.completion_tokens as u32,
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
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::AgentTier;

    #[test]
    fn build_request_body_places_system_prompt_as_message() {
        let client = OpenAIClient {
            provider_id: "openai".into(),
            model: "gpt-4o".into(),
            api_key: "test-key".into(),
            base_url: "https://api.openai.com".into(),
            http: Client::new(),
            max_tokens: 1000,
            context_window: 128_000,
        };
        let request = CompletionRequest {
            system_prompt: "You are helpful".into(),
            prompt: "Hello".into(),
            agent_tier: AgentTier::Meso,
            preferred_provider: None,
            max_tokens: 200,
            temperature: 0.0,
            expect_json: true,
        };
        let body = client.build_request_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
    }
}
