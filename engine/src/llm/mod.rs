//! LLM Gateway component (spec §4.2): a thin per-provider `LlmClient`
//! trait, one implementation per provider (Anthropic, OpenAI-compatible,
//! and a deterministic sandbox), and a `Gateway` wrapper owning the
//! ordered cascade, rate limiting, retries, and schema repair.

pub mod anthropic;
pub mod client;
pub mod error;
pub mod gateway;
pub mod openai;
pub mod sandbox;
pub mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use error::LlmError;
pub use gateway::{Gateway, GenerateResult, create_client};
pub use openai::OpenAIClient;
pub use sandbox::SandboxClient;
pub use types::{AgentTier, CompletionRequest, CompletionResponse, TokenUsage};
