//! LLM Gateway error types, classified per the taxonomy of spec §7.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("api error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("output failed schema validation: {0}")]
    Schema(String),

    #[error("no provider available")]
    NoProvider,
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => *status >= 500,
            Self::InvalidResponse(_) | Self::Json(_) | Self::Schema(_) | Self::NoProvider => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Maps to the error taxonomy of spec §7.
    pub fn taxonomy_code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "ERR_PROVIDER_QUOTA",
            Self::Schema(_) => "ERR_SCHEMA",
            Self::NoProvider => "ERR_NO_PROVIDER",
            // Network failures, persistent 5xx, and exhausted timeouts all
            // exhaust the cascade the same way (§7).
            Self::Timeout(_) | Self::ApiError { .. } | Self::Network(_) | Self::InvalidResponse(_) | Self::Json(_) => {
                "ERR_PROVIDER_TIMEOUT"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable_and_reports_retry_after() {
        let err = LlmError::RateLimited { retry_after: Duration::from_secs(30) };
        assert!(err.is_retryable());
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(err.taxonomy_code(), "ERR_PROVIDER_QUOTA");
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = LlmError::ApiError { status: 400, message: "bad request".into() };
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = LlmError::ApiError { status: 503, message: "unavailable".into() };
        assert!(err.is_retryable());
    }

    #[test]
    fn schema_failure_is_not_retryable() {
        let err = LlmError::Schema("missing field `gap`".into());
        assert!(!err.is_retryable());
        assert_eq!(err.taxonomy_code(), "ERR_SCHEMA");
    }
}
