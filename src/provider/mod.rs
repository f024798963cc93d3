//! LLM provider adapters
//!
//! Each adapter turns a prompt into raw completion text. Failures are classified so the
//! orchestrator can tell retryable conditions apart from permanent ones.

pub mod claude;
pub mod openai;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{Result, SqlBuddyError};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;

pub use claude::ClaudeProvider;
pub use openai::OpenAiProvider;

/// System message sent with every request
pub const SYSTEM_PROMPT: &str = "You are an expert SQL assistant. Answer in the requested format. Put SQL only inside fenced ```sql code blocks.";

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send `prompt` and return the raw completion text.
    async fn send(&self, prompt: &str) -> Result<String>;

    /// Provider name and generation parameters, used in logs and `test` output
    fn describe(&self) -> String;
}

/// Construct the adapter selected by `config.kind`.
pub fn build_provider(config: ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    if config.api_key.trim().is_empty() {
        return Err(SqlBuddyError::Config(format!(
            "{} API key is empty",
            config.kind
        )));
    }
    let provider: Arc<dyn LlmProvider> = match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)),
        ProviderKind::Claude => Arc::new(ClaudeProvider::new(config)),
    };
    Ok(provider)
}

pub(crate) fn describe_config(config: &ProviderConfig) -> String {
    format!(
        "{} (model {}, temperature {}, max tokens {})",
        config.kind, config.model, config.temperature, config.max_tokens
    )
}

/// Map a non-success HTTP status to the error class the retry loop understands.
pub(crate) fn status_error(provider: ProviderKind, status: StatusCode, body: &str) -> SqlBuddyError {
    let message = format!("{} API error ({}): {}", provider, status, body.trim());
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        SqlBuddyError::Provider(message)
    } else {
        SqlBuddyError::ProviderRejected(message)
    }
}

/// Shared HTTP client; per-attempt deadlines are enforced by the retry loop.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let transient = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::REQUEST_TIMEOUT,
        ];
        for status in transient {
            assert!(status_error(ProviderKind::OpenAi, status, "").is_transient());
        }

        let permanent = [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::UNPROCESSABLE_ENTITY,
        ];
        for status in permanent {
            let err = status_error(ProviderKind::Claude, status, "invalid x-api-key");
            assert!(matches!(err, SqlBuddyError::ProviderRejected(_)));
        }
    }

    #[test]
    fn test_build_provider_requires_key() {
        let config = ProviderConfig::new(ProviderKind::OpenAi, "  ");
        assert!(matches!(build_provider(config), Err(SqlBuddyError::Config(_))));

        let provider = build_provider(ProviderConfig::new(ProviderKind::Claude, "key")).unwrap();
        assert_eq!(
            provider.describe(),
            "claude (model claude-3-5-sonnet-20241022, temperature 0.1, max tokens 2000)"
        );
    }
}
