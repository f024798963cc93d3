use super::{http_client, status_error, LlmProvider, SYSTEM_PROMPT};
use crate::config::ProviderConfig;
use crate::error::{Result, SqlBuddyError};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages API adapter
pub struct ClaudeProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl ClaudeProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "system": SYSTEM_PROMPT,
            "messages": [
                {"role": "user", "content": prompt}
            ],
        })
    }
}

/// Concatenate the text blocks of a messages API response.
pub(crate) fn extract_content(response: &Value) -> Result<String> {
    if let Some(error) = response.get("error") {
        return Err(SqlBuddyError::ProviderRejected(format!(
            "Claude API error: {}",
            error
        )));
    }

    let blocks = response
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| {
            SqlBuddyError::Parse(format!("No content in Claude response: {}", response))
        })?;

    if response.get("stop_reason").and_then(|r| r.as_str()) == Some("max_tokens") {
        warn!("Claude response was truncated due to max_tokens");
    }

    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    let text = text.join("");

    if text.trim().is_empty() {
        return Err(SqlBuddyError::Parse(
            "Empty content in Claude response".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    async fn send(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        debug!(%url, model = %self.config.model, "Calling Claude");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| SqlBuddyError::Provider(format!("Claude API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.config.kind, status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SqlBuddyError::Provider(format!("Failed to read Claude response: {}", e)))?;
        extract_content(&body)
    }

    fn describe(&self) -> String {
        super::describe_config(&self.config)
    }
}
