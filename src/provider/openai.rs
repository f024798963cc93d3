use super::{http_client, status_error, LlmProvider, SYSTEM_PROMPT};
use crate::config::ProviderConfig;
use crate::error::{Result, SqlBuddyError};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// OpenAI chat completions adapter
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.config.temperature,
        });

        if uses_completion_tokens(&self.config.model) {
            body["max_completion_tokens"] = json!(self.config.max_tokens);
        } else {
            body["max_tokens"] = json!(self.config.max_tokens);
        }
        body
    }
}

/// Newer model families only accept `max_completion_tokens`.
fn uses_completion_tokens(model: &str) -> bool {
    ["gpt-4", "gpt-5", "o1", "o3", "o4"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

/// Pull the completion text out of a chat completions response.
pub(crate) fn extract_content(response: &Value) -> Result<String> {
    if let Some(error) = response.get("error") {
        return Err(SqlBuddyError::ProviderRejected(format!(
            "OpenAI API error: {}",
            error
        )));
    }

    let choice = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| {
            SqlBuddyError::Parse(format!("No choices in OpenAI response: {}", response))
        })?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("content_filter") => {
            return Err(SqlBuddyError::ProviderRejected(
                "OpenAI response was filtered by content policy".to_string(),
            ))
        }
        Some("length") => warn!("OpenAI response was truncated due to length limit"),
        _ => {}
    }

    let content = choice["message"]["content"].as_str().unwrap_or("");
    if content.trim().is_empty() {
        return Err(SqlBuddyError::Parse(
            "Empty content in OpenAI response".to_string(),
        ));
    }
    Ok(content.to_string())
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn send(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!(%url, model = %self.config.model, "Calling OpenAI");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| SqlBuddyError::Provider(format!("OpenAI API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.config.kind, status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SqlBuddyError::Provider(format!("Failed to read OpenAI response: {}", e)))?;
        extract_content(&body)
    }

    fn describe(&self) -> String {
        super::describe_config(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn test_request_body() {
        let provider = OpenAiProvider::new(
            ProviderConfig::new(ProviderKind::OpenAi, "key").with_model("gpt-4o"),
        );
        let body = provider.request_body("list users");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "list users");
        assert_eq!(body["max_completion_tokens"], 2000);

        let provider = OpenAiProvider::new(
            ProviderConfig::new(ProviderKind::OpenAi, "key").with_model("gpt-3.5-turbo"),
        );
        assert_eq!(provider.request_body("x")["max_tokens"], 2000);
    }

    #[test]
    fn test_completion_tokens_models() {
        for model in ["gpt-4o", "gpt-5.2", "o1-mini", "o3", "o4-mini"] {
            assert!(uses_completion_tokens(model), "{}", model);
        }
        for model in ["gpt-3.5-turbo", "llama-3-70b-foo1", "mistral-pro1"] {
            assert!(!uses_completion_tokens(model), "{}", model);
        }
    }

    #[test]
    fn test_extract_content() {
        let response = json!({
            "choices": [{"message": {"content": "```sql\nSELECT 1\n```"}, "finish_reason": "stop"}]
        });
        assert_eq!(extract_content(&response).unwrap(), "```sql\nSELECT 1\n```");
    }

    #[test]
    fn test_extract_content_errors() {
        assert!(matches!(
            extract_content(&json!({"error": {"message": "bad key"}})),
            Err(SqlBuddyError::ProviderRejected(_))
        ));
        assert!(matches!(
            extract_content(&json!({"choices": []})),
            Err(SqlBuddyError::Parse(_))
        ));
        assert!(matches!(
            extract_content(&json!({"choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}]})),
            Err(SqlBuddyError::ProviderRejected(_))
        ));
    }
}
