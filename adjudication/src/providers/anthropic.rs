//! Anthropic Messages API client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{http_client, ErrorCategory, ModelClient, ProviderError};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        model_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.into(),
            model_id: model_id.into(),
        })
    }

    fn categorize_body(status: u16, body: &Value) -> ErrorCategory {
        // Anthropic reports overload with its own error type, not
        // always a distinct status code.
        let error_type = body
            .get("error")
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("");
        match error_type {
            "overloaded_error" => ErrorCategory::Overloaded,
            "rate_limit_error" => ErrorCategory::RateLimited,
            "authentication_error" => ErrorCategory::Authentication,
            "permission_error" => ErrorCategory::Permission,
            "not_found_error" => ErrorCategory::NotFound,
            "request_too_large" => ErrorCategory::RequestTooLarge,
            _ => ProviderError::categorize_status(status),
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        debug!(model = %self.model_id, "anthropic generate");
        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&json!({
                "model": self.model_id,
                "max_tokens": max_tokens,
                "system": system_prompt,
                "messages": [{"role": "user", "content": user_prompt}],
            }))
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status().as_u16();
        let body: Value = response
            .json()
            .await
            .map_err(ProviderError::from_transport)?;

        if !(200..300).contains(&status) {
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("anthropic request failed")
                .to_string();
            return Err(
                ProviderError::new(Self::categorize_body(status, &body), message)
                    .with_status(status),
            );
        }

        body.get("content")
            .and_then(Value::as_array)
            .and_then(|blocks| blocks.first())
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::new(
                    ErrorCategory::Unknown,
                    "anthropic response had no text content block",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_type_beats_status_code() {
        let body = json!({"error": {"type": "overloaded_error", "message": "busy"}});
        assert_eq!(
            AnthropicClient::categorize_body(500, &body),
            ErrorCategory::Overloaded
        );
    }

    #[test]
    fn unknown_type_falls_back_to_status() {
        let body = json!({"error": {"type": "something_new", "message": "?"}});
        assert_eq!(
            AnthropicClient::categorize_body(429, &body),
            ErrorCategory::RateLimited
        );
    }
}
