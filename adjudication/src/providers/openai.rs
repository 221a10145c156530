//! OpenAI-compatible chat completions client.
//!
//! Serves both OpenAI proper and xAI, which exposes the same wire
//! format under a different base URL.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{http_client, ErrorCategory, ModelClient, ProviderError};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const XAI_BASE_URL: &str = "https://api.x.ai/v1";

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model_id: String,
}

impl OpenAiCompatClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.into(),
            base_url: base_url.into(),
            model_id: model_id.into(),
        })
    }

    fn categorize_body(status: u16, body: &Value) -> ErrorCategory {
        let error = body.get("error");
        let code = error
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let error_type = error
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if code == "context_length_exceeded" {
            return ErrorCategory::RequestTooLarge;
        }
        if code == "insufficient_quota" || error_type == "insufficient_quota" {
            return ErrorCategory::RateLimited;
        }
        if code == "content_filter" {
            return ErrorCategory::SafetyFilter;
        }
        ProviderError::categorize_status(status)
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        debug!(model = %self.model_id, base_url = %self.base_url, "chat completions generate");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model_id,
                "max_tokens": max_tokens,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt},
                ],
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
                .unwrap_or("chat completions request failed")
                .to_string();
            return Err(
                ProviderError::new(Self::categorize_body(status, &body), message)
                    .with_status(status),
            );
        }

        // A finish_reason of content_filter yields an empty/absent
        // message even on a 200.
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first());
        if let Some(choice) = choice {
            if choice.get("finish_reason").and_then(Value::as_str) == Some("content_filter") {
                return Err(ProviderError::new(
                    ErrorCategory::SafetyFilter,
                    "completion truncated by provider content filter",
                ));
            }
        }

        choice
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::new(
                    ErrorCategory::Unknown,
                    "chat completions response had no message content",
                )
            })
    }
}
