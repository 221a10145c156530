//! Google Gemini `generateContent` client.
//!
//! Gemini has no system role on this endpoint, so the system prompt is
//! prepended to the user prompt.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{http_client, ErrorCategory, ModelClient, ProviderError};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
}

impl GeminiClient {
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
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        debug!(model = %self.model_id, "gemini generate");
        let url = format!(
            "{BASE_URL}/{}:generateContent?key={}",
            self.model_id, self.api_key
        );
        let combined = format!("{system_prompt}\n\n{user_prompt}");
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "contents": [{"parts": [{"text": combined}]}],
                "generationConfig": {"maxOutputTokens": max_tokens},
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
                .unwrap_or("gemini request failed")
                .to_string();
            return Err(
                ProviderError::new(ProviderError::categorize_status(status), message)
                    .with_status(status),
            );
        }

        // Safety blocks arrive as a 200 with a block reason or a
        // SAFETY finish reason and no text parts.
        if let Some(reason) = body
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(Value::as_str)
        {
            return Err(ProviderError::new(
                ErrorCategory::SafetyFilter,
                format!("prompt blocked: {reason}"),
            ));
        }

        let candidate = body
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first());
        if let Some(candidate) = candidate {
            if candidate.get("finishReason").and_then(Value::as_str) == Some("SAFETY") {
                return Err(ProviderError::new(
                    ErrorCategory::SafetyFilter,
                    "candidate blocked by safety filter",
                ));
            }
        }

        candidate
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::new(
                    ErrorCategory::Unknown,
                    "gemini response had no text part",
                )
            })
    }
}
