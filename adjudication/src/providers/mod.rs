//! Model provider adapters — one uniform `generate` capability over
//! heterogeneous LLM APIs.
//!
//! Each provider variant maps its own status codes, error fields, and
//! message substrings onto the shared [`ErrorCategory`] taxonomy, so
//! nothing provider-specific leaks past this module. No retry or
//! quota logic lives here.

pub mod anthropic;
pub mod google;
pub mod openai;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use anthropic::AnthropicClient;
pub use google::GeminiClient;
pub use openai::OpenAiCompatClient;

/// Default per-call HTTP timeout for provider requests.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Category of a normalized provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Provider is overloaded / temporarily unavailable.
    Overloaded,
    /// Provider-side rate limit (distinct from our own quota ledger).
    RateLimited,
    /// Invalid or missing API key.
    Authentication,
    /// Key is valid but not allowed to use this model.
    Permission,
    /// Model or endpoint does not exist.
    NotFound,
    /// Prompt exceeded the provider's request size limit.
    RequestTooLarge,
    /// The call exceeded its deadline.
    Timeout,
    /// Provider rejected the request shape.
    InvalidRequest,
    /// Output was blocked by the provider's safety layer.
    SafetyFilter,
    /// Connection-level failure before a response arrived.
    Network,
    /// Anything we could not classify.
    Unknown,
}

impl ErrorCategory {
    /// Whether a caller may reasonably retry after this failure.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Overloaded | Self::Timeout | Self::Network | Self::RateLimited | Self::Unknown
        )
    }

    /// Short user-facing description of the failure class.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Overloaded => "the model provider is overloaded, try again shortly",
            Self::RateLimited => "the model provider rate-limited this request",
            Self::Authentication => "the provider API key was rejected",
            Self::Permission => "the provider API key lacks access to this model",
            Self::NotFound => "the requested model does not exist",
            Self::RequestTooLarge => "the debate prompt exceeded the provider's size limit",
            Self::Timeout => "the model call timed out",
            Self::InvalidRequest => "the provider rejected the request as invalid",
            Self::SafetyFilter => "the provider's safety filter blocked the response",
            Self::Network => "could not reach the model provider",
            Self::Unknown => "the model provider returned an unexpected error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Overloaded => "overloaded",
            Self::RateLimited => "rate_limited",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::RequestTooLarge => "request_too_large",
            Self::Timeout => "timeout",
            Self::InvalidRequest => "invalid_request",
            Self::SafetyFilter => "safety_filter",
            Self::Network => "network",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A normalized provider failure.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("provider error [{category}]: {message}")]
pub struct ProviderError {
    pub category: ErrorCategory,
    /// HTTP status from the provider, when one was received.
    pub http_status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            http_status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    /// Map an HTTP status code onto the shared taxonomy.
    ///
    /// Providers refine this with body sniffing where their error
    /// payload is more specific than the status code.
    pub fn categorize_status(status: u16) -> ErrorCategory {
        match status {
            400 | 422 => ErrorCategory::InvalidRequest,
            401 => ErrorCategory::Authentication,
            403 => ErrorCategory::Permission,
            404 => ErrorCategory::NotFound,
            408 => ErrorCategory::Timeout,
            413 => ErrorCategory::RequestTooLarge,
            429 => ErrorCategory::RateLimited,
            502 | 503 | 529 => ErrorCategory::Overloaded,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Normalize a transport-level reqwest failure.
    pub fn from_transport(err: reqwest::Error) -> Self {
        let category = if err.is_timeout() {
            ErrorCategory::Timeout
        } else if err.is_connect() {
            ErrorCategory::Network
        } else {
            ErrorCategory::Network
        };
        Self::new(category, err.to_string())
    }
}

/// Uniform capability over all model providers.
///
/// Implementations own their HTTP client (with a per-call timeout) and
/// normalize provider-specific failures into [`ProviderError`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider-side model identifier (for logs).
    fn model_id(&self) -> &str;

    /// Generate a completion for `user_prompt` under `system_prompt`.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError>;
}

/// Provider family a model key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Anthropic,
    OpenAi,
    Google,
    Xai,
}

impl ProviderFamily {
    /// Environment variable holding the server-side API key.
    pub fn env_key(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
            Self::Xai => "XAI_API_KEY",
        }
    }
}

/// The debater/judge models the arena knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKey {
    Claude,
    Gpt4,
    Gemini,
    Grok,
}

impl ModelKey {
    /// All known models, in stable order.
    pub fn all() -> [ModelKey; 4] {
        [Self::Claude, Self::Gpt4, Self::Gemini, Self::Grok]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gpt4 => "gpt4",
            Self::Gemini => "gemini",
            Self::Grok => "grok",
        }
    }

    /// Human-readable model name.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude Sonnet 4.5",
            Self::Gpt4 => "GPT-4",
            Self::Gemini => "Gemini 2.5 Flash",
            Self::Grok => "Grok 3",
        }
    }

    /// Provider-side model identifier.
    pub fn provider_model_id(self) -> &'static str {
        match self {
            Self::Claude => "claude-sonnet-4-5-20250929",
            Self::Gpt4 => "gpt-4-turbo-preview",
            Self::Gemini => "gemini-2.5-flash",
            Self::Grok => "grok-3",
        }
    }

    pub fn family(self) -> ProviderFamily {
        match self {
            Self::Claude => ProviderFamily::Anthropic,
            Self::Gpt4 => ProviderFamily::OpenAi,
            Self::Gemini => ProviderFamily::Google,
            Self::Grok => ProviderFamily::Xai,
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModelKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "gpt4" => Ok(Self::Gpt4),
            "gemini" => Ok(Self::Gemini),
            "grok" => Ok(Self::Grok),
            other => Err(format!(
                "unknown model '{other}' (available: claude, gpt4, gemini, grok)"
            )),
        }
    }
}

/// API keys per provider family. Any subset may be present; a debate
/// can only use models whose family has a key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub google: Option<String>,
    pub xai: Option<String>,
}

impl ApiKeys {
    /// Load keys from the conventional environment variables.
    pub fn from_env() -> Self {
        Self {
            anthropic: std::env::var(ProviderFamily::Anthropic.env_key()).ok(),
            openai: std::env::var(ProviderFamily::OpenAi.env_key()).ok(),
            google: std::env::var(ProviderFamily::Google.env_key()).ok(),
            xai: std::env::var(ProviderFamily::Xai.env_key()).ok(),
        }
    }

    fn key_for(&self, family: ProviderFamily) -> Option<&str> {
        match family {
            ProviderFamily::Anthropic => self.anthropic.as_deref(),
            ProviderFamily::OpenAi => self.openai.as_deref(),
            ProviderFamily::Google => self.google.as_deref(),
            ProviderFamily::Xai => self.xai.as_deref(),
        }
    }

    /// Whether at least one provider key is present.
    pub fn any_present(&self) -> bool {
        self.anthropic.is_some()
            || self.openai.is_some()
            || self.google.is_some()
            || self.xai.is_some()
    }
}

/// Pre-built model clients keyed by [`ModelKey`].
///
/// Built once at startup from server keys, or per-request from
/// caller-supplied keys (which bypass the quota ledger).
pub struct ClientSet {
    clients: HashMap<ModelKey, Arc<dyn ModelClient>>,
}

impl ClientSet {
    /// Build clients for every model whose provider family has a key.
    pub fn from_keys(keys: &ApiKeys, call_timeout: Duration) -> Result<Self, ProviderError> {
        let mut clients: HashMap<ModelKey, Arc<dyn ModelClient>> = HashMap::new();
        for model in ModelKey::all() {
            let family = model.family();
            let Some(api_key) = keys.key_for(family) else {
                continue;
            };
            let client: Arc<dyn ModelClient> = match family {
                ProviderFamily::Anthropic => Arc::new(AnthropicClient::new(
                    api_key,
                    model.provider_model_id(),
                    call_timeout,
                )?),
                ProviderFamily::OpenAi => Arc::new(OpenAiCompatClient::new(
                    api_key,
                    openai::OPENAI_BASE_URL,
                    model.provider_model_id(),
                    call_timeout,
                )?),
                ProviderFamily::Xai => Arc::new(OpenAiCompatClient::new(
                    api_key,
                    openai::XAI_BASE_URL,
                    model.provider_model_id(),
                    call_timeout,
                )?),
                ProviderFamily::Google => Arc::new(GeminiClient::new(
                    api_key,
                    model.provider_model_id(),
                    call_timeout,
                )?),
            };
            clients.insert(model, client);
        }
        Ok(Self { clients })
    }

    /// Build a set from pre-constructed clients (tests, fakes).
    pub fn from_clients(clients: HashMap<ModelKey, Arc<dyn ModelClient>>) -> Self {
        Self { clients }
    }

    /// Resolve the client for a model, failing with an authentication
    /// error when no key was configured for its provider family.
    pub fn client(&self, model: ModelKey) -> Result<Arc<dyn ModelClient>, ProviderError> {
        self.clients.get(&model).cloned().ok_or_else(|| {
            ProviderError::new(
                ErrorCategory::Authentication,
                format!(
                    "no API key configured for {} (set {})",
                    model,
                    model.family().env_key()
                ),
            )
        })
    }

    /// Models this set can serve.
    pub fn available(&self) -> Vec<ModelKey> {
        let mut keys: Vec<ModelKey> = self.clients.keys().copied().collect();
        keys.sort();
        keys
    }
}

/// Build a reqwest client with the shared per-call timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::new(ErrorCategory::Unknown, e.to_string()))
}
