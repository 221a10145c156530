//! Error taxonomy for the debate service.
//!
//! Every failure a debate can surface is one of these variants; the
//! gateway maps them onto HTTP statuses with `http_status()`.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::providers::{ModelKey, ProviderError};
use crate::quota::{QuotaTier, StoreError};

#[derive(Debug, Error)]
pub enum DebateError {
    /// Malformed request. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The admission gate rejected the request.
    #[error("quota exceeded for {model} ({tier} tier), resets at {reset_at}")]
    QuotaExceeded {
        model: ModelKey,
        tier: QuotaTier,
        reset_at: DateTime<Utc>,
    },

    /// An upstream model call failed after any permitted retry.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Model output could not be decoded after the bounded retry.
    #[error("unparseable model output: {0}")]
    Parse(String),

    /// The quota store itself failed.
    #[error("quota store failure: {0}")]
    Store(#[from] StoreError),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DebateError {
    /// HTTP status the gateway reports for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::QuotaExceeded { .. } => 429,
            Self::Provider(_) => 502,
            Self::Parse(_) | Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Short machine-readable kind for wire payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Provider(_) => "provider",
            Self::Parse(_) => "parse",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ErrorCategory;

    #[test]
    fn status_mapping() {
        assert_eq!(DebateError::Validation("x".into()).http_status(), 400);
        assert_eq!(
            DebateError::QuotaExceeded {
                model: ModelKey::Claude,
                tier: QuotaTier::PerIdentity,
                reset_at: Utc::now(),
            }
            .http_status(),
            429
        );
        assert_eq!(
            DebateError::Provider(ProviderError::new(ErrorCategory::Overloaded, "busy"))
                .http_status(),
            502
        );
        assert_eq!(DebateError::Parse("bad".into()).http_status(), 500);
    }

    #[test]
    fn quota_message_names_model_and_tier() {
        let err = DebateError::QuotaExceeded {
            model: ModelKey::Gemini,
            tier: QuotaTier::Global,
            reset_at: Utc::now(),
        };
        let msg = err.to_string();
        assert!(msg.contains("gemini"));
        assert!(msg.contains("global"));
    }
}
