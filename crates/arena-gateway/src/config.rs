//! Environment-driven gateway configuration.

use std::collections::HashSet;
use std::time::Duration;

use adjudication::providers::ApiKeys;
use adjudication::QuotaLimits;

/// Top-level gateway configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Redis url for the shared quota store; unset means the
    /// in-process store (single-node deployments, tests).
    pub redis_url: Option<String>,
    /// Units per identity per model inside one window.
    pub per_identity_limit: u64,
    /// Limit applied to privileged identities instead.
    pub privileged_limit: u64,
    /// Service-wide backstop per model.
    pub global_limit: u64,
    /// Sliding-window length.
    pub window: Duration,
    /// Identities granted the privileged limit (comma-separated env).
    pub privileged_identities: HashSet<String>,
    /// Hard cap on a single debate's wall time.
    pub debate_timeout: Duration,
    /// Byte budget for the admission audit log.
    pub audit_budget_bytes: usize,
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::env::var("ARENA_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".into()),
            redis_url: std::env::var("ARENA_REDIS_URL").ok(),
            per_identity_limit: env_u64("ARENA_QUOTA_PER_IDENTITY", 25),
            privileged_limit: env_u64("ARENA_QUOTA_PRIVILEGED", 250),
            global_limit: env_u64("ARENA_QUOTA_GLOBAL", 500),
            window: Duration::from_secs(env_u64("ARENA_QUOTA_WINDOW_SECS", 24 * 60 * 60)),
            privileged_identities: std::env::var("ARENA_PRIVILEGED_IDENTITIES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            debate_timeout: Duration::from_secs(env_u64("ARENA_DEBATE_TIMEOUT_SECS", 600)),
            audit_budget_bytes: env_u64("ARENA_AUDIT_BUDGET_BYTES", 1 << 20) as usize,
        }
    }
}

impl ArenaConfig {
    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            per_identity: self.per_identity_limit,
            privileged: self.privileged_limit,
            global_per_model: self.global_limit,
            window: self.window,
            privileged_identities: self.privileged_identities.clone(),
        }
    }

    /// Server-side provider keys from the conventional variables.
    pub fn api_keys(&self) -> ApiKeys {
        ApiKeys::from_env()
    }
}
