//! The quota ledger: tier limits, scope keys, and snapshot-backed
//! status reads over a [`QuotaStore`].
//!
//! Each tier keeps its own independent counter. A privileged identity
//! gets a larger per-identity limit; it is never carved out of the
//! default limit by subtraction.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::store::{QuotaStore, ReserveOutcome, StoreError, UsageSnapshot};
use crate::providers::ModelKey;

/// Which counter rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaTier {
    PerIdentity,
    Global,
}

impl std::fmt::Display for QuotaTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PerIdentity => "per_identity",
            Self::Global => "global",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct QuotaLimits {
    /// Units per identity per model inside one window.
    pub per_identity: u64,
    /// Larger limit applied to identities in `privileged_identities`.
    pub privileged: u64,
    /// Service-wide backstop per model, all identities combined.
    pub global_per_model: u64,
    pub window: Duration,
    pub privileged_identities: HashSet<String>,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            per_identity: 25,
            privileged: 250,
            global_per_model: 500,
            window: Duration::from_secs(24 * 60 * 60),
            privileged_identities: HashSet::new(),
        }
    }
}

/// A granted reservation, held so a failed admission can roll it back.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub scope: String,
    pub snapshot_scope: String,
    pub id: String,
    pub units: u32,
    /// Usage recorded at grant time, for the rollback snapshot.
    pub used_at_grant: u64,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of one tier reservation.
#[derive(Debug)]
pub enum LedgerOutcome {
    Granted(Reservation),
    Denied { reset_at: DateTime<Utc> },
}

/// Per-model status row for the quota endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelQuotaStatus {
    pub model: ModelKey,
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub global_used: u64,
    pub global_limit: u64,
    pub global_remaining: u64,
    pub global_reset_at: DateTime<Utc>,
}

pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    limits: QuotaLimits,
}

fn identity_usage_key(identity: &str, model: ModelKey) -> String {
    format!("quota:usage:{identity}:{model}")
}

fn global_usage_key(model: ModelKey) -> String {
    format!("quota:usage-global:{model}")
}

fn identity_snapshot_key(identity: &str, model: ModelKey) -> String {
    format!("quota:snapshot:{identity}:{model}")
}

fn global_snapshot_key(model: ModelKey) -> String {
    format!("quota:snapshot-global:{model}")
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn QuotaStore>, limits: QuotaLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    fn identity_limit(&self, identity: &str) -> u64 {
        if self.limits.privileged_identities.contains(identity) {
            self.limits.privileged
        } else {
            self.limits.per_identity
        }
    }

    /// Reserve `units` against one tier's counter, writing the
    /// snapshot for the scope on either outcome.
    async fn reserve_scope(
        &self,
        usage_scope: String,
        snapshot_scope: String,
        units: u32,
        limit: u64,
    ) -> Result<LedgerOutcome, StoreError> {
        let outcome = self
            .store
            .reserve(&usage_scope, units, limit, self.limits.window)
            .await?;
        match outcome {
            ReserveOutcome::Accepted {
                used,
                reset_at,
                reservation,
            } => {
                self.store
                    .write_snapshot(&snapshot_scope, &UsageSnapshot { used, reset_at })
                    .await?;
                debug!(scope = %usage_scope, units, used, "quota reserved");
                Ok(LedgerOutcome::Granted(Reservation {
                    scope: usage_scope,
                    snapshot_scope,
                    id: reservation,
                    units,
                    used_at_grant: used,
                    reset_at,
                }))
            }
            ReserveOutcome::Rejected { used, reset_at } => {
                self.store
                    .write_snapshot(&snapshot_scope, &UsageSnapshot { used, reset_at })
                    .await?;
                info!(scope = %usage_scope, units, used, limit, "quota denied");
                Ok(LedgerOutcome::Denied { reset_at })
            }
        }
    }

    pub async fn reserve_global(
        &self,
        model: ModelKey,
        units: u32,
    ) -> Result<LedgerOutcome, StoreError> {
        self.reserve_scope(
            global_usage_key(model),
            global_snapshot_key(model),
            units,
            self.limits.global_per_model,
        )
        .await
    }

    pub async fn reserve_identity(
        &self,
        identity: &str,
        model: ModelKey,
        units: u32,
    ) -> Result<LedgerOutcome, StoreError> {
        self.reserve_scope(
            identity_usage_key(identity, model),
            identity_snapshot_key(identity, model),
            units,
            self.identity_limit(identity),
        )
        .await
    }

    /// Roll back a granted reservation and restore its snapshot.
    pub async fn release(&self, reservation: &Reservation) -> Result<(), StoreError> {
        self.store
            .release(&reservation.scope, &reservation.id, reservation.units)
            .await?;
        let used = reservation
            .used_at_grant
            .saturating_sub(u64::from(reservation.units));
        self.store
            .write_snapshot(
                &reservation.snapshot_scope,
                &UsageSnapshot {
                    used,
                    reset_at: reservation.reset_at,
                },
            )
            .await
    }

    /// Per-model status for one identity, from a single batched
    /// snapshot read. Consumes nothing.
    pub async fn status(&self, identity: &str) -> Result<Vec<ModelQuotaStatus>, StoreError> {
        let models = ModelKey::all();
        let mut scopes = Vec::with_capacity(models.len() * 2);
        for model in models {
            scopes.push(identity_snapshot_key(identity, model));
            scopes.push(global_snapshot_key(model));
        }
        let snapshots = self.store.read_snapshots(&scopes).await?;

        let limit = self.identity_limit(identity);
        let fresh = || UsageSnapshot {
            used: 0,
            reset_at: Utc::now()
                + chrono::Duration::from_std(self.limits.window)
                    .unwrap_or_else(|_| chrono::Duration::hours(24)),
        };

        Ok(models
            .iter()
            .enumerate()
            .map(|(i, &model)| {
                let own = snapshots[i * 2].clone().unwrap_or_else(fresh);
                let global = snapshots[i * 2 + 1].clone().unwrap_or_else(fresh);
                ModelQuotaStatus {
                    model,
                    used: own.used,
                    limit,
                    remaining: limit.saturating_sub(own.used),
                    reset_at: own.reset_at,
                    global_used: global.used,
                    global_limit: self.limits.global_per_model,
                    global_remaining: self.limits.global_per_model.saturating_sub(global.used),
                    global_reset_at: global.reset_at,
                }
            })
            .collect())
    }

    /// Delete an identity's counters and snapshots for every model,
    /// optionally the global backstops too. Returns keys removed.
    pub async fn reset_identity(
        &self,
        identity: &str,
        include_global: bool,
    ) -> Result<u64, StoreError> {
        let mut scopes = Vec::new();
        for model in ModelKey::all() {
            scopes.push(identity_usage_key(identity, model));
            scopes.push(identity_snapshot_key(identity, model));
            if include_global {
                scopes.push(global_usage_key(model));
                scopes.push(global_snapshot_key(model));
            }
        }
        let removed = self.store.reset(&scopes).await?;
        info!(identity, include_global, removed, "quota reset");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::store::MemoryQuotaStore;

    fn ledger(per_identity: u64, global: u64) -> QuotaLedger {
        QuotaLedger::new(
            Arc::new(MemoryQuotaStore::new()),
            QuotaLimits {
                per_identity,
                privileged: per_identity * 10,
                global_per_model: global,
                ..QuotaLimits::default()
            },
        )
    }

    #[tokio::test]
    async fn privileged_identity_gets_larger_limit() {
        let mut limits = QuotaLimits {
            per_identity: 2,
            privileged: 20,
            ..QuotaLimits::default()
        };
        limits.privileged_identities.insert("10.0.0.1".into());
        let ledger = QuotaLedger::new(Arc::new(MemoryQuotaStore::new()), limits);

        assert!(matches!(
            ledger.reserve_identity("10.0.0.1", ModelKey::Claude, 5).await.unwrap(),
            LedgerOutcome::Granted(_)
        ));
        assert!(matches!(
            ledger.reserve_identity("10.0.0.2", ModelKey::Claude, 5).await.unwrap(),
            LedgerOutcome::Denied { .. }
        ));
    }

    #[tokio::test]
    async fn identities_do_not_share_counters() {
        let ledger = ledger(3, 100);
        ledger.reserve_identity("a", ModelKey::Gpt4, 3).await.unwrap();
        assert!(matches!(
            ledger.reserve_identity("a", ModelKey::Gpt4, 1).await.unwrap(),
            LedgerOutcome::Denied { .. }
        ));
        assert!(matches!(
            ledger.reserve_identity("b", ModelKey::Gpt4, 3).await.unwrap(),
            LedgerOutcome::Granted(_)
        ));
    }

    #[tokio::test]
    async fn global_backstop_is_independent_of_identities() {
        let ledger = ledger(100, 4);
        assert!(matches!(
            ledger.reserve_global(ModelKey::Gemini, 4).await.unwrap(),
            LedgerOutcome::Granted(_)
        ));
        assert!(matches!(
            ledger.reserve_global(ModelKey::Gemini, 1).await.unwrap(),
            LedgerOutcome::Denied { .. }
        ));
        // A different model's backstop is untouched.
        assert!(matches!(
            ledger.reserve_global(ModelKey::Claude, 1).await.unwrap(),
            LedgerOutcome::Granted(_)
        ));
    }

    #[tokio::test]
    async fn release_restores_capacity_and_snapshot() {
        let ledger = ledger(5, 100);
        let reservation = match ledger.reserve_identity("a", ModelKey::Grok, 5).await.unwrap() {
            LedgerOutcome::Granted(r) => r,
            LedgerOutcome::Denied { .. } => panic!("expected grant"),
        };
        ledger.release(&reservation).await.unwrap();

        let status = ledger.status("a").await.unwrap();
        let grok = status.iter().find(|s| s.model == ModelKey::Grok).unwrap();
        assert_eq!(grok.used, 0);
        assert_eq!(grok.remaining, 5);

        assert!(matches!(
            ledger.reserve_identity("a", ModelKey::Grok, 5).await.unwrap(),
            LedgerOutcome::Granted(_)
        ));
    }

    #[tokio::test]
    async fn status_covers_every_model_and_consumes_nothing() {
        let ledger = ledger(10, 50);
        ledger.reserve_identity("a", ModelKey::Claude, 4).await.unwrap();

        for _ in 0..3 {
            let status = ledger.status("a").await.unwrap();
            assert_eq!(status.len(), ModelKey::all().len());
            let claude = status.iter().find(|s| s.model == ModelKey::Claude).unwrap();
            assert_eq!(claude.used, 4);
            assert_eq!(claude.remaining, 6);
            let gemini = status.iter().find(|s| s.model == ModelKey::Gemini).unwrap();
            assert_eq!(gemini.used, 0);
            assert_eq!(gemini.remaining, 10);
        }
    }

    #[tokio::test]
    async fn reset_clears_identity_usage() {
        let ledger = ledger(2, 100);
        ledger.reserve_identity("a", ModelKey::Claude, 2).await.unwrap();
        assert!(matches!(
            ledger.reserve_identity("a", ModelKey::Claude, 1).await.unwrap(),
            LedgerOutcome::Denied { .. }
        ));

        ledger.reset_identity("a", false).await.unwrap();
        assert!(matches!(
            ledger.reserve_identity("a", ModelKey::Claude, 2).await.unwrap(),
            LedgerOutcome::Granted(_)
        ));
    }
}
