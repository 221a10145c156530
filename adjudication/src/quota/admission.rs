//! The admission gate: all-or-nothing quota reservation for one
//! debate request.
//!
//! Every unit a debate can consume is reserved up front — T turn
//! units for each debater role a model fills plus one judge unit —
//! before any model call happens. Reservation is two-phase per model
//! (global backstop first, then the caller's own counter); if any
//! tier denies, everything already granted in this request is
//! released, so a rejected request never leaves partial consumption
//! behind. The in-debate decode retry is not metered again.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::ledger::{LedgerOutcome, QuotaLedger, QuotaTier, Reservation};
use crate::error::DebateError;
use crate::protocol::types::DebateRequest;
use crate::providers::ModelKey;

/// Units each distinct model needs for this request: one per turn it
/// argues, plus one if it judges. A model filling several roles pays
/// for all of them.
pub fn required_units(request: &DebateRequest) -> BTreeMap<ModelKey, u32> {
    let mut units = BTreeMap::new();
    *units.entry(request.pro_model).or_insert(0) += request.rounds;
    *units.entry(request.con_model).or_insert(0) += request.rounds;
    *units.entry(request.judge_model).or_insert(0) += 1;
    units
}

/// Proof that a request's full cost was reserved.
#[derive(Debug)]
pub struct AdmissionTicket {
    reservations: Vec<Reservation>,
}

impl AdmissionTicket {
    pub fn total_units(&self) -> u32 {
        self.reservations.iter().map(|r| r.units).sum::<u32>() / 2
    }
}

pub struct AdmissionGate {
    ledger: Arc<QuotaLedger>,
}

impl AdmissionGate {
    pub fn new(ledger: Arc<QuotaLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Reserve the request's full cost, or reject having consumed
    /// nothing.
    pub async fn admit(
        &self,
        identity: &str,
        request: &DebateRequest,
    ) -> Result<AdmissionTicket, DebateError> {
        let units = required_units(request);
        let mut granted: Vec<Reservation> = Vec::with_capacity(units.len() * 2);

        for (&model, &n) in &units {
            let global = match self.ledger.reserve_global(model, n).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.rollback(&granted).await;
                    return Err(err.into());
                }
            };
            match global {
                LedgerOutcome::Granted(r) => granted.push(r),
                LedgerOutcome::Denied { reset_at } => {
                    self.rollback(&granted).await;
                    return Err(DebateError::QuotaExceeded {
                        model,
                        tier: QuotaTier::Global,
                        reset_at,
                    });
                }
            }

            let own = match self.ledger.reserve_identity(identity, model, n).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.rollback(&granted).await;
                    return Err(err.into());
                }
            };
            match own {
                LedgerOutcome::Granted(r) => granted.push(r),
                LedgerOutcome::Denied { reset_at } => {
                    self.rollback(&granted).await;
                    return Err(DebateError::QuotaExceeded {
                        model,
                        tier: QuotaTier::PerIdentity,
                        reset_at,
                    });
                }
            }
        }

        let ticket = AdmissionTicket {
            reservations: granted,
        };
        info!(identity, total_units = ticket.total_units(), "request admitted");
        Ok(ticket)
    }

    async fn rollback(&self, granted: &[Reservation]) {
        for reservation in granted.iter().rev() {
            if let Err(err) = self.ledger.release(reservation).await {
                // The window will expire these entries anyway.
                warn!(scope = %reservation.scope, %err, "rollback release failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Side;
    use crate::quota::ledger::QuotaLimits;
    use crate::quota::store::MemoryQuotaStore;

    fn request(rounds: u32, pro: ModelKey, con: ModelKey, judge: ModelKey) -> DebateRequest {
        DebateRequest {
            claim: "c".into(),
            rounds,
            pro_model: pro,
            con_model: con,
            judge_model: judge,
            first_speaker: Side::Pro,
        }
    }

    fn gate(per_identity: u64, global: u64) -> AdmissionGate {
        AdmissionGate::new(Arc::new(QuotaLedger::new(
            Arc::new(MemoryQuotaStore::new()),
            QuotaLimits {
                per_identity,
                privileged: per_identity,
                global_per_model: global,
                ..QuotaLimits::default()
            },
        )))
    }

    #[test]
    fn unit_cost_sums_roles() {
        // Three distinct models, 3 rounds: debaters pay 3, judge 1.
        let units = required_units(&request(3, ModelKey::Claude, ModelKey::Gpt4, ModelKey::Gemini));
        assert_eq!(units[&ModelKey::Claude], 3);
        assert_eq!(units[&ModelKey::Gpt4], 3);
        assert_eq!(units[&ModelKey::Gemini], 1);

        // One model in all three roles pays 2T+1.
        let units = required_units(&request(2, ModelKey::Grok, ModelKey::Grok, ModelKey::Grok));
        assert_eq!(units[&ModelKey::Grok], 5);
        assert_eq!(units.len(), 1);
    }

    #[tokio::test]
    async fn admit_within_limits() {
        let gate = gate(10, 100);
        let req = request(3, ModelKey::Claude, ModelKey::Gpt4, ModelKey::Gemini);
        let ticket = gate.admit("1.2.3.4", &req).await.unwrap();
        assert_eq!(ticket.total_units(), 7);
    }

    #[tokio::test]
    async fn identity_denial_reports_tier_and_model() {
        let gate = gate(2, 100);
        let req = request(3, ModelKey::Claude, ModelKey::Gpt4, ModelKey::Gemini);
        let err = gate.admit("1.2.3.4", &req).await.unwrap_err();
        match err {
            DebateError::QuotaExceeded { model, tier, .. } => {
                assert_eq!(model, ModelKey::Claude);
                assert_eq!(tier, QuotaTier::PerIdentity);
            }
            other => panic!("expected quota error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejection_rolls_back_everything() {
        // Claude fits everywhere; gpt4's global backstop is too small,
        // so the whole request must be refunded.
        let gate = gate(100, 100);
        let filler = request(6, ModelKey::Gpt4, ModelKey::Gpt4, ModelKey::Gpt4);
        for i in 0..7 {
            gate.admit(&format!("9.9.9.{i}"), &filler).await.unwrap();
        }
        gate.admit(
            "9.9.9.7",
            &request(2, ModelKey::Gpt4, ModelKey::Gpt4, ModelKey::Gpt4),
        )
        .await
        .unwrap();
        // 96 of 100 global gpt4 units consumed; the next request needs
        // 7 (6 con turns + judge) and must bounce off the backstop.
        let req = request(6, ModelKey::Claude, ModelKey::Gpt4, ModelKey::Gpt4);
        let err = gate.admit("1.2.3.4", &req).await.unwrap_err();
        assert!(matches!(
            err,
            DebateError::QuotaExceeded {
                model: ModelKey::Gpt4,
                tier: QuotaTier::Global,
                ..
            }
        ));

        // Claude's grants were rolled back: the identity still has its
        // full allowance.
        let status = gate.ledger().status("1.2.3.4").await.unwrap();
        let claude = status.iter().find(|s| s.model == ModelKey::Claude).unwrap();
        assert_eq!(claude.used, 0);
        assert_eq!(claude.global_used, 0);
    }

    #[tokio::test]
    async fn concurrent_admissions_never_oversell_the_backstop() {
        // Each request needs 2 global claude units against a backstop
        // of 5; 20 concurrent callers race, at most 2 can win.
        let gate = Arc::new(gate(1_000, 5));
        let mut handles = Vec::new();
        for i in 0..20 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                let req = request(2, ModelKey::Claude, ModelKey::Gpt4, ModelKey::Gemini);
                gate.admit(&format!("10.0.0.{i}"), &req).await.is_ok()
            }));
        }
        let mut admitted: u64 = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 2, "backstop of 5 fits exactly two 2-unit winners");

        // All-or-nothing: the losers' rollbacks stranded nothing, so
        // the one remaining claude unit is still claimable.
        let one_claude_unit = request(1, ModelKey::Gemini, ModelKey::Gemini, ModelKey::Claude);
        gate.admit("10.0.1.1", &one_claude_unit).await.unwrap();
        let err = gate.admit("10.0.1.2", &one_claude_unit).await.unwrap_err();
        assert!(matches!(
            err,
            DebateError::QuotaExceeded {
                model: ModelKey::Claude,
                tier: QuotaTier::Global,
                ..
            }
        ));
    }
}
