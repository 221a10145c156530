//! Append-only admission audit log with a byte budget.
//!
//! Every admission decision is recorded. A running total-bytes counter
//! caps the log: once the budget is exceeded the oldest records are
//! evicted first. The newest record always survives, even if it alone
//! exceeds the budget.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ledger::QuotaTier;
use super::store::StoreError;
use crate::providers::ModelKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuditOutcome {
    Admitted {
        total_units: u32,
    },
    Rejected {
        model: ModelKey,
        tier: QuotaTier,
        reset_at: DateTime<Utc>,
    },
    /// Caller brought their own API keys; the ledger was bypassed.
    UserKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub identity: String,
    pub claim: String,
    pub models: Vec<ModelKey>,
    #[serde(flatten)]
    pub outcome: AuditOutcome,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Most recent records, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError>;
}

struct MemoryAuditInner {
    lines: VecDeque<String>,
    total_bytes: usize,
}

pub struct MemoryAuditLog {
    budget_bytes: usize,
    inner: Mutex<MemoryAuditInner>,
}

impl MemoryAuditLog {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            inner: Mutex::new(MemoryAuditInner {
                lines: VecDeque::new(),
                total_bytes: 0,
            }),
        }
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record).map_err(|e| StoreError(e.to_string()))?;
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.total_bytes += line.len();
        inner.lines.push_back(line);
        let mut evicted = 0usize;
        while inner.total_bytes > self.budget_bytes && inner.lines.len() > 1 {
            if let Some(oldest) = inner.lines.pop_front() {
                inner.total_bytes -= oldest.len();
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, total_bytes = inner.total_bytes, "audit log evicted");
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let skip = inner.lines.len().saturating_sub(limit);
        Ok(inner
            .lines
            .iter()
            .skip(skip)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
