//! Usage quotas: the sliding-window store, the tiered ledger, the
//! all-or-nothing admission gate, and the admission audit log.

pub mod admission;
pub mod audit;
pub mod ledger;
pub mod store;

pub use admission::{required_units, AdmissionGate, AdmissionTicket};
pub use audit::{AuditLog, AuditOutcome, AuditRecord, MemoryAuditLog};
pub use ledger::{ModelQuotaStatus, QuotaLedger, QuotaLimits, QuotaTier};
pub use store::{
    MemoryQuotaStore, QuotaStore, RedisQuotaStore, ReserveOutcome, StoreError, UsageSnapshot,
};
