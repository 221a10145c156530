//! Adjudication: a structured claim-debate engine.
//!
//! Two model-backed debaters argue opposite sides of a claim over a
//! fixed number of rounds; a model-backed judge weighs the transcript
//! and returns a verdict. Every model call is paid for up front
//! through a tiered, concurrency-safe quota ledger.
//!
//! Layering:
//! - [`providers`] — uniform async clients over heterogeneous LLM APIs
//! - [`decode`] — lenient JSON object decoding of model output
//! - [`protocol`] — turns, transcripts, prompts, and the debate loop
//! - [`judge`] — verdict adjudication
//! - [`quota`] — sliding-window store, ledger, admission gate, audit
//! - [`events`] — ordered progress events and sinks

pub mod decode;
pub mod error;
pub mod events;
pub mod judge;
pub mod protocol;
pub mod providers;
pub mod quota;

pub use error::DebateError;
pub use events::{BufferSink, ChannelSink, NullSink, ProgressEvent, ProgressSink};
pub use judge::{Verdict, VerdictLabel};
pub use protocol::{DebateEngine, DebateFailure, DebateRecord, DebateRequest, Side, Transcript, Turn};
pub use providers::{ApiKeys, ClientSet, ErrorCategory, ModelClient, ModelKey, ProviderError};
pub use quota::{
    AdmissionGate, AuditLog, AuditOutcome, AuditRecord, MemoryAuditLog, MemoryQuotaStore,
    ModelQuotaStatus, QuotaLedger, QuotaLimits, QuotaStore, QuotaTier, RedisQuotaStore,
};
