//! Wire-level progress events emitted while a debate runs.
//!
//! Order is strict: `init`, `total_steps`, then `turn` events as they
//! complete, `judge_pending`, `verdict`, and finally `complete` with
//! the full result. A failure after the stream has started is encoded
//! as a terminal `error` event. Every event carries enough state that
//! a consumer can render progress without replaying earlier events.

use serde::{Deserialize, Serialize};

use crate::judge::Verdict;
use crate::protocol::types::{DebateRecord, Turn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Init {
        session_id: String,
        claim: String,
    },
    TotalSteps {
        total: u32,
    },
    Turn {
        turn: Turn,
        completed: u32,
        total: u32,
    },
    JudgePending {
        completed: u32,
        total: u32,
    },
    Verdict {
        verdict: Verdict,
    },
    Complete {
        result: DebateRecord,
    },
    Error {
        kind: String,
        message: String,
        status: u16,
        /// Turns completed before the failure.
        transcript: Vec<Turn>,
    },
}

impl ProgressEvent {
    /// Tag string, for logs and ordering assertions.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::TotalSteps { .. } => "total_steps",
            Self::Turn { .. } => "turn",
            Self::JudgePending { .. } => "judge_pending",
            Self::Verdict { .. } => "verdict",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
