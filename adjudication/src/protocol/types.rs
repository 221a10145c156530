//! Core debate data model: sides, turns, transcripts, requests.

use serde::{Deserialize, Serialize};

use crate::error::DebateError;
use crate::judge::Verdict;
use crate::providers::ModelKey;

/// Maximum rounds a single debate may run.
pub const MAX_ROUNDS: u32 = 6;

/// Which side of the claim a debater argues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Pro,
    Con,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Self::Pro => Self::Con,
            Self::Con => Self::Pro,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Con => "con",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One completed turn. Exactly one of the two shapes is populated:
/// a refusal (with its reason) or the four evidence fields. The
/// constructors are the only way to build one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub position: Side,
    pub model: ModelKey,
    pub refused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
}

impl Turn {
    pub fn argued(
        position: Side,
        model: ModelKey,
        url: String,
        quote: String,
        context: String,
        argument: String,
    ) -> Self {
        Self {
            position,
            model,
            refused: false,
            refusal_reason: None,
            url: Some(url),
            quote: Some(quote),
            context: Some(context),
            argument: Some(argument),
        }
    }

    pub fn refusal(position: Side, model: ModelKey, reason: String) -> Self {
        Self {
            position,
            model,
            refused: true,
            refusal_reason: Some(reason),
            url: None,
            quote: None,
            context: None,
            argument: None,
        }
    }
}

/// Append-only record of the turns taken so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turns visible to a debater: refusals are hidden so neither
    /// side can react to the other having refused.
    pub fn argued_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| !t.refused)
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

/// A validated request to run one debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRequest {
    pub claim: String,
    /// Rounds of debate; each round is one turn per side. Clients may
    /// also spell this field `turns`.
    #[serde(alias = "turns")]
    pub rounds: u32,
    pub pro_model: ModelKey,
    pub con_model: ModelKey,
    pub judge_model: ModelKey,
    /// Who opens the debate. The other side closes each round.
    #[serde(default = "default_first_speaker")]
    pub first_speaker: Side,
}

fn default_first_speaker() -> Side {
    Side::Pro
}

impl DebateRequest {
    pub fn validate(&self) -> Result<(), DebateError> {
        if self.claim.trim().is_empty() {
            return Err(DebateError::Validation("claim must not be empty".into()));
        }
        if self.rounds == 0 || self.rounds > MAX_ROUNDS {
            return Err(DebateError::Validation(format!(
                "rounds must be between 1 and {MAX_ROUNDS}, got {}",
                self.rounds
            )));
        }
        Ok(())
    }

    pub fn model_for(&self, side: Side) -> ModelKey {
        match side {
            Side::Pro => self.pro_model,
            Side::Con => self.con_model,
        }
    }

    /// Progress steps a full debate takes: every turn plus the verdict.
    pub fn total_steps(&self) -> u32 {
        self.rounds * 2 + 1
    }
}

/// The complete result of a finished debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRecord {
    pub session_id: String,
    pub claim: String,
    pub transcript: Transcript,
    pub verdict: Verdict,
    /// True when a refusal cut the debate short.
    pub shortened: bool,
}
