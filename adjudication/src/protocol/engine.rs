//! The debate turn loop.
//!
//! Runs rounds of alternating turns, feeds each debater the filtered
//! history, decodes the strict JSON contract (one upstream retry),
//! applies the refusal-shortening rule, and hands the finished
//! transcript to the judge. Progress events flow through the sink as
//! each step completes; a failure at any point carries the partial
//! transcript out with it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::prompts::{debater_system_prompt, debater_user_prompt};
use super::types::{DebateRecord, DebateRequest, Side, Transcript, Turn};
use crate::decode::generate_object;
use crate::error::DebateError;
use crate::events::{ProgressEvent, ProgressSink};
use crate::judge;
use crate::providers::{ClientSet, ModelKey};

const MAX_TURN_TOKENS: u32 = 2000;

/// A failed debate, with whatever transcript accumulated first.
#[derive(Debug)]
pub struct DebateFailure {
    pub error: DebateError,
    pub transcript: Transcript,
}

pub struct DebateEngine {
    clients: Arc<ClientSet>,
    sink: Arc<dyn ProgressSink>,
}

impl DebateEngine {
    pub fn new(clients: Arc<ClientSet>, sink: Arc<dyn ProgressSink>) -> Self {
        Self { clients, sink }
    }

    /// Run one debate to completion.
    pub async fn run(&self, request: &DebateRequest) -> Result<DebateRecord, DebateFailure> {
        let mut transcript = Transcript::new();
        if let Err(error) = request.validate() {
            return Err(self.fail(error, transcript));
        }

        let session_id = Uuid::new_v4().to_string();
        let total = request.total_steps();
        info!(%session_id, rounds = request.rounds, "debate started");

        self.sink.emit(ProgressEvent::Init {
            session_id: session_id.clone(),
            claim: request.claim.clone(),
        });
        self.sink.emit(ProgressEvent::TotalSteps { total });

        let mut completed = 0u32;
        let mut shortened = false;
        let order = [request.first_speaker, request.first_speaker.opponent()];

        'rounds: for round in 1..=request.rounds {
            for side in order {
                let turn = match self.take_turn(request, side, &transcript).await {
                    Ok(turn) => turn,
                    Err(error) => return Err(self.fail(error, transcript)),
                };
                if turn.refused {
                    warn!(round, side = %side, "debater refused, debate will be shortened");
                    shortened = true;
                }
                transcript.push(turn.clone());
                completed += 1;
                self.sink.emit(ProgressEvent::Turn {
                    turn,
                    completed,
                    total,
                });
            }
            // The refusing side's opponent still argued this round;
            // further rounds would debate an empty chair.
            if shortened {
                info!(round, "debate shortened after refusal");
                break 'rounds;
            }
        }

        self.sink.emit(ProgressEvent::JudgePending { completed, total });

        let judge_client = match self.clients.client(request.judge_model) {
            Ok(client) => client,
            Err(error) => return Err(self.fail(error.into(), transcript)),
        };
        let verdict = match judge::adjudicate(judge_client.as_ref(), &request.claim, &transcript)
            .await
        {
            Ok(verdict) => verdict,
            Err(error) => return Err(self.fail(error, transcript)),
        };

        self.sink.emit(ProgressEvent::Verdict {
            verdict: verdict.clone(),
        });

        let record = DebateRecord {
            session_id,
            claim: request.claim.clone(),
            transcript,
            verdict,
            shortened,
        };
        self.sink.emit(ProgressEvent::Complete {
            result: record.clone(),
        });
        Ok(record)
    }

    async fn take_turn(
        &self,
        request: &DebateRequest,
        side: Side,
        transcript: &Transcript,
    ) -> Result<Turn, DebateError> {
        let model = request.model_for(side);
        let client = self.clients.client(model)?;
        let value = generate_object(
            client.as_ref(),
            &debater_system_prompt(side, &request.claim),
            &debater_user_prompt(transcript),
            MAX_TURN_TOKENS,
        )
        .await?;
        turn_from_value(&value, side, model)
    }

    fn fail(&self, error: DebateError, transcript: Transcript) -> DebateFailure {
        warn!(kind = error.kind(), %error, "debate failed");
        self.sink.emit(ProgressEvent::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
            status: error.http_status(),
            transcript: transcript.turns().to_vec(),
        });
        DebateFailure { error, transcript }
    }
}

/// Interpret one decoded debater object as a turn.
///
/// A `refused: true` object becomes a refusal turn; otherwise all four
/// evidence fields must be present non-empty strings.
pub(crate) fn turn_from_value(
    value: &Value,
    side: Side,
    model: ModelKey,
) -> Result<Turn, DebateError> {
    if value.get("refused").and_then(Value::as_bool) == Some(true) {
        let reason = value
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("no reason given")
            .to_string();
        return Ok(Turn::refusal(side, model, reason));
    }

    let field = |name: &str| -> Result<String, DebateError> {
        value
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                DebateError::Parse(format!("debater output missing '{name}' field"))
            })
    };
    Ok(Turn::argued(
        side,
        model,
        field("url")?,
        field("quote")?,
        field("context")?,
        field("argument")?,
    ))
}
