//! Verdict adjudication.
//!
//! The judge sees the full transcript, refusals included, and returns
//! one of four labels with an explanation. Decoding uses the same
//! pipeline and single-retry policy as debater turns; a label outside
//! the enum after the final decode is a parse failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::decode::generate_object;
use crate::error::DebateError;
use crate::protocol::types::Transcript;
use crate::providers::ModelClient;

const MAX_VERDICT_TOKENS: u32 = 1000;

/// The judge's finding on the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictLabel {
    Supported,
    Contradicted,
    Misleading,
    /// Accepts the older spaced spelling on decode; always emitted
    /// with the underscore form.
    #[serde(alias = "needs more evidence")]
    NeedsMoreEvidence,
}

impl VerdictLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supported => "supported",
            Self::Contradicted => "contradicted",
            Self::Misleading => "misleading",
            Self::NeedsMoreEvidence => "needs_more_evidence",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "supported" => Some(Self::Supported),
            "contradicted" => Some(Self::Contradicted),
            "misleading" => Some(Self::Misleading),
            "needs_more_evidence" | "needs more evidence" => Some(Self::NeedsMoreEvidence),
            _ => None,
        }
    }
}

impl std::fmt::Display for VerdictLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub label: VerdictLabel,
    pub explanation: String,
}

fn judge_system_prompt(claim: &str) -> String {
    format!(
        r#"You are a neutral judge evaluating a structured debate about a claim. Two debaters argued opposite sides; weigh the evidence each presented, not the rhetoric. A debater refusing to argue tells you nothing about whether the claim is true.

The claim: "{claim}"

Respond with a single JSON object and nothing else:

{{"verdict": "one of: supported, contradicted, misleading, needs_more_evidence", "explanation": "your reasoning, citing the evidence presented"}}"#
    )
}

fn judge_user_prompt(transcript: &Transcript) -> String {
    let mut prompt = String::from("The full debate transcript:\n\n");
    for turn in transcript.turns() {
        if turn.refused {
            prompt.push_str(&format!(
                "[{} side ({})] REFUSED to argue: {}\n\n",
                turn.position,
                turn.model.display_name(),
                turn.refusal_reason.as_deref().unwrap_or("no reason given"),
            ));
        } else {
            prompt.push_str(&format!(
                "[{} side ({})]\nSource: {}\nQuote: \"{}\"\nContext: {}\nArgument: {}\n\n",
                turn.position,
                turn.model.display_name(),
                turn.url.as_deref().unwrap_or(""),
                turn.quote.as_deref().unwrap_or(""),
                turn.context.as_deref().unwrap_or(""),
                turn.argument.as_deref().unwrap_or(""),
            ));
        }
    }
    prompt.push_str("Deliver your verdict.");
    prompt
}

/// Interpret a decoded judge object. Exposed for the engine's tests.
pub(crate) fn verdict_from_value(value: &Value) -> Result<Verdict, DebateError> {
    let raw_label = value
        .get("verdict")
        .and_then(Value::as_str)
        .ok_or_else(|| DebateError::Parse("judge output missing 'verdict' field".into()))?;
    let label = VerdictLabel::parse(raw_label).ok_or_else(|| {
        DebateError::Parse(format!("judge returned unknown verdict '{raw_label}'"))
    })?;
    let explanation = value
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    Ok(Verdict { label, explanation })
}

/// Run the judge over a finished transcript.
pub async fn adjudicate(
    client: &dyn ModelClient,
    claim: &str,
    transcript: &Transcript,
) -> Result<Verdict, DebateError> {
    let value = generate_object(
        client,
        &judge_system_prompt(claim),
        &judge_user_prompt(transcript),
        MAX_VERDICT_TOKENS,
    )
    .await?;
    let verdict = verdict_from_value(&value)?;
    info!(label = %verdict.label, "verdict reached");
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{Side, Turn};
    use crate::providers::ModelKey;
    use serde_json::json;

    #[test]
    fn label_parsing_accepts_legacy_spelling() {
        assert_eq!(
            VerdictLabel::parse("needs more evidence"),
            Some(VerdictLabel::NeedsMoreEvidence)
        );
        assert_eq!(
            VerdictLabel::parse("needs_more_evidence"),
            Some(VerdictLabel::NeedsMoreEvidence)
        );
        assert_eq!(VerdictLabel::parse("Supported"), Some(VerdictLabel::Supported));
        assert_eq!(VerdictLabel::parse("undecided"), None);
    }

    #[test]
    fn label_serializes_with_underscores() {
        let json = serde_json::to_string(&VerdictLabel::NeedsMoreEvidence).unwrap();
        assert_eq!(json, "\"needs_more_evidence\"");
    }

    #[test]
    fn verdict_from_value_requires_known_label() {
        let ok = verdict_from_value(&json!({"verdict": "misleading", "explanation": "x"}));
        assert_eq!(ok.unwrap().label, VerdictLabel::Misleading);

        let bad = verdict_from_value(&json!({"verdict": "maybe", "explanation": "x"}));
        assert!(matches!(bad, Err(DebateError::Parse(_))));

        let missing = verdict_from_value(&json!({"explanation": "x"}));
        assert!(matches!(missing, Err(DebateError::Parse(_))));
    }

    #[test]
    fn judge_prompt_shows_refusals_plainly() {
        let mut transcript = Transcript::new();
        transcript.push(Turn::argued(
            Side::Pro,
            ModelKey::Claude,
            "https://example.com".into(),
            "q".into(),
            "c".into(),
            "a".into(),
        ));
        transcript.push(Turn::refusal(Side::Con, ModelKey::Gpt4, "declined".into()));

        let prompt = judge_user_prompt(&transcript);
        assert!(prompt.contains("REFUSED"));
        assert!(prompt.contains("declined"));
    }
}
