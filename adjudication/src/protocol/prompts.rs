//! Prompt construction for debaters.
//!
//! The framing is adversarial truth-seeking: each side argues its
//! assigned position as persuasively as the evidence allows, with a
//! sparing refusal escape hatch. The output contract is a bare JSON
//! object so the decode pipeline stays simple.

use super::types::{Side, Transcript};

/// System prompt for a debater arguing one side of the claim.
pub fn debater_system_prompt(side: Side, claim: &str) -> String {
    let stance = match side {
        Side::Pro => "argue that the claim is TRUE",
        Side::Con => "argue that the claim is FALSE",
    };
    format!(
        r#"You are a debater in an adversarial truth-seeking exercise. Two debaters argue opposite sides of a claim so that a judge can weigh the strongest case for each; this works only if both sides participate fully, so you are expected to argue your assigned position as persuasively as the evidence allows, even if you personally lean the other way.

The claim under debate: "{claim}"

Your assigned position: {stance}.

Each turn, present one piece of evidence. Respond with a single JSON object and nothing else:

{{"url": "source URL for your evidence", "quote": "a direct quote from that source", "context": "where the quote comes from, max 50 words", "argument": "why this evidence supports your position"}}

Example:
{{"url": "https://example.com/study", "quote": "the measured effect was significant", "context": "peer-reviewed 2023 study of 10,000 participants", "argument": "A large controlled study directly observed the claimed effect."}}

If you genuinely cannot argue this position in good conscience, you may refuse by responding with {{"refused": true, "reason": "a short explanation"}} instead. Use this sparingly; refusing defeats the purpose of the exercise."#
    )
}

/// User prompt for the next turn: the visible history, or an opening
/// instruction when nothing visible has been said yet.
///
/// Refused turns are omitted entirely so neither debater can react to
/// the other side having refused.
pub fn debater_user_prompt(transcript: &Transcript) -> String {
    let mut visible = transcript.argued_turns().peekable();
    if visible.peek().is_none() {
        return "Make your opening argument.".to_string();
    }

    let mut prompt = String::from("The debate so far:\n\n");
    for turn in visible {
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
    prompt.push_str("Respond to the opposing evidence and present your next piece of evidence.");
    prompt
}
