//! Lenient JSON object decoding for model output.
//!
//! Models are told to emit a bare JSON object but routinely wrap it in
//! prose, code fences, or raw newlines inside string literals. The
//! pipeline tries three stages in order:
//!
//! 1. strict parse of the whole payload;
//! 2. parse of the largest `{...}` substring;
//! 3. both of the above again after escaping raw control characters
//!    found inside string literals.
//!
//! The decoder never talks to a model. The single upstream-call retry
//! belongs to the caller, which is why [`generate_object`] lives here
//! as a thin wrapper the engine and judge share.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DebateError;
use crate::providers::ModelClient;

/// Result of running the pipeline over one payload.
#[derive(Debug)]
pub enum DecodeOutcome {
    Parsed(Value),
    Failed { reason: String },
}

impl DecodeOutcome {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Run the three-stage pipeline, accepting only a top-level object.
pub fn decode_json_object(raw: &str) -> DecodeOutcome {
    if let Some(value) = parse_object(raw) {
        return DecodeOutcome::Parsed(value);
    }

    if let Some(slice) = braced_slice(raw) {
        if let Some(value) = parse_object(slice) {
            return DecodeOutcome::Parsed(value);
        }
    }

    let escaped = escape_control_chars(raw);
    if let Some(value) = parse_object(&escaped) {
        return DecodeOutcome::Parsed(value);
    }
    if let Some(slice) = braced_slice(&escaped) {
        if let Some(value) = parse_object(slice) {
            return DecodeOutcome::Parsed(value);
        }
    }

    DecodeOutcome::Failed {
        reason: format!(
            "no JSON object found in {} bytes of model output",
            raw.len()
        ),
    }
}

fn parse_object(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

/// Largest substring from the first `{` to the last `}`.
fn braced_slice(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Escape raw control characters that appear inside string literals.
///
/// Tracks string/escape state so braces and quotes outside literals
/// are untouched.
fn escape_control_chars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(ch);
                continue;
            }
            match ch {
                '\\' => {
                    escaped = true;
                    out.push(ch);
                }
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => out.push(c),
            }
        } else {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
        }
    }
    out
}

/// Call a model and decode its output, retrying the upstream call
/// exactly once if decoding fails. A second decode failure is a parse
/// error; a provider failure propagates as-is.
pub async fn generate_object(
    client: &dyn ModelClient,
    system_prompt: &str,
    user_prompt: &str,
    max_tokens: u32,
) -> Result<Value, DebateError> {
    let raw = client
        .generate(system_prompt, user_prompt, max_tokens)
        .await?;
    match decode_json_object(&raw) {
        DecodeOutcome::Parsed(value) => Ok(value),
        DecodeOutcome::Failed { reason } => {
            warn!(model = client.model_id(), %reason, "undecodable output, retrying call once");
            let raw = client
                .generate(system_prompt, user_prompt, max_tokens)
                .await?;
            match decode_json_object(&raw) {
                DecodeOutcome::Parsed(value) => {
                    debug!(model = client.model_id(), "retry produced decodable output");
                    Ok(value)
                }
                DecodeOutcome::Failed { reason } => Err(DebateError::Parse(reason)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(raw: &str) -> Value {
        match decode_json_object(raw) {
            DecodeOutcome::Parsed(v) => v,
            DecodeOutcome::Failed { reason } => panic!("decode failed: {reason}"),
        }
    }

    #[test]
    fn strict_object_parses() {
        assert_eq!(parsed(r#"{"a": 1}"#), json!({"a": 1}));
    }

    #[test]
    fn top_level_array_is_rejected() {
        assert!(!decode_json_object(r#"[1, 2]"#).is_parsed());
    }

    #[test]
    fn prose_wrapped_object_parses() {
        let raw = "Here is my argument:\n```json\n{\"argument\": \"x\"}\n```\nDone.";
        assert_eq!(parsed(raw), json!({"argument": "x"}));
    }

    #[test]
    fn raw_newline_inside_string_parses() {
        let raw = "{\"quote\": \"line one\nline two\"}";
        assert_eq!(parsed(raw), json!({"quote": "line one\nline two"}));
    }

    #[test]
    fn escaped_quote_inside_string_survives() {
        let raw = "{\"quote\": \"he said \\\"hi\\\"\nbye\"}";
        assert_eq!(parsed(raw), json!({"quote": "he said \"hi\"\nbye"}));
    }

    #[test]
    fn prose_plus_control_chars_parses() {
        let raw = "Sure!\n{\"context\": \"a\tb\"} hope that helps";
        assert_eq!(parsed(raw), json!({"context": "a\tb"}));
    }

    #[test]
    fn garbage_fails_with_reason() {
        match decode_json_object("no json here at all") {
            DecodeOutcome::Failed { reason } => assert!(reason.contains("no JSON object")),
            DecodeOutcome::Parsed(v) => panic!("unexpected parse: {v}"),
        }
    }

    #[test]
    fn unbalanced_braces_fail() {
        assert!(!decode_json_object("{\"a\": ").is_parsed());
    }
}
