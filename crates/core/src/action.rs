//! The action protocol — parsing model output into a next step.
//!
//! The model is instructed to answer with a single JSON blob, optionally
//! fenced in a markdown code block:
//!
//! ```json
//! {"action": "@pdfsearch", "action_input": "when was sensor xyz built?"}
//! ```
//!
//! or, to finish the turn:
//!
//! ```json
//! {"action": "Final Answer", "action_input": "Sensor xyz was built in 2002 [\"doc1\"]."}
//! ```
//!
//! Anything that cannot be read as one of those two shapes is a parse
//! failure carrying the raw text, which the orchestrator recovers from
//! instead of surfacing.

use serde::Deserialize;

use crate::error::AgentError;

/// A parsed next step from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    /// Invoke the named tool with the given input.
    UseTool {
        token: String,
        input: serde_json::Value,
    },
    /// The turn is done; this is the visible answer.
    Final { answer: String },
}

impl AgentAction {
    /// The tool input rendered as text (strings verbatim, structures as JSON).
    pub fn input_text(input: &serde_json::Value) -> String {
        match input {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ActionBlob {
    action: String,
    #[serde(default)]
    action_input: serde_json::Value,
}

/// Parse raw model output into an [`AgentAction`].
///
/// Accepts the blob bare, fenced in ``` / ```json, or embedded in
/// surrounding prose (first `{` to last `}`). `"Final Answer"` is matched
/// case-insensitively.
pub fn parse_action(raw: &str) -> Result<AgentAction, AgentError> {
    let candidate = extract_json_candidate(raw).ok_or_else(|| AgentError::ActionParse {
        raw: raw.to_string(),
    })?;

    let blob: ActionBlob =
        serde_json::from_str(&candidate).map_err(|_| AgentError::ActionParse {
            raw: raw.to_string(),
        })?;

    if blob.action.trim().eq_ignore_ascii_case("final answer") {
        let answer = match blob.action_input {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        Ok(AgentAction::Final { answer })
    } else {
        Ok(AgentAction::UseTool {
            token: blob.action.trim().to_string(),
            input: blob.action_input,
        })
    }
}

/// Pull the most plausible JSON object text out of the raw output.
fn extract_json_candidate(raw: &str) -> Option<String> {
    let trimmed = raw.trim();

    // Whole output is the blob.
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }

    // Fenced code block, with or without a language tag.
    if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(fence_end) = body.find("```") {
            let inner = body[..fence_end].trim();
            if inner.starts_with('{') {
                return Some(inner.to_string());
            }
        }
    }

    // Blob embedded in prose.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        Some(trimmed[start..=end].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_tool_action() {
        let action =
            parse_action(r#"{"action": "@pdfsearch", "action_input": "sensor xyz"}"#).unwrap();
        assert_eq!(
            action,
            AgentAction::UseTool {
                token: "@pdfsearch".into(),
                input: serde_json::json!("sensor xyz"),
            }
        );
    }

    #[test]
    fn parses_fenced_blob() {
        let raw = "Here is my action:\n```json\n{\"action\": \"Final Answer\", \"action_input\": \"done\"}\n```";
        let action = parse_action(raw).unwrap();
        assert_eq!(action, AgentAction::Final { answer: "done".into() });
    }

    #[test]
    fn parses_fence_without_language_tag() {
        let raw = "```\n{\"action\": \"Final Answer\", \"action_input\": \"ok\"}\n```";
        let action = parse_action(raw).unwrap();
        assert_eq!(action, AgentAction::Final { answer: "ok".into() });
    }

    #[test]
    fn final_answer_is_case_insensitive() {
        let action =
            parse_action(r#"{"action": "final answer", "action_input": "x"}"#).unwrap();
        assert!(matches!(action, AgentAction::Final { .. }));
    }

    #[test]
    fn structured_action_input_is_preserved() {
        let raw = r#"{"action": "run_query", "action_input": {"op": "aggregate", "column": "price"}}"#;
        match parse_action(raw).unwrap() {
            AgentAction::UseTool { token, input } => {
                assert_eq!(token, "run_query");
                assert_eq!(input["op"], "aggregate");
            }
            other => panic!("expected UseTool, got {other:?}"),
        }
    }

    #[test]
    fn blob_embedded_in_prose() {
        let raw = r#"Thought: I should finish now. {"action": "Final Answer", "action_input": "42"}"#;
        let action = parse_action(raw).unwrap();
        assert_eq!(action, AgentAction::Final { answer: "42".into() });
    }

    #[test]
    fn malformed_output_carries_raw_text() {
        let err = parse_action("I could not decide what to do").unwrap_err();
        match err {
            AgentError::ActionParse { raw } => {
                assert!(raw.contains("could not decide"));
            }
            other => panic!("expected ActionParse, got {other:?}"),
        }
    }

    #[test]
    fn invalid_json_is_a_parse_failure() {
        assert!(parse_action("{action: nope}").is_err());
    }

    #[test]
    fn input_text_renders_strings_verbatim() {
        assert_eq!(
            AgentAction::input_text(&serde_json::json!("plain")),
            "plain"
        );
        assert_eq!(
            AgentAction::input_text(&serde_json::json!({"k": 1})),
            r#"{"k":1}"#
        );
    }
}
