//! Conversation message types shared by the Chat Session, API Manager, and
//! Tool Execution Manager.

use serde::{Deserialize, Serialize};

/// One tool invocation requested by the LLM. `id` is opaque and chosen by the
/// LLM; the Manager treats it purely as a correlation key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    pub arguments: serde_json::Value,
}

/// Result of one tool execution. A failed call yields `content` shaped as
/// `{"error": <text>}` rather than propagating an exception.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
}

impl ToolResult {
    /// Builds an error-shaped result, the form the chain controller hands back
    /// to the LLM on dispatch failure.
    pub fn error(tool_call_id: impl Into<String>, name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: serde_json::json!({ "error": message.to_string() }).to_string(),
        }
    }
}

/// A message in the conversation history. No implicit deduplication; history
/// is an ordered append-only sequence.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(result: &ToolResult) -> Self {
        Message::Tool {
            tool_call_id: result.tool_call_id.clone(),
            name: result.name.clone(),
            content: result.content.clone(),
        }
    }
}

/// Why the chain controller stopped without the LLM volunteering a
/// text-only answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitReason {
    MaximumIterations,
    TimeLimit,
}

impl LimitReason {
    /// Text embedded in the partial-answer prompt; scenario 4 in
    /// asserts the literal substring "maximum iterations" appears here.
    pub fn as_prompt_str(&self) -> &'static str {
        match self {
            LimitReason::MaximumIterations => "maximum iterations",
            LimitReason::TimeLimit => "time limit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_error_wraps_message_as_json_error_object() {
        let result = ToolResult::error("call-1", "add", "boom");
        let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed["error"], "boom");
    }

    #[test]
    fn limit_reason_prompt_str_matches_spec_scenario_substrings() {
        assert_eq!(LimitReason::MaximumIterations.as_prompt_str(), "maximum iterations");
        assert_eq!(LimitReason::TimeLimit.as_prompt_str(), "time limit");
    }

    #[test]
    fn message_round_trips_through_json() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "1".into(),
                function_name: "add".into(),
                arguments: serde_json::json!({"a": 1, "b": 2}),
            }],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
