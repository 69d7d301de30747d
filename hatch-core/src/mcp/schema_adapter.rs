//! Tool-Schema Adapter (C3): translates MCP tool descriptors into the two
//! supported LLM provider schema shapes, and normalises streamed tool-call
//! deltas into the canonical [`ToolCall`] form.

use serde_json::{json, Value};

use super::ToolSpec;
use crate::message::ToolCall;

/// Builds the Ollama-style tool schema: `{type:"function", function:{...}}`
/// entries, one per MCP tool descriptor.
pub fn build_ollama_schema(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description.clone().unwrap_or_default(),
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

/// Builds the OpenAI-style `functions[]` schema: the inner `function` object
/// emitted directly, one per MCP tool descriptor.
pub fn build_openai_schema(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description.clone().unwrap_or_default(),
                "parameters": tool.input_schema,
            })
        })
        .collect()
}

/// One raw tool-call fragment observed mid-stream, before accumulation by a
/// provider-specific [`crate::llm::decoder::StreamDecoder`] has finished
/// assembling its arguments.
#[derive(Clone, Debug, Default)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub function_name: Option<String>,
    pub arguments_fragment: Option<String>,
}

/// Normalises one fully-assembled tool-call record (already reassembled by
/// the decoder from either a complete Ollama record or concatenated OpenAI
/// argument chunks) into the canonical `{id, function_name, arguments}`
/// shape. Invalid argument JSON degrades silently to an empty object rather
/// than failing the whole turn.
pub fn normalize_tool_call_delta(id: &str, function_name: &str, raw_arguments: &str) -> ToolCall {
    let arguments = serde_json::from_str(raw_arguments).unwrap_or_else(|_| json!({}));
    ToolCall {
        id: id.to_string(),
        function_name: function_name.to_string(),
        arguments,
    }
}

/// Builds the `{role:"tool", name, content}` response object sent back to
/// the LLM for one completed tool call.
pub fn build_tool_response(name: &str, content: &str) -> Value {
    json!({
        "role": "tool",
        "name": name,
        "content": content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool() -> ToolSpec {
        ToolSpec {
            name: "add".to_string(),
            description: Some("adds two numbers".to_string()),
            input_schema: json!({"type": "object", "properties": {"a": {"type": "number"}}}),
        }
    }

    #[test]
    fn ollama_schema_wraps_function_in_type_function() {
        let schema = build_ollama_schema(&[sample_tool()]);
        assert_eq!(schema[0]["type"], "function");
        assert_eq!(schema[0]["function"]["name"], "add");
    }

    #[test]
    fn openai_schema_emits_inner_function_object_directly() {
        let schema = build_openai_schema(&[sample_tool()]);
        assert_eq!(schema[0]["name"], "add");
        assert!(schema[0].get("function").is_none());
    }

    #[test]
    fn normalize_tool_call_delta_degrades_invalid_json_to_empty_object() {
        let call = normalize_tool_call_delta("1", "add", "not json");
        assert_eq!(call.arguments, json!({}));
    }

    #[test]
    fn normalize_tool_call_delta_parses_valid_arguments() {
        let call = normalize_tool_call_delta("1", "add", r#"{"a": 1, "b": 2}"#);
        assert_eq!(call.arguments, json!({"a": 1, "b": 2}));
    }
}
