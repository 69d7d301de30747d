//! Stream decoding (C4): one `StreamDecoder` implementation per LLM provider
//! wire shape, so the API Manager's `stream_response` loop never branches on
//! provider at the frame level.

use std::collections::HashMap;

use serde_json::Value;

use crate::mcp::schema_adapter::ToolCallDelta;

/// Capability trait implemented once per provider wire shape. The API
/// Manager feeds every decoded frame to both `take_content_delta` and
/// `take_tool_call_delta`; `is_done` reflects whatever the most recent frame
/// (or sentinel, via `mark_done`) indicated.
pub trait StreamDecoder: Send {
    fn is_done(&self) -> bool;
    fn take_content_delta(&mut self, frame: &Value) -> Option<String>;
    fn take_tool_call_delta(&mut self, frame: &Value) -> Vec<ToolCallDelta>;
    /// Called when the transport signals termination out of band (e.g. the
    /// OpenAI `data: [DONE]` sentinel, which is not itself JSON).
    fn mark_done(&mut self);
}

/// Decodes Ollama-shaped newline-delimited JSON: `{message:{content,
/// tool_calls}, done}`. Tool calls arrive as complete records, so no
/// cross-frame accumulation is needed.
#[derive(Default)]
pub struct OllamaDecoder {
    done: bool,
}

impl StreamDecoder for OllamaDecoder {
    fn is_done(&self) -> bool {
        self.done
    }

    fn take_content_delta(&mut self, frame: &Value) -> Option<String> {
        if frame.get("done").and_then(Value::as_bool).unwrap_or(false) {
            self.done = true;
        }
        frame
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    fn take_tool_call_delta(&mut self, frame: &Value) -> Vec<ToolCallDelta> {
        let Some(calls) = frame.get("message").and_then(|m| m.get("tool_calls")).and_then(Value::as_array) else {
            return Vec::new();
        };
        calls
            .iter()
            .map(|call| ToolCallDelta {
                id: call.get("id").and_then(Value::as_str).map(String::from),
                function_name: call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .map(String::from),
                arguments_fragment: call
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }),
            })
            .collect()
    }

    fn mark_done(&mut self) {
        self.done = true;
    }
}

#[derive(Default)]
struct FunctionCallAccumulator {
    name: Option<String>,
    arguments: String,
}

/// Decodes OpenAI-shaped SSE deltas. Function-call arguments arrive as a
/// byte stream per `choices[0].delta.function_call.arguments` that must be
/// concatenated before it is valid JSON; completed calls are only emitted
/// once `mark_done` fires (the `[DONE]` sentinel in the original SSE stream).
#[derive(Default)]
pub struct OpenAiDecoder {
    done: bool,
    accumulators: HashMap<String, FunctionCallAccumulator>,
    next_anonymous_id: u32,
    current_id: Option<String>,
}

impl StreamDecoder for OpenAiDecoder {
    fn is_done(&self) -> bool {
        self.done
    }

    fn take_content_delta(&mut self, frame: &Value) -> Option<String> {
        let delta = frame.get("choices")?.as_array()?.first()?.get("delta")?;
        delta.get("content").and_then(Value::as_str).filter(|s| !s.is_empty()).map(String::from)
    }

    fn take_tool_call_delta(&mut self, frame: &Value) -> Vec<ToolCallDelta> {
        if let Some(delta) = frame.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first()).and_then(|c| c.get("delta")) {
            if let Some(fc) = delta.get("function_call") {
                let id = frame
                    .get("choices")
                    .and_then(|c| c.as_array())
                    .and_then(|a| a.first())
                    .and_then(|c| c.get("id"))
                    .and_then(Value::as_str)
                    .map(String::from)
                    .or_else(|| self.current_id.clone())
                    .unwrap_or_else(|| {
                        self.next_anonymous_id += 1;
                        format!("function_call_{}", self.next_anonymous_id)
                    });
                self.current_id = Some(id.clone());

                let entry = self.accumulators.entry(id).or_default();
                if let Some(name) = fc.get("name").and_then(Value::as_str) {
                    entry.name = Some(name.to_string());
                }
                if let Some(args) = fc.get("arguments").and_then(Value::as_str) {
                    entry.arguments.push_str(args);
                }
            }
        }

        if self.done {
            self.flush()
        } else {
            Vec::new()
        }
    }

    fn mark_done(&mut self) {
        self.done = true;
    }
}

impl OpenAiDecoder {
    fn flush(&mut self) -> Vec<ToolCallDelta> {
        self.accumulators
            .drain()
            .filter(|(_, acc)| acc.name.is_some())
            .map(|(id, acc)| ToolCallDelta {
                id: Some(id),
                function_name: acc.name,
                arguments_fragment: Some(acc.arguments),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ollama_decoder_marks_done_and_extracts_content() {
        let mut decoder = OllamaDecoder::default();
        let frame = json!({"message": {"content": "hi"}, "done": false});
        assert_eq!(decoder.take_content_delta(&frame), Some("hi".to_string()));
        assert!(!decoder.is_done());

        let final_frame = json!({"message": {"content": ""}, "done": true});
        decoder.take_content_delta(&final_frame);
        assert!(decoder.is_done());
    }

    #[test]
    fn ollama_decoder_extracts_complete_tool_call_records() {
        let mut decoder = OllamaDecoder::default();
        let frame = json!({
            "message": {
                "tool_calls": [
                    {"id": "1", "function": {"name": "add", "arguments": {"a": 1, "b": 2}}}
                ]
            }
        });
        let deltas = decoder.take_tool_call_delta(&frame);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].function_name.as_deref(), Some("add"));
    }

    #[test]
    fn openai_decoder_accumulates_arguments_across_frames_and_flushes_on_done() {
        let mut decoder = OpenAiDecoder::default();
        let frame1 = json!({"choices": [{"delta": {"function_call": {"name": "add", "arguments": "{\"a\":"}}}]});
        let frame2 = json!({"choices": [{"delta": {"function_call": {"arguments": "1}"}}}]});
        assert!(decoder.take_tool_call_delta(&frame1).is_empty());
        assert!(decoder.take_tool_call_delta(&frame2).is_empty());

        decoder.mark_done();
        let flushed = decoder.take_tool_call_delta(&json!({}));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].arguments_fragment.as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn openai_decoder_extracts_plain_content_deltas() {
        let mut decoder = OpenAiDecoder::default();
        let frame = json!({"choices": [{"delta": {"content": "hello"}}]});
        assert_eq!(decoder.take_content_delta(&frame), Some("hello".to_string()));
    }
}
