//! API Manager (C4): builds LLM request payloads and streams responses,
//! dispatching completed tool calls through a [`ToolDispatcher`] as they are
//! assembled.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Value};

use super::decoder::{OllamaDecoder, OpenAiDecoder, StreamDecoder};
use crate::error::LlmError;
use crate::mcp::schema_adapter::{build_openai_schema, normalize_tool_call_delta};
use crate::message::{Message, ToolCall, ToolResult};
use crate::settings::{LlmProvider, Settings};

/// Anything that can turn a completed [`ToolCall`] into a [`ToolResult`].
/// Implemented by the Tool Execution Manager (C5); kept as a trait here so
/// C4 does not depend on C5's concrete type.
#[async_trait::async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, call: &ToolCall) -> ToolResult;
}

/// Everything one streamed turn produced.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    pub full_response: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
}

pub struct ApiManager {
    settings: Arc<Settings>,
    http: reqwest::Client,
}

impl ApiManager {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings, http: reqwest::Client::new() }
    }

    fn model_name(&self) -> &str {
        match self.settings.llm_provider {
            LlmProvider::Ollama => &self.settings.ollama_model,
            LlmProvider::OpenAi => &self.settings.openai_model,
        }
    }

    /// Builds `{model, messages, stream:true}`.
    pub fn prepare_payload(&self, messages: &[Message]) -> Value {
        json!({
            "model": self.model_name(),
            "messages": messages,
            "stream": true,
        })
    }

    /// Attaches tool schemas in the shape the configured provider expects.
    /// `tools` are already in Ollama `{type, function}` form; for
    /// OpenAI this unwraps to the inner `function` object per tool.
    pub fn add_tools(&self, payload: &mut Value, tools: &[Value]) {
        if tools.is_empty() {
            return;
        }
        let Some(map) = payload.as_object_mut() else { return };
        match self.settings.llm_provider {
            LlmProvider::OpenAi => {
                let functions: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        if t.get("type").and_then(Value::as_str) == Some("function") {
                            t.get("function").cloned().unwrap_or_else(|| t.clone())
                        } else {
                            t.clone()
                        }
                    })
                    .collect();
                map.insert("functions".into(), Value::Array(functions));
                map.insert("function_call".into(), Value::String("auto".into()));
            }
            LlmProvider::Ollama => {
                map.insert("tools".into(), Value::Array(tools.to_vec()));
                map.insert("tool_choice".into(), Value::String("auto".into()));
            }
        }
    }

    /// Streams one response using the configured provider, dispatching each
    /// completed tool call through `dispatcher` as it is assembled.
    pub async fn stream_response(
        &self,
        payload: Value,
        dispatcher: &dyn ToolDispatcher,
    ) -> Result<StreamOutcome, LlmError> {
        match self.settings.llm_provider {
            LlmProvider::Ollama => {
                let url = format!("{}/chat", self.settings.ollama_api_url);
                self.stream_with(url, payload, None, OllamaDecoder::default(), LineFraming::Newline, dispatcher)
                    .await
            }
            LlmProvider::OpenAi => {
                let url = format!("{}/chat/completions", self.settings.openai_api_url);
                let auth = self.settings.openai_api_key.clone().unwrap_or_default();
                self.stream_with(url, payload, Some(auth), OpenAiDecoder::default(), LineFraming::ServerSentEvents, dispatcher)
                    .await
            }
        }
    }

    async fn stream_with<D: StreamDecoder>(
        &self,
        url: String,
        payload: Value,
        bearer: Option<String>,
        mut decoder: D,
        framing: LineFraming,
        dispatcher: &dyn ToolDispatcher,
    ) -> Result<StreamOutcome, LlmError> {
        let mut request = self.http.post(&url).json(&payload);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| LlmError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport { status: status.as_u16(), body });
        }

        let mut outcome = StreamOutcome::default();
        let mut buffer = String::new();
        let mut byte_stream = response.bytes_stream();

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "llm stream transport error mid-stream");
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                if line.is_empty() {
                    continue;
                }

                let payload_text = match framing {
                    LineFraming::Newline => Some(line.as_str()),
                    LineFraming::ServerSentEvents => {
                        let stripped = line.strip_prefix("data:").map(str::trim).unwrap_or(&line);
                        if stripped == "[DONE]" {
                            decoder.mark_done();
                            None
                        } else {
                            Some(stripped)
                        }
                    }
                };

                let Some(text) = payload_text else {
                    let completed = decoder.take_tool_call_delta(&Value::Null);
                    dispatch_completed(&completed, dispatcher, &mut outcome).await;
                    break 'outer;
                };
                if text.is_empty() {
                    continue;
                }

                let frame: Value = match serde_json::from_str(text) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, raw = %text, "skipping malformed llm stream frame");
                        continue;
                    }
                };

                if let Some(content) = decoder.take_content_delta(&frame) {
                    outcome.full_response.push_str(&content);
                }
                let completed = decoder.take_tool_call_delta(&frame);
                dispatch_completed(&completed, dispatcher, &mut outcome).await;

                if decoder.is_done() {
                    break 'outer;
                }
            }
        }

        Ok(outcome)
    }
}

#[derive(Clone, Copy)]
enum LineFraming {
    Newline,
    ServerSentEvents,
}

async fn dispatch_completed(
    deltas: &[crate::mcp::schema_adapter::ToolCallDelta],
    dispatcher: &dyn ToolDispatcher,
    outcome: &mut StreamOutcome,
) {
    for delta in deltas {
        let id = delta.id.clone().unwrap_or_default();
        let name = delta.function_name.clone().unwrap_or_default();
        let args = delta.arguments_fragment.clone().unwrap_or_default();
        let call = normalize_tool_call_delta(&id, &name, &args);
        let result = dispatcher.dispatch(&call).await;
        outcome.tool_calls.push(call);
        outcome.tool_results.push(result);
    }
}

/// Convenience used by the Chat Session when building the *next* iteration's
/// payload: the tool schema list must stay attached across chain-controller
/// iterations.
pub fn schema_for_tools(tools: &[crate::mcp::ToolSpec], provider: LlmProvider) -> Vec<Value> {
    match provider {
        LlmProvider::Ollama => crate::mcp::build_ollama_schema(tools),
        LlmProvider::OpenAi => build_openai_schema(tools),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopDispatcher;

    #[async_trait::async_trait]
    impl ToolDispatcher for NoopDispatcher {
        async fn dispatch(&self, call: &ToolCall) -> ToolResult {
            ToolResult { tool_call_id: call.id.clone(), name: call.function_name.clone(), content: "{}".into() }
        }
    }

    fn manager(provider: LlmProvider) -> ApiManager {
        let mut settings = Settings::from_env();
        settings.llm_provider = provider;
        ApiManager::new(Arc::new(settings))
    }

    #[test]
    fn prepare_payload_always_sets_stream_true() {
        let manager = manager(LlmProvider::Ollama);
        let payload = manager.prepare_payload(&[Message::user("hi")]);
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["model"], manager.model_name());
    }

    #[test]
    fn add_tools_is_noop_for_empty_list() {
        let manager = manager(LlmProvider::Ollama);
        let mut payload = manager.prepare_payload(&[]);
        manager.add_tools(&mut payload, &[]);
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn add_tools_unwraps_function_for_openai() {
        let manager = manager(LlmProvider::OpenAi);
        let mut payload = manager.prepare_payload(&[]);
        let ollama_shaped = json!({"type": "function", "function": {"name": "add"}});
        manager.add_tools(&mut payload, &[ollama_shaped]);
        assert_eq!(payload["functions"][0]["name"], "add");
        assert_eq!(payload["function_call"], "auto");
    }

    #[test]
    fn add_tools_keeps_type_function_wrapper_for_ollama() {
        let manager = manager(LlmProvider::Ollama);
        let mut payload = manager.prepare_payload(&[]);
        let tool = json!({"type": "function", "function": {"name": "add"}});
        manager.add_tools(&mut payload, &[tool]);
        assert_eq!(payload["tools"][0]["type"], "function");
        assert_eq!(payload["tool_choice"], "auto");
    }
}
