//! Tool Execution Manager (C5): dispatches individual tool calls through the
//! MCP Manager and runs the explicit-loop chain controller that keeps
//! streaming while the LLM keeps asking for tools.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::llm::{ApiManager, ToolDispatcher};
use crate::mcp::McpManager;
use crate::message::{LimitReason, Message, ToolCall, ToolResult};
use crate::settings::Settings;

/// Per-query tool-calling state. Not recursion-tracking: `iteration` counts
/// distinct `execute_tool` dispatches within one user turn, independent of
/// how many chain-controller rounds it took.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub iteration: u32,
    pub started_at: Instant,
    pub root_query: String,
    pub limit_reason: Option<LimitReason>,
}

impl ChainState {
    fn new(root_query: impl Into<String>) -> Self {
        Self {
            iteration: 0,
            started_at: Instant::now(),
            root_query: root_query.into(),
            limit_reason: None,
        }
    }
}

/// What one full chain-controller run produced, accumulated across every
/// round of the loop.
#[derive(Debug, Default)]
pub struct ChainOutcome {
    pub full_response: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub limit_reason: Option<LimitReason>,
}

pub struct ToolExecManager {
    manager: Arc<McpManager>,
    settings: Arc<Settings>,
    state: Mutex<ChainState>,
}

impl ToolExecManager {
    pub fn new(manager: Arc<McpManager>, settings: Arc<Settings>) -> Self {
        Self {
            manager,
            settings,
            state: Mutex::new(ChainState::new("")),
        }
    }

    /// Zeroes the iteration counter, records the start timestamp, and
    /// remembers `query` for the partial-answer and chain-continuation
    /// prompts.
    pub fn reset_for_new_query(&self, query: impl Into<String>) {
        *self.state.lock().unwrap() = ChainState::new(query);
    }

    pub fn iteration(&self) -> u32 {
        self.state.lock().unwrap().iteration
    }

    pub fn elapsed(&self) -> Duration {
        self.state.lock().unwrap().started_at.elapsed()
    }

    pub fn root_query(&self) -> String {
        self.state.lock().unwrap().root_query.clone()
    }

    pub fn limit_reason(&self) -> Option<LimitReason> {
        self.state.lock().unwrap().limit_reason
    }

    fn budget_exceeded(&self) -> Option<LimitReason> {
        let state = self.state.lock().unwrap();
        if state.iteration >= self.settings.max_tool_call_iteration() {
            Some(LimitReason::MaximumIterations)
        } else if state.started_at.elapsed() >= Duration::from_secs(self.settings.max_working_time_secs()) {
            Some(LimitReason::TimeLimit)
        } else {
            None
        }
    }

    /// Dispatches one tool call through the MCP Manager. Increments the
    /// iteration counter *before* dispatch, matching the original's
    /// per-attempt accounting. Never raises past this boundary: dispatch
    /// failures degrade to an error-shaped [`ToolResult`].
    async fn execute_tool_call(&self, call: &ToolCall) -> ToolResult {
        self.state.lock().unwrap().iteration += 1;
        match self
            .manager
            .execute_tool(&call.id, &call.function_name, call.arguments.clone())
            .await
        {
            Ok(result) => result,
            Err(e) => ToolResult::error(&call.id, &call.function_name, e),
        }
    }

    /// Runs the chain controller starting from the result of the initial
    /// LLM stream. `tool_schema` must stay attached to every subsequent
    /// payload so the LLM can keep choosing tools.
    pub async fn run_chain(
        &self,
        api: &ApiManager,
        history: &mut Vec<Message>,
        tool_schema: &[Value],
        initial: ChainOutcome,
    ) -> ChainOutcome {
        let mut full_response = initial.full_response;
        let mut tool_calls = initial.tool_calls;
        let mut tool_results = initial.tool_results;

        loop {
            if tool_results.is_empty() {
                return ChainOutcome { full_response, tool_calls, tool_results, limit_reason: None };
            }

            if let Some(reason) = self.budget_exceeded() {
                self.state.lock().unwrap().limit_reason = Some(reason);
                tracing::warn!(
                    iteration = self.iteration(),
                    elapsed_secs = self.elapsed().as_secs_f64(),
                    ?reason,
                    "tool calling chain hit a budget"
                );
                return ChainOutcome { full_response, tool_calls, tool_results, limit_reason: Some(reason) };
            }

            let prompt = format!(
                "Given the tool results: {}, do you have enough information to answer the original query: `{}`? If not, please ask for more information or continue using tools.",
                summarize_tool_results(&tool_results),
                self.root_query(),
            );
            history.push(Message::user(prompt));

            let mut payload = api.prepare_payload(history);
            api.add_tools(&mut payload, tool_schema);

            let round = match api.stream_response(payload, self).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(error = %e, "tool calling chain round failed, stopping with accumulated response");
                    return ChainOutcome { full_response, tool_calls, tool_results, limit_reason: None };
                }
            };

            if !full_response.is_empty() && !round.full_response.is_empty() {
                full_response.push_str("\n\n");
            }
            full_response.push_str(&round.full_response);

            history.push(Message::assistant_with_tool_calls(round.full_response.clone(), round.tool_calls.clone()));
            for result in &round.tool_results {
                history.push(Message::tool(result));
            }

            tool_calls.extend(round.tool_calls);
            tool_results = round.tool_results;
            // Loop re-checks the empty/budget conditions above with the new
            // tool_results; an empty result set ends the chain on the next pass.
        }
    }
}

fn summarize_tool_results(results: &[ToolResult]) -> String {
    results
        .iter()
        .map(|r| format!("{}: {}", r.name, r.content))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait::async_trait]
impl ToolDispatcher for ToolExecManager {
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        self.execute_tool_call(call).await
    }
}
