//! Chat Session (C6): composes the API Manager, Tool Execution Manager, and
//! MCP Manager into one `send_message` entry point.

use std::sync::Arc;

use crate::llm::ApiManager;
use crate::mcp::McpManager;
use crate::message::{LimitReason, Message, ToolCall, ToolResult};
use crate::settings::{LlmProvider, Settings};
use crate::tool_exec::{ChainOutcome, ToolExecManager};

pub struct ChatSession {
    settings: Arc<Settings>,
    mcp_manager: Arc<McpManager>,
    api_manager: ApiManager,
    tool_executor: ToolExecManager,
    history: Vec<Message>,
    tools_enabled: bool,
}

impl ChatSession {
    pub fn new(settings: Arc<Settings>, mcp_manager: Arc<McpManager>) -> Self {
        let api_manager = ApiManager::new(settings.clone());
        let tool_executor = ToolExecManager::new(mcp_manager.clone(), settings.clone());
        Self {
            settings,
            mcp_manager,
            api_manager,
            tool_executor,
            history: Vec::new(),
            tools_enabled: false,
        }
    }

    pub fn enable_tools(&mut self) {
        self.tools_enabled = true;
    }

    pub fn disable_tools(&mut self) {
        self.tools_enabled = false;
    }

    pub fn tools_enabled(&self) -> bool {
        self.tools_enabled
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Sends `user_message`, streams the initial response, runs the chain
    /// controller if tools were used, and returns the final assistant text
    ///.
    pub async fn send_message(&mut self, user_message: &str) -> String {
        self.history.push(Message::user(user_message));
        self.tool_executor.reset_for_new_query(user_message);

        let tool_schema = if self.tools_enabled {
            let tools = self.mcp_manager.all_tools().await;
            crate::llm::api_manager::schema_for_tools(&tools, self.settings.llm_provider)
        } else {
            Vec::new()
        };

        let mut payload = self.api_manager.prepare_payload(&self.history);
        self.api_manager.add_tools(&mut payload, &tool_schema);

        let initial = match self.api_manager.stream_response(payload, &self.tool_executor).await {
            Ok(outcome) => outcome,
            Err(e) => return format!("Error: {e}"),
        };

        self.history.push(Message::assistant_with_tool_calls(
            initial.full_response.clone(),
            initial.tool_calls.clone(),
        ));
        for result in &initial.tool_results {
            self.history.push(Message::tool(result));
        }

        if !self.tools_enabled || self.tool_executor.iteration() == 0 {
            return initial.full_response;
        }

        let chain_outcome = self
            .tool_executor
            .run_chain(
                &self.api_manager,
                &mut self.history,
                &tool_schema,
                ChainOutcome {
                    full_response: initial.full_response,
                    tool_calls: initial.tool_calls,
                    tool_results: initial.tool_results,
                    limit_reason: None,
                },
            )
            .await;

        if chain_outcome.limit_reason.is_some() {
            self.format_partial_answer(&chain_outcome).await
        } else {
            self.format_response_with_tool_results(&chain_outcome, true).await
        }
    }

    /// Builds the final-answer (or partial-answer) prompt from a fresh
    /// two-message history and streams it without tool schemas attached, so
    /// the formatting pass cannot itself trigger more tool calls.
    async fn format_response_with_tool_results(&self, outcome: &ChainOutcome, is_final: bool) -> String {
        let root_query = self.tool_executor.root_query();
        let mut prompt = format!("I used tools in reaction to: `{root_query}`.\n");
        prompt.push_str(&format!("Here are the tool calls: {}.\n", describe_tool_calls(&outcome.tool_calls)));
        prompt.push_str(&format!("Here are the tool results: {}.\n\n", describe_tool_results(&outcome.tool_results)));

        if !is_final {
            if let Some(reason) = outcome.limit_reason {
                prompt.push_str(&format!(
                    " However, I reached {} ({} iterations).\n",
                    reason.as_prompt_str(),
                    self.tool_executor.iteration(),
                ));
                prompt.push_str("Provide a partial answer to the original question based on these partial results and ask if the user wants to continue processing.");
            }
        } else {
            prompt.push_str("Provide a final answer to the original question based on these complete results.");
        }

        if is_final {
            let mut citation_blocks = Vec::new();
            for server_path in self.mcp_manager.used_servers() {
                if let Some(citations) = self.mcp_manager.citations_for_server(&server_path).await {
                    citation_blocks.push(format!(
                        "\n- {}\n  Origin: {}\n  Implementation: {}",
                        citations.module_name, citations.origin, citations.mcp
                    ));
                }
            }
            if !citation_blocks.is_empty() {
                prompt.push_str("\n\nPlease include the following citations for the tools used in your response. After your main answer, add a section titled 'Citations' with this information:");
                for block in citation_blocks {
                    prompt.push_str(&block);
                }
            }
            self.mcp_manager.reset_used_servers();
        }

        prompt.push_str("\n\nAdapt the level of complexity and information in your answer to the individual tool result. A simple tool result leads to a simple answer, while a complex tool result leads to more detail in the final answer.");

        let clean_history = vec![Message::user(root_query), Message::user(prompt)];
        let payload = self.api_manager.prepare_payload(&clean_history);

        match self.api_manager.stream_response(payload, &self.tool_executor).await {
            Ok(formatted) => formatted.full_response,
            Err(e) => format!("Error formatting response: {e}"),
        }
    }

    /// Formats a partial answer when the chain controller stopped on a
    /// budget rather than a clean text-only reply.
    pub async fn format_partial_answer(&self, outcome: &ChainOutcome) -> String {
        self.format_response_with_tool_results(outcome, false).await
    }
}

fn describe_tool_calls(calls: &[ToolCall]) -> String {
    calls
        .iter()
        .map(|c| format!("{}({})", c.function_name, c.arguments))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_tool_results(results: &[ToolResult]) -> String {
    results
        .iter()
        .map(|r| format!("{}: {}", r.name, r.content))
        .collect::<Vec<_>>()
        .join(", ")
}
