//! In-process stand-in for a connected MCP server, for exercising fleet
//! dispatch and eviction (C2) without a real subprocess. Mirrors the shape
//! of the teacher's `MockToolSource`: a plain public type, not gated behind
//! `#[cfg(test)]`, so external integration tests can build fleets with it.

use std::sync::atomic::{AtomicBool, Ordering};

use super::client::ToolServer;
use super::{Citations, ToolSpec};
use crate::error::ClientError;
use crate::message::ToolResult;

/// A fake fleet member that answers every tool call with a canned
/// [`ToolResult`] built from `name`/`content`, until [`FakeToolServer::sever`]
/// is called — after which every operation reports
/// [`ClientError::NotConnected`], matching a real Client whose subprocess
/// died mid-session.
pub struct FakeToolServer {
    tools: Vec<ToolSpec>,
    citations: Citations,
    response: String,
    connected: AtomicBool,
}

impl FakeToolServer {
    /// A server exposing a single tool named `tool_name`; every call to it
    /// returns `response` verbatim.
    pub fn single_tool(tool_name: &str, response: &str) -> Self {
        Self {
            tools: vec![ToolSpec {
                name: tool_name.to_string(),
                description: None,
                input_schema: serde_json::json!({"type": "object"}),
            }],
            citations: Citations::default(),
            response: response.to_string(),
            connected: AtomicBool::new(true),
        }
    }

    /// Forces this server into the disconnected state, as if its subprocess
    /// had exited. Every subsequent `execute_tool` call returns
    /// `ClientError::NotConnected`.
    pub fn sever(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ToolServer for FakeToolServer {
    async fn execute_tool(
        &self,
        call_id: &str,
        name: &str,
        _arguments: serde_json::Value,
    ) -> Result<ToolResult, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        if !self.tools.iter().any(|t| t.name == name) {
            return Err(ClientError::ToolNotFound(name.to_string()));
        }
        Ok(ToolResult {
            tool_call_id: call_id.to_string(),
            name: name.to_string(),
            content: self.response.clone(),
        })
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        Ok(self.tools.clone())
    }

    async fn get_citations(&self) -> Result<Citations, ClientError> {
        Ok(self.citations.clone())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
