//! MCP client and fleet manager (spec components C1–C3).
//!
//! [`client`] implements one connection to one tool server behind a
//! single-owner connection-manager task; [`manager`] owns the fleet and
//! routes tool calls by name; [`schema_adapter`] translates MCP tool
//! descriptors into the two supported LLM provider schema shapes;
//! [`fake`] provides an in-process [`client::ToolServer`] for exercising
//! fleet dispatch and eviction without a real subprocess.

mod session;

pub mod client;
pub mod fake;
pub mod manager;
pub mod schema_adapter;

pub use client::{McpClient, McpClientHandle, ToolServer};
pub use fake::FakeToolServer;
pub use manager::McpManager;
pub use schema_adapter::{
    build_ollama_schema, build_openai_schema, build_tool_response, normalize_tool_call_delta,
    ToolCallDelta,
};

use serde::{Deserialize, Serialize};

/// Tool descriptor as exposed by one MCP server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Citation strings cached at connect time for one server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Citations {
    pub module_name: String,
    pub origin: String,
    pub mcp: String,
}

/// MCP Client connection state machine:
/// `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}
