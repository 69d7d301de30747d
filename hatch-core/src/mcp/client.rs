//! MCP Client (C1): one connection to one tool server, serialised onto a
//! single connection-manager task via an operation queue.
//!
//! The manager task is the sole owner of the [`McpSession`], its subprocess,
//! and the tool/citation maps. Every public operation on [`McpClientHandle`]
//! sends `(op, completion)` down a channel and awaits the reply; no other
//! code ever touches the session directly. This fixes the historical
//! reconnection bug class where a resource opened in one task was released
//! by another.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use super::session::McpSession;
use super::{Citations, ClientState, ToolSpec};
use crate::error::ClientError;
use crate::message::ToolResult;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

enum ClientOp {
    Connect { reply: oneshot::Sender<Result<(), ClientError>> },
    Disconnect { reply: oneshot::Sender<()> },
    ExecuteTool {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
        reply: oneshot::Sender<Result<ToolResult, ClientError>>,
    },
    ListTools { reply: oneshot::Sender<Vec<ToolSpec>> },
    GetCitations { reply: oneshot::Sender<Citations> },
    Ping { reply: oneshot::Sender<Result<(), ClientError>> },
}

/// What the MCP Manager (C2) needs from one fleet member: dispatch a tool
/// call, list tools, fetch citations, disconnect. Implemented by
/// [`McpClientHandle`] for real servers and by
/// [`super::fake::FakeToolServer`] for tests, so the Manager's routing and
/// eviction logic never depends on a live subprocess.
#[async_trait::async_trait]
pub trait ToolServer: Send + Sync {
    async fn execute_tool(
        &self,
        call_id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ClientError>;
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ClientError>;
    async fn get_citations(&self) -> Result<Citations, ClientError>;
    async fn disconnect(&self);
}

/// A cheaply-cloneable handle to one MCP Client's connection-manager task.
/// Dropping the last handle closes the operation queue, which causes the
/// manager task to clean up and exit.
#[derive(Clone)]
pub struct McpClientHandle {
    op_tx: mpsc::Sender<ClientOp>,
    pub server_path: PathBuf,
}

/// Owns the connection-manager task spawn for one server path.
pub struct McpClient;

impl McpClient {
    /// Spawns the connection-manager task for `server_path` and returns a
    /// handle to it. The task is not yet connected; call
    /// [`McpClientHandle::connect`] to start it.
    pub fn spawn(server_path: PathBuf) -> McpClientHandle {
        let (op_tx, op_rx) = mpsc::channel(32);
        let path_for_task = server_path.clone();
        tokio::task::spawn_blocking(move || manager_loop(op_rx, path_for_task));
        McpClientHandle { op_tx, server_path }
    }
}

impl McpClientHandle {
    /// Connects the server subprocess. Bounded by a 30 s overall timeout;
    /// on failure the manager task rolls back any partially-acquired state
    /// and remains `Disconnected`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientOp::Connect { reply }).await?;
        let result = tokio::time::timeout(CONNECT_TIMEOUT + Duration::from_secs(1), rx)
            .await
            .map_err(|_| ClientError::ConnectTimeout(CONNECT_TIMEOUT))?
            .map_err(|_| ClientError::ManagerGone)?;
        if result.is_ok() {
            let heartbeat_tx = self.op_tx.clone();
            tokio::spawn(heartbeat_loop(heartbeat_tx));
        }
        result
    }

    /// Idempotent disconnect: cancels heartbeat implicitly (the manager task
    /// stops honouring `Ping` once `Disconnected`), closes scoped resources
    /// in reverse order, and never throws.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(ClientOp::Disconnect { reply }).await.is_ok() {
            let _ = tokio::time::timeout(DISCONNECT_TIMEOUT + Duration::from_secs(1), rx).await;
        }
    }

    /// Dispatches one tool call. `call_id` is the LLM-chosen correlation id
    /// that ends up on the returned [`ToolResult`].
    pub async fn execute_tool(
        &self,
        call_id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientOp::ExecuteTool {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::ManagerGone)?
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientOp::ListTools { reply }).await?;
        rx.await.map_err(|_| ClientError::ManagerGone)
    }

    pub async fn get_citations(&self) -> Result<Citations, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientOp::GetCitations { reply }).await?;
        rx.await.map_err(|_| ClientError::ManagerGone)
    }

    async fn send(&self, op: ClientOp) -> Result<(), ClientError> {
        self.op_tx.send(op).await.map_err(|_| ClientError::ManagerGone)
    }
}

#[async_trait::async_trait]
impl ToolServer for McpClientHandle {
    async fn execute_tool(
        &self,
        call_id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ClientError> {
        McpClientHandle::execute_tool(self, call_id, name, arguments).await
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ClientError> {
        McpClientHandle::list_tools(self).await
    }

    async fn get_citations(&self) -> Result<Citations, ClientError> {
        McpClientHandle::get_citations(self).await
    }

    async fn disconnect(&self) {
        McpClientHandle::disconnect(self).await
    }
}

/// Background ticker: every 30 s, enqueues a `Ping` like any other caller.
/// Never touches the session itself — only the manager task does that —
/// so this upholds the single-owner invariant while still driving liveness.
async fn heartbeat_loop(op_tx: mpsc::Sender<ClientOp>) {
    loop {
        tokio::time::sleep(HEARTBEAT_PERIOD).await;
        let (reply, rx) = oneshot::channel();
        if op_tx.send(ClientOp::Ping { reply }).await.is_err() {
            return;
        }
        match rx.await {
            Ok(Ok(())) => continue,
            _ => return,
        }
    }
}

/// The connection-manager task body: the sole owner of `session`, `tools`,
/// and `citations` for this server's entire process lifetime.
fn manager_loop(mut op_rx: mpsc::Receiver<ClientOp>, server_path: PathBuf) {
    let mut state = ClientState::Disconnected;
    let mut session: Option<McpSession> = None;
    let mut tools: HashMap<String, ToolSpec> = HashMap::new();
    let mut citations = Citations::default();

    while let Some(op) = op_rx.blocking_recv() {
        match op {
            ClientOp::Connect { reply } => {
                if matches!(state, ClientState::Connected) {
                    let _ = reply.send(Ok(()));
                    continue;
                }
                state = ClientState::Connecting;
                let started = Instant::now();
                match connect_and_introspect(&server_path, started) {
                    Ok((sess, discovered_tools, discovered_citations)) => {
                        session = Some(sess);
                        tools = discovered_tools;
                        citations = discovered_citations;
                        state = ClientState::Connected;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        session = None;
                        tools.clear();
                        citations = Citations::default();
                        state = ClientState::Disconnected;
                        let _ = reply.send(Err(e));
                    }
                }
            }
            ClientOp::Disconnect { reply } => {
                state = ClientState::Disconnecting;
                session = None; // dropping McpSession closes transport + subprocess
                tools.clear();
                citations = Citations::default();
                state = ClientState::Disconnected;
                let _ = reply.send(());
            }
            ClientOp::ExecuteTool { call_id, name, arguments, reply } => {
                let result = execute_tool_inner(&mut session, &mut state, &tools, &name, arguments)
                    .map(|content| ToolResult { tool_call_id: call_id, name, content });
                let _ = reply.send(result);
            }
            ClientOp::ListTools { reply } => {
                let _ = reply.send(tools.values().cloned().collect());
            }
            ClientOp::GetCitations { reply } => {
                let _ = reply.send(citations.clone());
            }
            ClientOp::Ping { reply } => {
                let result = ping_inner(&mut session, &mut state);
                let _ = reply.send(result);
            }
        }
    }
    // Channel closed: all handles dropped. `session` drops here, closing
    // transport and subprocess from the same task that opened them.
}

fn connect_and_introspect(
    server_path: &std::path::Path,
    started: Instant,
) -> Result<(McpSession, HashMap<String, ToolSpec>, Citations), ClientError> {
    let mut session = McpSession::connect(server_path)
        .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;

    if started.elapsed() > CONNECT_TIMEOUT {
        return Err(ClientError::ConnectTimeout(started.elapsed()));
    }

    let remaining = CONNECT_TIMEOUT.saturating_sub(started.elapsed());
    let result = session
        .call("hatch-tools-list", "tools/list", serde_json::json!({}), remaining)
        .map_err(|e| ClientError::Transport(e.to_string()))?
        .ok_or_else(|| ClientError::ConnectTimeout(started.elapsed()))?;
    let tools = parse_tools_list(result)?;

    let citations = read_citations(&mut session, server_path, started)?;

    Ok((session, tools, citations))
}

fn parse_tools_list(result: mcp_core::ResultMessage) -> Result<HashMap<String, ToolSpec>, ClientError> {
    if let Some(err) = result.error {
        return Err(ClientError::ConnectFailed(err.message));
    }
    let tools_value = result
        .result
        .and_then(|r| r.get("tools").cloned())
        .ok_or_else(|| ClientError::ConnectFailed("no tools in tools/list response".into()))?;
    let array = tools_value
        .as_array()
        .ok_or_else(|| ClientError::ConnectFailed("tools not an array".into()))?;

    let mut map = HashMap::with_capacity(array.len());
    for item in array {
        let name = item.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let description = item.get("description").and_then(|v| v.as_str()).map(String::from);
        let input_schema = item
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        map.insert(
            name.clone(),
            ToolSpec { name, description, input_schema },
        );
    }
    Ok(map)
}

fn read_citations(
    session: &mut McpSession,
    server_path: &std::path::Path,
    started: Instant,
) -> Result<Citations, ClientError> {
    let module = server_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let module_name = read_resource_text(session, &format!("name://{module}"), started)
        .unwrap_or_default();
    let origin = read_resource_text(session, &format!("citation://origin/{module_name}"), started)
        .unwrap_or_default();
    let mcp = read_resource_text(session, &format!("citation://mcp/{module_name}"), started)
        .unwrap_or_default();

    Ok(Citations { module_name, origin, mcp })
}

fn read_resource_text(session: &mut McpSession, uri: &str, started: Instant) -> Result<String, ClientError> {
    let remaining = CONNECT_TIMEOUT.saturating_sub(started.elapsed());
    let result = session
        .call(
            "hatch-resources-read",
            "resources/read",
            serde_json::json!({ "uri": uri }),
            remaining,
        )
        .map_err(|e| ClientError::Transport(e.to_string()))?
        .ok_or_else(|| ClientError::ConnectTimeout(started.elapsed()))?;
    if let Some(err) = result.error {
        return Err(ClientError::ConnectFailed(err.message));
    }
    let text = result
        .result
        .and_then(|r| r.get("contents").and_then(|c| c.as_array()).cloned())
        .and_then(|arr| arr.first().cloned())
        .and_then(|first| first.get("text").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_default();
    Ok(text)
}

fn execute_tool_inner(
    session: &mut Option<McpSession>,
    state: &mut ClientState,
    tools: &HashMap<String, ToolSpec>,
    name: &str,
    arguments: serde_json::Value,
) -> Result<String, ClientError> {
    if !matches!(state, ClientState::Connected) {
        return Err(ClientError::NotConnected);
    }
    if !tools.contains_key(name) {
        return Err(ClientError::ToolNotFound(name.to_string()));
    }
    let session = session.as_mut().ok_or(ClientError::NotConnected)?;

    let result = session
        .call(
            "hatch-tools-call",
            "tools/call",
            serde_json::json!({ "name": name, "arguments": arguments }),
            TOOL_CALL_TIMEOUT,
        )
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let Some(result) = result else {
        *state = ClientState::Disconnected;
        *session = None;
        return Err(ClientError::ToolTimeout(name.to_string()));
    };

    parse_tool_call_result(result)
}

fn parse_tool_call_result(result: mcp_core::ResultMessage) -> Result<String, ClientError> {
    if let Some(err) = result.error {
        return Err(ClientError::Transport(err.message));
    }
    let result_value = result
        .result
        .ok_or_else(|| ClientError::Transport("no result in tools/call response".into()))?;

    if result_value.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
        let msg = result_value
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|b| b.get("text").and_then(|t| t.as_str()))
            .unwrap_or("tool returned error")
            .to_string();
        return Err(ClientError::Transport(msg));
    }

    let mut parts = Vec::new();
    if let Some(content) = result_value.get("content").and_then(|c| c.as_array()) {
        for block in content {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    parts.push(t.to_string());
                }
            }
        }
    }
    let mut text = parts.join("\n");
    if text.is_empty() {
        if let Some(structured) = result_value.get("structuredContent") {
            text = serde_json::to_string(structured).unwrap_or_default();
        }
    }
    Ok(text)
}

fn ping_inner(session: &mut Option<McpSession>, state: &mut ClientState) -> Result<(), ClientError> {
    if !matches!(state, ClientState::Connected) {
        return Err(ClientError::NotConnected);
    }
    let Some(sess) = session.as_mut() else {
        *state = ClientState::Disconnected;
        return Err(ClientError::NotConnected);
    };
    match sess.call("hatch-ping", "ping", serde_json::json!({}), Duration::from_secs(5)) {
        Ok(Some(result)) if result.error.is_none() => Ok(()),
        _ => {
            *state = ClientState::Disconnected;
            *session = None;
            Err(ClientError::Transport("heartbeat ping failed".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tool_call_result_joins_text_blocks() {
        let result = mcp_core::ResultMessage::success(
            "1",
            serde_json::json!({
                "content": [
                    {"type": "text", "text": "line one"},
                    {"type": "text", "text": "line two"}
                ]
            }),
        );
        let text = parse_tool_call_result(result).unwrap();
        assert_eq!(text, "line one\nline two");
    }

    #[test]
    fn parse_tool_call_result_surfaces_is_error() {
        let result = mcp_core::ResultMessage::success(
            "1",
            serde_json::json!({
                "isError": true,
                "content": [{"type": "text", "text": "bad args"}]
            }),
        );
        let err = parse_tool_call_result(result).unwrap_err();
        assert!(matches!(err, ClientError::Transport(msg) if msg == "bad args"));
    }

    #[test]
    fn parse_tools_list_maps_name_description_schema() {
        let result = mcp_core::ResultMessage::success(
            "1",
            serde_json::json!({
                "tools": [
                    {"name": "add", "description": "adds two numbers", "inputSchema": {"type": "object"}}
                ]
            }),
        );
        let tools = parse_tools_list(result).unwrap();
        assert_eq!(tools["add"].description.as_deref(), Some("adds two numbers"));
    }

    #[test]
    fn execute_tool_inner_rejects_when_not_connected() {
        let mut session = None;
        let mut state = ClientState::Disconnected;
        let tools = HashMap::new();
        let err = execute_tool_inner(&mut session, &mut state, &tools, "add", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[test]
    fn execute_tool_inner_rejects_unknown_tool_when_connected_but_no_session() {
        // Exercises the ToolNotFound branch without needing a live subprocess.
        let mut session = None;
        let mut state = ClientState::Connected;
        let tools = HashMap::new();
        let err = execute_tool_inner(&mut session, &mut state, &tools, "missing", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ClientError::ToolNotFound(name) if name == "missing"));
    }
}
