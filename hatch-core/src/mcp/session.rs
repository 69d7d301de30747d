//! Low-level MCP session: stdio transport with initialize handshake and
//! blocking request/response helpers.
//!
//! Wraps `StdioClientTransport` from `mcp_client`. Deliberately synchronous —
//! it is only ever driven from inside the connection-manager blocking task in
//! [`super::client`], which is the single owner of everything in here.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use mcp_client::stdio::{
    JsonRpcMessage, StdioClientTransport, StdioClientTransportError, StdioServerParameters,
    StdioStream,
};
use mcp_core::{MessageId, NotificationMessage, RequestMessage, ResultMessage};
use serde_json::{json, Value};

const PROTOCOL_VERSION: &str = "2025-11-25";
const INITIALIZE_REQUEST_ID: &str = "hatch-mcp-initialize";

/// A connected MCP session over stdio. Created and consumed entirely within
/// the connection-manager task for one server.
pub struct McpSession {
    transport: StdioClientTransport,
    receiver: mpsc::Receiver<JsonRpcMessage>,
}

impl McpSession {
    /// Spawns `python <server_path>` with inherited environment and a working
    /// directory equal to the script's containing directory, then
    /// performs the initialize handshake.
    pub fn connect(server_path: &std::path::Path) -> Result<Self, McpSessionError> {
        let (tx, rx) = mpsc::channel();

        let params = StdioServerParameters::new("python")
            .args(vec![server_path.display().to_string()])
            .stderr(StdioStream::Null);

        let mut transport = StdioClientTransport::new(params);
        transport.on_message(move |msg| {
            let _ = tx.send(msg);
        });
        transport.on_error(|e| {
            tracing::warn!(error = %e, "mcp transport error");
        });

        transport.start().map_err(McpSessionError::Transport)?;

        let mut session = Self {
            transport,
            receiver: rx,
        };
        session.initialize()?;
        Ok(session)
    }

    fn initialize(&mut self) -> Result<(), McpSessionError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {}, "resources": {} },
            "clientInfo": {
                "name": "hatch-mcp",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        self.send_request(INITIALIZE_REQUEST_ID, "initialize", params)?;

        match self.wait_for_result(INITIALIZE_REQUEST_ID, Duration::from_secs(20))? {
            Some(result) => {
                if let Some(err) = result.error {
                    return Err(McpSessionError::Initialize(err.message));
                }
                let notification = JsonRpcMessage::Notification(NotificationMessage::new(
                    "notifications/initialized",
                    Some(json!({})),
                ));
                self.transport
                    .send(&notification)
                    .map_err(McpSessionError::Transport)?;
                Ok(())
            }
            None => Err(McpSessionError::Initialize("timeout waiting for initialize".into())),
        }
    }

    pub fn send_request(&mut self, id: &str, method: &str, params: Value) -> Result<(), McpSessionError> {
        let request = RequestMessage::new(id, method, params);
        self.transport
            .send(&JsonRpcMessage::Request(request))
            .map_err(McpSessionError::Transport)
    }

    /// Waits for a JSON-RPC result matching `request_id`. Answers `roots/list`
    /// requests from the server with empty roots in the meantime.
    pub fn wait_for_result(
        &mut self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Option<ResultMessage>, McpSessionError> {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .min(Duration::from_secs(1));

            match self.receiver.recv_timeout(remaining) {
                Ok(JsonRpcMessage::Result(msg)) if message_id_matches(&msg.id, request_id) => {
                    return Ok(Some(msg));
                }
                Ok(JsonRpcMessage::Request(req)) if req.method == "roots/list" => {
                    let result = ResultMessage::success(req.id.clone(), json!({ "roots": [] }));
                    self.transport
                        .send(&JsonRpcMessage::Result(result))
                        .map_err(McpSessionError::Transport)?;
                }
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(None)
    }

    /// Issues a request and blocks for its result, within `timeout`.
    pub fn call(&mut self, id: &str, method: &str, params: Value, timeout: Duration) -> Result<Option<ResultMessage>, McpSessionError> {
        self.send_request(id, method, params)?;
        self.wait_for_result(id, timeout)
    }
}

fn message_id_matches(id: &MessageId, expected: &str) -> bool {
    id.as_str() == Some(expected)
}

#[derive(Debug, thiserror::Error)]
pub enum McpSessionError {
    #[error("transport: {0}")]
    Transport(#[from] StdioClientTransportError),
    #[error("initialize: {0}")]
    Initialize(String),
}
