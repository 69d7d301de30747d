//! MCP Manager (C2): owns the fleet of connected MCP Clients and routes tool
//! calls to whichever one exposes the named tool.
//!
//! An ordinary struct, not a singleton — callers hold it behind
//! an `Arc` if they need to share it across tasks. Two `DashMap`s back the
//! fleet: one keyed by server path for lifecycle operations, one keyed by
//! tool name for O(1) dispatch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use super::client::{McpClient, ToolServer};
use super::{Citations, ToolSpec};
use crate::error::{ClientError, ManagerError};
use crate::message::ToolResult;

/// Fleet of MCP Clients, one per connected server path. Stored behind
/// `Arc<dyn ToolServer>` rather than the concrete `McpClientHandle` so tests
/// can populate the fleet with [`super::fake::FakeToolServer`] and exercise
/// dispatch/eviction without a real subprocess.
pub struct McpManager {
    clients: DashMap<PathBuf, Arc<dyn ToolServer>>,
    tool_owners: DashMap<String, PathBuf>,
    /// Server paths used to satisfy a tool call in the current user turn,
    /// consulted by C6 for end-of-turn citations then reset.
    used: Mutex<HashSet<PathBuf>>,
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl McpManager {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            tool_owners: DashMap::new(),
            used: Mutex::new(HashSet::new()),
        }
    }

    /// Connects to `server_path`, registering every tool it exposes. A tool
    /// name already owned by another connected server is a [`ManagerError::DuplicateTool`];
    /// the new connection is disconnected before returning the error so the
    /// fleet never tracks a client without also tracking its tools.
    pub async fn connect(&self, server_path: &Path) -> Result<(), ManagerError> {
        if !server_path.is_file() {
            return Err(ManagerError::InvalidServerPath(server_path.display().to_string()));
        }

        let handle = McpClient::spawn(server_path.to_path_buf());
        handle.connect().await?;

        let tools = handle.list_tools().await?;
        for tool in &tools {
            if let Some(existing) = self.tool_owners.get(&tool.name) {
                if existing.value() != server_path {
                    handle.disconnect().await;
                    return Err(ManagerError::DuplicateTool(tool.name.clone()));
                }
            }
        }

        for tool in &tools {
            self.tool_owners.insert(tool.name.clone(), server_path.to_path_buf());
        }
        self.clients.insert(server_path.to_path_buf(), Arc::new(handle));
        Ok(())
    }

    /// Registers an already-"connected" fleet member directly, skipping the
    /// file-existence check and real subprocess spawn `connect` performs.
    /// Used by tests to build a fleet around [`super::fake::FakeToolServer`].
    pub fn insert_test_server(&self, server_path: PathBuf, tools: &[ToolSpec], server: Arc<dyn ToolServer>) {
        for tool in tools {
            self.tool_owners.insert(tool.name.clone(), server_path.clone());
        }
        self.clients.insert(server_path, server);
    }

    /// Connects every path in `server_paths` independently; one failure does
    /// not prevent the others from connecting. Returns the paths that failed
    /// along with why, so the caller can decide whether a partial fleet is
    /// acceptable.
    pub async fn connect_fleet(&self, server_paths: &[PathBuf]) -> Vec<(PathBuf, ManagerError)> {
        let mut failures = Vec::new();
        for path in server_paths {
            if let Err(e) = self.connect(path).await {
                failures.push((path.clone(), e));
            }
        }
        failures
    }

    /// Disconnects and forgets one server, freeing its tool names.
    pub async fn disconnect(&self, server_path: &Path) {
        if let Some((_, handle)) = self.clients.remove(server_path) {
            handle.disconnect().await;
        }
        self.tool_owners.retain(|_, owner| owner != server_path);
    }

    /// Disconnects every connected server. Each disconnect is independent and
    /// infallible; a failure in one does not stop the rest.
    pub async fn disconnect_all(&self) {
        let paths: Vec<PathBuf> = self.clients.iter().map(|e| e.key().clone()).collect();
        for path in paths {
            self.disconnect(&path).await;
        }
        self.reset_used_servers();
    }

    /// Routes one tool call to the server that owns `name`, recording the
    /// owning path as used in the current turn. If the Client raises
    /// `NotConnected`, evicts it from both maps and re-raises so upstream
    /// can reason about fleet shrinkage.
    pub async fn execute_tool(
        &self,
        call_id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ManagerError> {
        let owner = self
            .tool_owners
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| ManagerError::ToolNotFound(name.to_string()))?;
        let handle = self
            .clients
            .get(&owner)
            .map(|e| e.value().clone())
            .ok_or_else(|| ManagerError::ToolNotFound(name.to_string()))?;

        self.used.lock().unwrap().insert(owner.clone());

        match handle.execute_tool(call_id, name, arguments).await {
            Ok(result) => Ok(result),
            Err(ClientError::NotConnected) => {
                self.clients.remove(&owner);
                self.tool_owners.retain(|_, path| path != &owner);
                Err(ManagerError::Client(ClientError::NotConnected))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Server paths used to satisfy a tool call since the last reset
    ///.
    pub fn used_servers(&self) -> Vec<PathBuf> {
        self.used.lock().unwrap().iter().cloned().collect()
    }

    /// Clears the "used in this turn" set.
    pub fn reset_used_servers(&self) {
        self.used.lock().unwrap().clear();
    }

    /// All tool descriptors across the whole fleet, for building LLM-facing
    /// schemas.
    pub async fn all_tools(&self) -> Vec<ToolSpec> {
        let handles: Vec<Arc<dyn ToolServer>> = self.clients.iter().map(|e| e.value().clone()).collect();
        let mut tools = Vec::new();
        for handle in handles {
            if let Ok(server_tools) = handle.list_tools().await {
                tools.extend(server_tools);
            }
        }
        tools
    }

    /// Citations for the server that owns `tool_name`, used when composing
    /// the final-answer prompt.
    pub async fn citations_for_tool(&self, tool_name: &str) -> Option<Citations> {
        let owner = self.tool_owners.get(tool_name).map(|e| e.value().clone())?;
        self.citations_for_server(&owner).await
    }

    /// Citations for one server path, looked up directly.
    pub async fn citations_for_server(&self, server_path: &Path) -> Option<Citations> {
        let handle = self.clients.get(server_path).map(|e| e.value().clone())?;
        handle.get_citations().await.ok()
    }

    /// Server paths currently tracked, connected or not yet confirmed.
    pub fn connected_servers(&self) -> Vec<PathBuf> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Names of every tool currently routable, across the whole fleet.
    pub fn known_tool_names(&self) -> Vec<String> {
        self.tool_owners.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_nonexistent_server_path() {
        let manager = McpManager::new();
        let err = manager.connect(Path::new("/no/such/server.py")).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidServerPath(_)));
    }

    #[tokio::test]
    async fn execute_tool_reports_not_found_for_unknown_tool() {
        let manager = McpManager::new();
        let err = manager
            .execute_tool("call-1", "nonexistent", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::ToolNotFound(name) if name == "nonexistent"));
    }

    #[tokio::test]
    async fn disconnect_all_on_empty_fleet_is_a_no_op() {
        let manager = McpManager::new();
        manager.disconnect_all().await;
        assert!(manager.connected_servers().is_empty());
    }

    #[tokio::test]
    async fn used_servers_is_empty_until_a_tool_call_is_routed() {
        let manager = McpManager::new();
        assert!(manager.used_servers().is_empty());
    }

    #[tokio::test]
    async fn reset_used_servers_clears_the_set() {
        let manager = McpManager::new();
        manager.used.lock().unwrap().insert(PathBuf::from("/srv/a.py"));
        manager.reset_used_servers();
        assert!(manager.used_servers().is_empty());
    }

    #[tokio::test]
    async fn fleet_dispatch_routes_each_tool_to_its_owning_server_and_records_both_as_used() {
        use super::super::fake::FakeToolServer;

        let manager = McpManager::new();
        let add_path = PathBuf::from("/srv/add.py");
        let mul_path = PathBuf::from("/srv/multiply.py");
        manager.insert_test_server(
            add_path.clone(),
            &[ToolSpec { name: "add".into(), description: None, input_schema: serde_json::json!({}) }],
            Arc::new(FakeToolServer::single_tool("add", "3")),
        );
        manager.insert_test_server(
            mul_path.clone(),
            &[ToolSpec { name: "multiply".into(), description: None, input_schema: serde_json::json!({}) }],
            Arc::new(FakeToolServer::single_tool("multiply", "12")),
        );

        let add_result = manager.execute_tool("1", "add", serde_json::json!({"a": 1, "b": 2})).await.unwrap();
        let mul_result = manager.execute_tool("2", "multiply", serde_json::json!({"a": 3, "b": 4})).await.unwrap();
        assert_eq!(add_result.content, "3");
        assert_eq!(mul_result.content, "12");

        let mut used = manager.used_servers();
        used.sort();
        let mut expected = vec![add_path, mul_path];
        expected.sort();
        assert_eq!(used, expected);
    }

    #[tokio::test]
    async fn disconnected_server_is_evicted_and_reported_as_not_connected() {
        use super::super::fake::FakeToolServer;

        let manager = McpManager::new();
        let path = PathBuf::from("/srv/flaky.py");
        let server = Arc::new(FakeToolServer::single_tool("ping", "pong"));
        manager.insert_test_server(
            path,
            &[ToolSpec { name: "ping".into(), description: None, input_schema: serde_json::json!({}) }],
            server.clone(),
        );
        server.sever();

        let err = manager.execute_tool("1", "ping", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ManagerError::Client(ClientError::NotConnected)));
        assert!(manager.connected_servers().is_empty());
        assert!(manager.known_tool_names().is_empty());
    }
}
