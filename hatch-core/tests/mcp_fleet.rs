//! Integration tests for MCP fleet dispatch and eviction (C2), against
//! [`hatch_core::mcp::FakeToolServer`] instead of a real subprocess.

mod init_logging;

use std::path::PathBuf;
use std::sync::Arc;

use hatch_core::mcp::{FakeToolServer, McpManager, ToolSpec};

fn tool_spec(name: &str) -> ToolSpec {
    ToolSpec { name: name.to_string(), description: None, input_schema: serde_json::json!({"type": "object"}) }
}

/// **Scenario**: two Clients expose `add` and `multiply`. A turn that calls
/// both routes each to its owning Client, and the Manager's "used" set at
/// end-of-turn is exactly both server paths.
#[tokio::test]
async fn fleet_tool_dispatch_routes_to_owning_server_and_tracks_both_as_used() {
    let manager = McpManager::new();
    let add_path = PathBuf::from("/srv/add.py");
    let multiply_path = PathBuf::from("/srv/multiply.py");

    manager.insert_test_server(add_path.clone(), &[tool_spec("add")], Arc::new(FakeToolServer::single_tool("add", "3")));
    manager.insert_test_server(
        multiply_path.clone(),
        &[tool_spec("multiply")],
        Arc::new(FakeToolServer::single_tool("multiply", "12")),
    );

    let add = manager.execute_tool("call-1", "add", serde_json::json!({"a": 1, "b": 2})).await.unwrap();
    let multiply = manager.execute_tool("call-2", "multiply", serde_json::json!({"a": 3, "b": 4})).await.unwrap();
    assert_eq!(add.content, "3");
    assert_eq!(multiply.content, "12");

    let mut used = manager.used_servers();
    used.sort();
    let mut expected = vec![add_path, multiply_path];
    expected.sort();
    assert_eq!(used, expected, "both servers used this turn, and only those two");

    manager.reset_used_servers();
    assert!(manager.used_servers().is_empty());
}

/// **Scenario**: forcing a Client into disconnected (e.g. its subprocess
/// died) before a tool call makes the Manager evict it and surface a
/// `ClientError::NotConnected`-shaped failure; the next tools listing only
/// contains the surviving Clients' tools.
#[tokio::test]
async fn disconnected_client_is_evicted_and_surviving_fleet_keeps_working() {
    let manager = McpManager::new();
    let flaky_path = PathBuf::from("/srv/flaky.py");
    let steady_path = PathBuf::from("/srv/steady.py");

    let flaky = Arc::new(FakeToolServer::single_tool("ping", "pong"));
    manager.insert_test_server(flaky_path, &[tool_spec("ping")], flaky.clone());
    manager.insert_test_server(steady_path.clone(), &[tool_spec("echo")], Arc::new(FakeToolServer::single_tool("echo", "hi")));

    flaky.sever();

    let err = manager.execute_tool("call-1", "ping", serde_json::json!({})).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("not connected"), "error message was: {message}");

    // Evicted: the dead server's tool and path are both gone, the steady one survives.
    assert_eq!(manager.connected_servers(), vec![steady_path]);
    assert_eq!(manager.known_tool_names(), vec!["echo".to_string()]);

    let echo = manager.execute_tool("call-2", "echo", serde_json::json!({})).await.unwrap();
    assert_eq!(echo.content, "hi");
}

/// **Scenario**: the chain controller (C5) degrades a dispatch failure to an
/// error-shaped `ToolResult` rather than raising, so the LLM sees
/// `{"error": "...not connected..."}` as an ordinary tool result.
#[tokio::test]
async fn tool_exec_manager_surfaces_not_connected_as_synthetic_tool_result() {
    use hatch_core::{Settings, ToolCall, ToolDispatcher, ToolExecManager};

    let manager = Arc::new(McpManager::new());
    let path = PathBuf::from("/srv/flaky.py");
    let flaky = Arc::new(FakeToolServer::single_tool("ping", "pong"));
    manager.insert_test_server(path, &[tool_spec("ping")], flaky.clone());
    flaky.sever();

    let settings = Arc::new(Settings::from_env());
    let exec = ToolExecManager::new(manager, settings);
    exec.reset_for_new_query("is the server up?");

    let call = ToolCall { id: "call-1".into(), function_name: "ping".into(), arguments: serde_json::json!({}) };
    let result = exec.dispatch(&call).await;

    let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
    let error_text = parsed["error"].as_str().expect("error-shaped content");
    assert!(error_text.contains("not connected"), "error text was: {error_text}");
}
