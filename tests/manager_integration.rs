//! End-to-end manager tests against real server processes: the crate's own
//! built-in servers, plus shell scripts for misbehaving ones.

use std::sync::Arc;
use std::time::Duration;

use orionai_mcp::mcp_client::{
    ConfigStore, ConnectionState, ManagerSettings, McpError, McpManager, ServerConfig,
    ToolRegistry,
};
use serde_json::json;

const BIN: &str = env!("CARGO_BIN_EXE_orionai-mcp");

fn builtin(name: &str, server: &str) -> ServerConfig {
    ServerConfig::new(name, [BIN, "serve", server])
}

async fn manager_with(configs: Vec<ServerConfig>) -> McpManager {
    let manager = McpManager::new(ConfigStore::in_memory(), ManagerSettings::default());
    for config in configs {
        manager.add_server(config).await.unwrap();
    }
    manager
}

#[tokio::test]
async fn test_calculator_round_trip() {
    let manager = manager_with(vec![builtin("calculator", "calculator")]).await;
    manager.connect("calculator").await.unwrap();

    let result = manager
        .call_tool("calculate", json!({"expression": "2 + 2 * 3"}))
        .await
        .unwrap();
    assert_eq!(result.text().as_deref(), Some("8.0"));
    assert_eq!(result.server_name, "calculator");
    assert!(!result.is_error());

    let err = manager
        .call_tool("calculate", json!({"expression": "1 / 0"}))
        .await
        .unwrap_err();
    match err {
        McpError::ServerError { code, message, .. } => {
            assert_eq!(code, -32000);
            assert!(message.contains("division by zero"), "{message}");
        }
        other => panic!("expected ServerError, got {other}"),
    }

    // A server-side error leaves the connection usable
    assert!(manager.is_connected("calculator").await);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_calls_on_one_connection() {
    let manager = Arc::new(manager_with(vec![builtin("calculator", "calculator")]).await);
    manager.connect("calculator").await.unwrap();

    let calls = (0..10).map(|i| {
        let manager = manager.clone();
        async move {
            let result = manager
                .call_tool("add", json!({"a": i, "b": 100}))
                .await
                .unwrap();
            (i, result.text().unwrap_or_default())
        }
    });
    for (i, text) in futures::future::join_all(calls).await {
        assert_eq!(text, format!("{}.0", i + 100));
    }
    manager.shutdown().await;
}

#[tokio::test]
async fn test_two_servers_in_parallel() {
    let manager = manager_with(vec![
        builtin("calculator", "calculator"),
        builtin("datetime", "datetime"),
    ])
    .await;

    let results = manager.connect_all().await;
    assert!(results.values().all(Result::is_ok), "{results:?}");

    let (sum, date) = tokio::join!(
        manager.call_tool("multiply", json!({"a": 6, "b": 7})),
        manager.call_tool("format_date", json!({"timestamp": 0})),
    );
    assert_eq!(sum.unwrap().text().as_deref(), Some("42.0"));
    assert_eq!(date.unwrap().text().as_deref(), Some("1970-01-01 00:00:00"));
    manager.shutdown().await;
}

#[tokio::test]
async fn test_status_reports_live_server() {
    let manager = manager_with(vec![
        builtin("calculator", "calculator").with_description("math"),
        ServerConfig::new("idle", [BIN, "serve", "datetime"]),
    ])
    .await;
    manager.connect("calculator").await.unwrap();

    let status = manager.get_status().await;
    let calc = &status["calculator"];
    assert!(calc.connected);
    assert_eq!(calc.state, ConnectionState::Connected);
    assert_eq!(calc.tools_count, 3);
    assert_eq!(calc.resources_count, 0);
    assert_eq!(calc.description.as_deref(), Some("math"));
    let info = calc.server_info.as_ref().unwrap();
    assert_eq!(info.name.as_deref(), Some("calculator"));
    assert!(calc.connected_at.is_some());

    let idle = &status["idle"];
    assert!(!idle.connected);
    assert_eq!(idle.state, ConnectionState::Configured);
    assert_eq!(idle.tools_count, 0);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_nonexistent_binary_leaves_no_trace() {
    let manager = manager_with(vec![ServerConfig::new(
        "ghost",
        ["/nonexistent/bin/definitely-not-here"],
    )])
    .await;

    let err = manager.connect("ghost").await.unwrap_err();
    assert!(matches!(err, McpError::SpawnFailed { .. }), "{err}");
    assert!(manager.available_tools(None).await.is_empty());
    assert!(!manager.is_connected("ghost").await);

    let results = manager.connect_all().await;
    assert!(results["ghost"].is_err());
}

#[tokio::test]
async fn test_disconnect_twice_is_noop() {
    let manager = manager_with(vec![builtin("calculator", "calculator")]).await;
    manager.connect("calculator").await.unwrap();

    assert!(manager.disconnect("calculator").await);
    assert!(!manager.disconnect("calculator").await);
    assert!(manager.available_tools(None).await.is_empty());

    let err = manager.call_tool("add", json!({"a": 1, "b": 2})).await.unwrap_err();
    assert!(matches!(err, McpError::UnknownTool { .. }), "{err}");

    // Reconnect after disconnect works
    manager.connect("calculator").await.unwrap();
    assert_eq!(manager.available_tools(None).await.len(), 3);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_second_connect_is_rejected() {
    let manager = manager_with(vec![builtin("calculator", "calculator")]).await;
    manager.connect("calculator").await.unwrap();

    let err = manager.connect("calculator").await.unwrap_err();
    match err {
        McpError::AlreadyConnected { name } => assert_eq!(name, "calculator"),
        other => panic!("expected AlreadyConnected, got {other}"),
    }

    // The live connection and its catalog are untouched
    assert!(manager.is_connected("calculator").await);
    assert_eq!(manager.available_tools(None).await.len(), 3);
    let result = manager.call_tool("add", json!({"a": 1, "b": 2})).await.unwrap();
    assert_eq!(result.text().as_deref(), Some("3.0"));
    manager.shutdown().await;
}

#[tokio::test]
async fn test_colliding_tool_names_are_namespaced() {
    let manager = manager_with(vec![
        builtin("calc-a", "calculator"),
        builtin("calc-b", "calculator"),
    ])
    .await;
    manager.connect("calc-a").await.unwrap();
    manager.connect("calc-b").await.unwrap();

    let names: Vec<String> = manager
        .available_tools(None)
        .await
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert!(names.contains(&"add".to_string()));
    assert!(names.contains(&"calc-b.add".to_string()));
    assert_eq!(names.len(), 6);

    let plain = manager.call_tool("add", json!({"a": 1, "b": 1})).await.unwrap();
    assert_eq!(plain.server_name, "calc-a");
    let qualified = manager
        .call_tool("calc-b.add", json!({"a": 1, "b": 1}))
        .await
        .unwrap();
    assert_eq!(qualified.server_name, "calc-b");
    assert_eq!(qualified.text().as_deref(), Some("2.0"));

    // Dropping the first owner removes only its entries
    manager.disconnect("calc-a").await;
    let remaining = manager.available_tools(None).await;
    assert_eq!(remaining.len(), 3);
    assert!(remaining.iter().all(|t| t.server_name == "calc-b"));
    manager.shutdown().await;
}

#[tokio::test]
async fn test_registry_over_live_manager() {
    let manager = Arc::new(manager_with(vec![builtin("calculator", "calculator")]).await);
    let registry = ToolRegistry::new(manager.clone());
    assert!(registry.tools(None).await.is_empty());

    manager.connect("calculator").await.unwrap();

    // The registry sees the change without any refresh call
    let entries = registry.tools(None).await;
    assert_eq!(entries.len(), 3);
    let add = registry.get("add").await.unwrap();
    assert_eq!(add.server_name, "calculator");
    assert!(!add.example_usage.is_empty());

    assert!(registry.validate_arguments("add", &json!({"a": 1, "b": 2})).await);
    assert!(!registry.validate_arguments("add", &json!({"a": 1})).await);
    assert!(!registry.validate_arguments("calculate", &json!({"expression": 5})).await);
    assert!(!registry.validate_arguments("missing", &json!({})).await);

    assert_eq!(registry.to_openai_tools().await.len(), 3);
    assert_eq!(registry.summary().await.total_tools, 3);
    assert!(registry.capability_summary().await.contains("calculator"));
    assert_eq!(registry.suggest("ad", 3).await.first().map(String::as_str), Some("add"));

    let result = registry
        .call_tool("multiply", json!({"a": 3, "b": 4}))
        .await
        .unwrap();
    assert_eq!(result.text().as_deref(), Some("12.0"));
    manager.shutdown().await;
}

#[cfg(unix)]
mod scripted {
    use super::*;

    const INIT: &str = r#"read line; printf '{"jsonrpc":"2.0","id":"1","result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"scripted","version":"0.1"}}}\n'; read note"#;
    const TOOLS: &str = r#"read line; printf '{"jsonrpc":"2.0","id":"2","result":{"tools":[{"name":"slow","description":"Sleeps","inputSchema":{"type":"object"}}]}}\n'"#;

    fn script_server(name: &str, body: &str) -> ServerConfig {
        let script = format!("{INIT}; {TOOLS}; {body}");
        ServerConfig::new(name, ["sh", "-c", script.as_str()])
    }

    #[tokio::test]
    async fn test_failing_resources_list_still_connects() {
        let config = script_server(
            "no-resources",
            r#"read line; printf '{"jsonrpc":"2.0","id":"3","error":{"code":-32601,"message":"Method not found"}}\n'; while read line; do :; done"#,
        );
        let manager = manager_with(vec![config]).await;

        manager.connect("no-resources").await.unwrap();
        assert!(manager.is_connected("no-resources").await);
        assert_eq!(manager.available_tools(None).await.len(), 1);
        assert!(manager.available_resources(None).await.is_empty());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_keeps_connection_alive() {
        let config = script_server(
            "slowpoke",
            concat!(
                r#"read line; printf '{"jsonrpc":"2.0","id":"3","result":{"resources":[]}}\n'; "#,
                r#"read line; sleep 1; printf '{"jsonrpc":"2.0","id":"4","result":{"content":[{"type":"text","text":"late"}]}}\n'; "#,
                r#"read line; printf '{"jsonrpc":"2.0","id":"5","result":{"content":[{"type":"text","text":"fast"}]}}\n'; "#,
                "while read line; do :; done"
            ),
        );
        let manager = manager_with(vec![config]).await;
        manager.connect("slowpoke").await.unwrap();

        let err = manager
            .call_tool_with_timeout("slow", json!({}), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }), "{err}");
        assert!(manager.is_connected("slowpoke").await);

        // The late reply to id 4 is discarded; id 5 gets its own answer
        let result = manager
            .call_tool_with_timeout("slow", json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.text().as_deref(), Some("fast"));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_exit_purges_catalog() {
        let config = script_server(
            "fragile",
            r#"read line; printf '{"jsonrpc":"2.0","id":"3","result":{"resources":[]}}\n'; read line; exit 0"#,
        );
        let manager = manager_with(vec![config]).await;
        manager.connect("fragile").await.unwrap();

        let err = manager.call_tool("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }), "{err}");
        assert!(!manager.is_connected("fragile").await);
        assert!(manager.available_tools(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_idle_exit_purges_catalog() {
        let config = script_server(
            "short-lived",
            r#"read line; printf '{"jsonrpc":"2.0","id":"3","result":{"resources":[]}}\n'; sleep 0.5; exit 0"#,
        );
        let manager = manager_with(vec![config]).await;
        manager.connect("short-lived").await.unwrap();
        assert_eq!(manager.available_tools(None).await.len(), 1);

        // No call is made; the exit alone must clear the server out
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !manager.available_tools(None).await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "catalog never purged");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(!manager.is_connected("short-lived").await);
        assert!(manager.tool_info("slow").await.is_none());
        let status = &manager.get_status().await["short-lived"];
        assert!(!status.connected);
        assert_eq!(status.state, ConnectionState::Configured);
        assert_eq!(status.tools_count, 0);
        assert!(status.server_info.is_none());

        let err = manager.call_tool("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { .. }), "{err}");

        // The slot is free again, so a reconnect is not refused
        let err = manager.connect("short-lived").await;
        assert!(!matches!(err, Err(McpError::AlreadyConnected { .. })), "{err:?}");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_failure_reports_stderr() {
        let config = ServerConfig::new(
            "broken",
            ["sh", "-c", "echo 'missing module: mcp' >&2; read line; exit 1"],
        );
        let manager = manager_with(vec![config]).await;

        let err = manager.connect("broken").await.unwrap_err();
        match err {
            McpError::InitFailed { name, reason } => {
                assert_eq!(name, "broken");
                assert!(reason.contains("missing module"), "{reason}");
            }
            other => panic!("expected InitFailed, got {other}"),
        }
        assert_eq!(manager.get_status().await["broken"].state, ConnectionState::Configured);
    }
}
