//! JSON-RPC 2.0 envelope and MCP handshake on top of one stdio transport.
//!
//! A `ProtocolClient` assumes strict request/response pairing: one request
//! is outstanding at a time. Callers that share a server go through the
//! connection actor, which owns the client and feeds it one call at a time.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::errors::McpError;
use super::transport::StdioTransport;
use super::types::{
    InitializeResult, JsonRpcMessage, JsonRpcRequest, RequestId, Resource, ResourcesListResult,
    Tool, ToolsListResult, PROTOCOL_VERSION,
};

/// Consecutive malformed lines after which the stream is considered dead.
const MAX_CONSECUTIVE_PROTOCOL_ERRORS: u32 = 3;

/// Upper bound on `nextCursor` pages followed during discovery.
const MAX_LIST_PAGES: usize = 20;

/// Identity sent in `initialize.clientInfo`.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "orionai-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// MCP protocol client bound to one server connection.
pub struct ProtocolClient {
    transport: StdioTransport,
    client_info: ClientInfo,
    next_id: u64,
    consecutive_protocol_errors: u32,
    /// Set while a request line is being written; a call abandoned in that
    /// window leaves a partial line on the pipe.
    write_in_progress: bool,
}

impl ProtocolClient {
    pub fn new(transport: StdioTransport, client_info: ClientInfo) -> Self {
        Self {
            transport,
            client_info,
            next_id: 1,
            consecutive_protocol_errors: 0,
            write_in_progress: false,
        }
    }

    pub fn server_name(&self) -> &str {
        self.transport.server_name()
    }

    /// Allocate the next request id. Ids start at 1 and are never reused.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Whether an abandoned call left the request stream in an unknown state.
    pub fn is_write_interrupted(&self) -> bool {
        self.write_in_progress
    }

    /// Send a request and return its `result`.
    ///
    /// Responses to other ids (late answers to abandoned calls) and
    /// server notifications are discarded while waiting.
    pub async fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id();
        let request = JsonRpcRequest::new(id, method, params);

        self.write_in_progress = true;
        self.transport.write_message(&request).await?;
        self.write_in_progress = false;

        loop {
            let value = match self.transport.read_message().await {
                Ok(value) => value,
                Err(e @ McpError::ProtocolError { .. }) => return Err(self.protocol_failure(e)),
                Err(e) => return Err(e),
            };

            let message: JsonRpcMessage = match serde_json::from_value(value) {
                Ok(message) => message,
                Err(e) => {
                    let err = McpError::ProtocolError {
                        server: self.server_name().to_string(),
                        reason: format!("unexpected message shape: {e}"),
                    };
                    return Err(self.protocol_failure(err));
                }
            };
            self.consecutive_protocol_errors = 0;

            match message {
                JsonRpcMessage::Response(resp) if resp.id.as_u64() == Some(id) => {
                    return Ok(resp.result);
                }
                JsonRpcMessage::Error(resp)
                    if resp.id.as_ref().and_then(RequestId::as_u64) == Some(id) =>
                {
                    return Err(McpError::ServerError {
                        code: resp.error.code,
                        message: resp.error.message,
                        data: resp.error.data,
                    });
                }
                JsonRpcMessage::Notification(n) => {
                    tracing::debug!(
                        server = self.server_name(),
                        method = %n.method,
                        "ignoring server-initiated message"
                    );
                }
                other => {
                    tracing::debug!(
                        server = self.server_name(),
                        expected = id,
                        received = ?other.response_id(),
                        "discarding response for another request"
                    );
                }
            }
        }
    }

    fn protocol_failure(&mut self, err: McpError) -> McpError {
        self.consecutive_protocol_errors += 1;
        tracing::warn!(
            server = self.server_name(),
            error = %err,
            consecutive = self.consecutive_protocol_errors,
            "protocol error"
        );
        if self.consecutive_protocol_errors >= MAX_CONSECUTIVE_PROTOCOL_ERRORS {
            return McpError::TransportError {
                server: self.server_name().to_string(),
                reason: format!(
                    "{} consecutive malformed messages: {err}",
                    self.consecutive_protocol_errors
                ),
            };
        }
        err
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let mut notification = json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }
        self.write_in_progress = true;
        self.transport.write_message(&notification).await?;
        self.write_in_progress = false;
        Ok(())
    }

    /// Perform the MCP initialization handshake.
    ///
    /// Must be the first call on a fresh connection.
    pub async fn initialize(&mut self) -> Result<InitializeResult, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "resources": {}
            },
            "clientInfo": {
                "name": self.client_info.name,
                "version": self.client_info.version
            }
        });

        let result = self.call("initialize", Some(params)).await?;
        let init: InitializeResult = if result.is_null() {
            InitializeResult::default()
        } else {
            parse_result(self.server_name(), "initialize", result)?
        };

        self.notify("notifications/initialized", None).await?;
        Ok(init)
    }

    /// Fetch the server's tools and resources.
    ///
    /// Either list failing is logged and treated as empty, so a tools-only
    /// server still connects.
    pub async fn discover(&mut self) -> (Vec<Tool>, Vec<Resource>) {
        let tools = match self.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(server = self.server_name(), error = %e, "tools/list failed");
                Vec::new()
            }
        };

        let resources = match self.list_resources().await {
            Ok(resources) => resources,
            Err(e) => {
                tracing::warn!(server = self.server_name(), error = %e, "resources/list failed");
                Vec::new()
            }
        };

        (tools, resources)
    }

    async fn list_tools(&mut self) -> Result<Vec<Tool>, McpError> {
        let server = self.server_name().to_string();
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let result = self.call("tools/list", params).await?;
            let page: ToolsListResult = parse_result(&server, "tools/list", result)?;
            tools.extend(
                page.tools
                    .into_iter()
                    .map(|def| Tool::from_definition(&server, def)),
            );
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(tools)
    }

    async fn list_resources(&mut self) -> Result<Vec<Resource>, McpError> {
        let server = self.server_name().to_string();
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let result = self.call("resources/list", params).await?;
            let page: ResourcesListResult = parse_result(&server, "resources/list", result)?;
            resources.extend(
                page.resources
                    .into_iter()
                    .map(|def| Resource::from_definition(&server, def)),
            );
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(resources)
    }

    /// Invoke a tool. The result payload is returned untouched.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let params = json!({
            "name": name,
            "arguments": arguments,
        });
        self.call("tools/call", Some(params)).await
    }

    /// Read a resource by URI.
    pub async fn read_resource(&mut self, uri: &str) -> Result<Value, McpError> {
        self.call("resources/read", Some(json!({ "uri": uri }))).await
    }

    /// Give the transport back, e.g. to close it before terminating.
    pub fn into_transport(self) -> StdioTransport {
        self.transport
    }
}

fn parse_result<T: DeserializeOwned>(
    server: &str,
    method: &str,
    result: Value,
) -> Result<T, McpError> {
    serde_json::from_value(result).map_err(|e| McpError::ProtocolError {
        server: server.to_string(),
        reason: format!("failed to parse {method} result: {e}"),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mcp_client::transport;
    use crate::mcp_client::types::ServerConfig;

    /// Client over a shell script acting as a scripted server.
    async fn scripted(script: &str) -> (ProtocolClient, transport::ServerProcess) {
        let config = ServerConfig::new("scripted", ["sh", "-c", script]);
        let (transport, process) = transport::spawn(&config).await.unwrap();
        (ProtocolClient::new(transport, ClientInfo::default()), process)
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let (mut client, _process) = scripted("sleep 1").await;
        assert_eq!(client.next_id(), 1);
        assert_eq!(client.next_id(), 2);
        assert_eq!(client.next_id(), 3);
    }

    #[tokio::test]
    async fn test_call_returns_result() {
        let script = r#"read line; printf '{"jsonrpc":"2.0","id":"1","result":{"ok":true}}\n'; sleep 1"#;
        let (mut client, _process) = scripted(script).await;
        let result = client.call("ping", None).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn test_call_maps_error_response() {
        let script = r#"read line; printf '{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}\n'; sleep 1"#;
        let (mut client, _process) = scripted(script).await;
        let err = client.call("nope", None).await.unwrap_err();
        match err {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_call_skips_stale_and_notifications() {
        let script = concat!(
            r#"read line; "#,
            r#"printf '{"jsonrpc":"2.0","method":"notifications/message","params":{}}\n'; "#,
            r#"printf '{"jsonrpc":"2.0","id":"99","result":"stale"}\n'; "#,
            r#"printf '{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}\n'; "#,
            r#"printf '{"jsonrpc":"2.0","id":"1","result":"fresh"}\n'; sleep 1"#
        );
        let (mut client, _process) = scripted(script).await;
        let result = client.call("ping", None).await.unwrap();
        assert_eq!(result, "fresh");
    }

    #[tokio::test]
    async fn test_malformed_line_fails_call_but_not_connection() {
        let script = concat!(
            r#"read line; printf 'garbage\n'; "#,
            r#"read line; printf '{"jsonrpc":"2.0","id":"2","result":2}\n'; sleep 1"#
        );
        let (mut client, _process) = scripted(script).await;

        let err = client.call("first", None).await.unwrap_err();
        assert!(matches!(err, McpError::ProtocolError { .. }), "{err}");

        let result = client.call("second", None).await.unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn test_repeated_malformed_lines_become_transport_error() {
        let script = r#"while read line; do printf 'garbage\n'; done"#;
        let (mut client, _process) = scripted(script).await;

        for _ in 0..(MAX_CONSECUTIVE_PROTOCOL_ERRORS - 1) {
            let err = client.call("x", None).await.unwrap_err();
            assert!(matches!(err, McpError::ProtocolError { .. }));
        }
        let err = client.call("x", None).await.unwrap_err();
        assert!(err.is_connection_loss(), "{err}");
    }

    #[tokio::test]
    async fn test_eof_is_transport_error() {
        let (mut client, _process) = scripted("read line; sleep 0.1").await;
        let err = client.call("ping", None).await.unwrap_err();
        assert!(err.is_connection_loss(), "{err}");
    }

    #[tokio::test]
    async fn test_discover_tolerates_resources_failure() {
        let script = concat!(
            r#"read line; printf '{"jsonrpc":"2.0","id":"1","result":{"tools":[{"name":"echo","description":"Echo","inputSchema":{"type":"object"}}]}}\n'; "#,
            r#"read line; printf '{"jsonrpc":"2.0","id":"2","error":{"code":-32601,"message":"Method not found"}}\n'; sleep 1"#
        );
        let (mut client, _process) = scripted(script).await;
        let (tools, resources) = client.discover().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].server_name, "scripted");
        assert!(resources.is_empty());
    }

    #[tokio::test]
    async fn test_discover_follows_cursor() {
        let script = concat!(
            r#"read line; printf '{"jsonrpc":"2.0","id":"1","result":{"tools":[{"name":"a"}],"nextCursor":"p2"}}\n'; "#,
            r#"read line; case "$line" in *p2*) printf '{"jsonrpc":"2.0","id":"2","result":{"tools":[{"name":"b"}]}}\n';; esac; "#,
            r#"read line; printf '{"jsonrpc":"2.0","id":"3","result":{"resources":[{"uri":"scripted://r","name":"r"}]}}\n'; sleep 1"#
        );
        let (mut client, _process) = scripted(script).await;
        let (tools, resources) = client.discover().await;
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].uri, "scripted://r");
    }
}
