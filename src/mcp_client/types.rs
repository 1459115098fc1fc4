//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, and the domain
//! types (server configs, tools, resources) the manager hands out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision sent during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// Request identifier as seen on the wire.
///
/// Outgoing ids are always decimal strings; servers may echo them back as
/// strings or numbers, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl RequestId {
    /// Numeric value of the id, if it has one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RequestId::Number(n) => Some(*n),
            RequestId::String(s) => s.parse().ok(),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::String(id.to_string())
    }
}

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: RequestId::from(id),
            method: method.to_string(),
            params,
        }
    }
}

/// Any message a server can write to its stdout.
///
/// Variant order matters: a line carrying an `error` object is an error
/// response even if it also has `"result": null`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Error(JsonRpcErrorResponse),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// The id this message answers, if any.
    pub fn response_id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Error(e) => e.id.as_ref(),
            JsonRpcMessage::Response(r) => Some(&r.id),
            JsonRpcMessage::Notification(_) => None,
        }
    }
}

/// Successful JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    pub result: Value,
}

/// JSON-RPC error response. `id` is null for parse errors.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorResponse {
    #[serde(default)]
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated message (notification or request) the client does not answer.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// MCP initialize response payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Tool definition as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// Resource definition as returned by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResourceDefinition {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// `resources/list` result payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesListResult {
    #[serde(default)]
    pub resources: Vec<McpResourceDefinition>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

// ─── Server Configuration ────────────────────────────────────────────────────

/// A named launch recipe for one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    /// Executable followed by its fixed arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overrides merged over the parent process environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ServerConfig {
    pub fn new<I, S>(name: &str, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            command: command.into_iter().map(Into::into).collect(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
            description: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_working_directory(mut self, dir: &str) -> Self {
        self.working_directory = Some(dir.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// The executable to launch.
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    /// Everything after the executable: fixed command args, then extra args.
    pub fn program_args(&self) -> impl Iterator<Item = &String> {
        self.command.iter().skip(1).chain(self.args.iter())
    }

    /// Full command line joined with spaces, for display.
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .chain(self.args.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Structural checks applied before a config is stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("server name must not be empty".into());
        }
        if self.name.chars().any(char::is_whitespace) || self.name.contains("://") {
            return Err(format!(
                "server name '{}' must not contain whitespace or '://'",
                self.name
            ));
        }
        match self.program() {
            Some(p) if !p.trim().is_empty() => Ok(()),
            _ => Err(format!("server '{}' has an empty command", self.name)),
        }
    }
}

// ─── Catalog Entries ─────────────────────────────────────────────────────────

/// A tool discovered on a connected server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    /// Name exposed in the aggregate catalog.
    pub name: String,
    /// Name the owning server knows the tool by.
    pub remote_name: String,
    pub description: String,
    pub input_schema: Value,
    pub server_name: String,
}

impl Tool {
    pub fn from_definition(server_name: &str, def: McpToolDefinition) -> Self {
        Self {
            name: def.name.clone(),
            remote_name: def.name,
            description: def.description.unwrap_or_default(),
            input_schema: def.input_schema,
            server_name: server_name.to_string(),
        }
    }

    /// `required` entries of the input schema.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// A resource discovered on a connected server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub server_name: String,
}

impl Resource {
    pub fn from_definition(server_name: &str, def: McpResourceDefinition) -> Self {
        Self {
            uri: def.uri,
            name: def.name,
            description: def.description,
            mime_type: def.mime_type,
            server_name: server_name.to_string(),
        }
    }
}

/// Result of a tool call execution.
///
/// `result` is the server's payload, passed through untouched.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub server_name: String,
    pub result: Value,
    pub execution_time_ms: u64,
}

impl ToolResult {
    /// Text of every `{"type": "text"}` content part, newline-joined.
    ///
    /// Falls back to a bare string result. `None` when there is no text.
    pub fn text(&self) -> Option<String> {
        if let Some(parts) = self.result.get("content").and_then(Value::as_array) {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if !texts.is_empty() {
                return Some(texts.join("\n"));
            }
        }
        self.result.as_str().map(str::to_string)
    }

    /// Whether the server flagged the result as a tool-level failure.
    pub fn is_error(&self) -> bool {
        self.result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Text if present, otherwise the raw JSON payload.
    pub fn display_text(&self) -> String {
        self.text().unwrap_or_else(|| self.result.to_string())
    }
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Generic application-level server error.
    pub const SERVER_ERROR: i64 = -32000;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
