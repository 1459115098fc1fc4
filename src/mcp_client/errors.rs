//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// Pipe closed or process exited mid-conversation.
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Malformed JSON or an unexpected message shape from a server.
    #[error("protocol error for server '{server}': {reason}")]
    ProtocolError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No response arrived within the call's deadline.
    #[error("'{method}' on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// Tool not found in the aggregate catalog.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// No connected server owns this resource URI.
    #[error("unknown resource: '{uri}'")]
    UnknownResource {
        uri: String,
    },

    /// The server owning a tool or resource is no longer connected.
    #[error("server '{name}' is not connected")]
    ServerNotConnected {
        name: String,
    },

    /// No configuration exists for the requested server.
    #[error("no configuration for server '{name}'")]
    UnknownServer {
        name: String,
    },

    /// A connection for this server already exists (or is being set up).
    #[error("server '{name}' is already connected")]
    AlreadyConnected {
        name: String,
    },

    /// A configuration with this name already exists.
    #[error("server '{name}' already exists")]
    DuplicateServer {
        name: String,
    },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// Configuration error (bad config entry, unwritable config file).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl McpError {
    /// Whether this error means the connection itself is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, McpError::TransportError { .. })
    }
}
