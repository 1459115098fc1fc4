//! MCP Manager: lifecycle orchestrator and call router.
//!
//! Owns the config store, one connection per connected server, and the
//! aggregate catalog. State lives behind a single async `RwLock` that is
//! never held across process I/O: calls snapshot the owning connection
//! handle under the lock, release it, then talk to the server.
//!
//! Each connection gets a watcher task that drops the server from the
//! catalog as soon as its actor stops, so an idle server that exits never
//! leaves stale tools behind.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::catalog::Catalog;
use super::config_store::ConfigStore;
use super::connection::{millis, ServerConnection};
use super::errors::McpError;
use super::lifecycle;
use super::types::{Resource, ServerConfig, ServerInfo, Tool, ToolResult};

// ─── Settings ────────────────────────────────────────────────────────────────

/// Default per-call timeout for `tools/call` and `resources/read`.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default budget for spawn + initialize + discovery.
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for a manager instance.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub call_timeout: Duration,
    pub init_timeout: Duration,
    /// Sent as `clientInfo` during the handshake.
    pub client_name: String,
    pub client_version: String,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            client_name: "orionai-mcp".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ─── State ───────────────────────────────────────────────────────────────────

/// Where a configured server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Configured,
    Connecting,
    Connected,
    Disconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Configured => "configured",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one configured server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub connected: bool,
    pub state: ConnectionState,
    pub description: Option<String>,
    pub command: String,
    pub tools_count: usize,
    pub resources_count: usize,
    pub server_info: Option<ServerInfo>,
    /// RFC 3339.
    pub connected_at: Option<String>,
}

/// A server that is not simply `Configured`.
enum Slot {
    Connecting,
    Connected(Arc<ServerConnection>),
    Disconnecting,
}

#[derive(Default)]
struct ManagerState {
    slots: HashMap<String, Slot>,
    catalog: Catalog,
}

impl ManagerState {
    /// Forget `name` if its slot still holds the connection at `dead`.
    fn remove_connection(&mut self, name: &str, dead: *const ServerConnection) -> bool {
        match self.slots.get(name) {
            Some(Slot::Connected(current)) if std::ptr::eq(Arc::as_ptr(current), dead) => {
                self.slots.remove(name);
                self.catalog.purge(name);
                true
            }
            _ => false,
        }
    }
}

// ─── McpManager ──────────────────────────────────────────────────────────────

/// Manages configured servers, their connections, and the merged catalog.
pub struct McpManager {
    store: RwLock<ConfigStore>,
    state: Arc<RwLock<ManagerState>>,
    settings: ManagerSettings,
}

impl McpManager {
    pub fn new(store: ConfigStore, settings: ManagerSettings) -> Self {
        Self {
            store: RwLock::new(store),
            state: Arc::new(RwLock::new(ManagerState::default())),
            settings,
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn, initialize and discover one configured server.
    ///
    /// On failure nothing is registered and the server is back to
    /// `Configured`.
    pub async fn connect(&self, name: &str) -> Result<(), McpError> {
        let config = self
            .store
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;

        {
            let mut state = self.state.write().await;
            match state.slots.get(name) {
                Some(Slot::Connected(conn)) if !conn.is_connected() => {
                    // Died since the last call; clear it out and reconnect.
                    state.catalog.purge(name);
                }
                Some(_) => {
                    return Err(McpError::AlreadyConnected {
                        name: name.to_string(),
                    })
                }
                None => {}
            }
            state.slots.insert(name.to_string(), Slot::Connecting);
        }

        tracing::info!(server = name, command = %config.command_line(), "connecting to MCP server");

        let spawned = match lifecycle::spawn_server(&config, &self.settings).await {
            Ok(spawned) => spawned,
            Err(e) => {
                self.state.write().await.slots.remove(name);
                tracing::warn!(server = name, error = %e, "failed to connect");
                return Err(e);
            }
        };

        let connection = Arc::new(spawned.connection);
        let mut state = self.state.write().await;
        if !matches!(state.slots.get(name), Some(Slot::Connecting)) {
            // Removed or shut down while the handshake was running.
            drop(state);
            connection.shutdown().await;
            return Err(McpError::TransportError {
                server: name.to_string(),
                reason: "connection abandoned during startup".into(),
            });
        }

        let registered = state
            .catalog
            .merge(name, spawned.tools, spawned.resources);
        self.watch_exit(name, &connection);
        state
            .slots
            .insert(name.to_string(), Slot::Connected(connection));

        tracing::info!(server = name, tools = ?registered, "connected to MCP server");
        Ok(())
    }

    /// Purge `connection` from the catalog once its actor stops.
    ///
    /// Holds only a weak handle so an abandoned manager still drops the
    /// connection and its process.
    fn watch_exit(&self, name: &str, connection: &Arc<ServerConnection>) {
        let closed = connection.closed();
        let watched: Weak<ServerConnection> = Arc::downgrade(connection);
        let state = Arc::clone(&self.state);
        let name = name.to_string();
        tokio::spawn(async move {
            closed.await;
            let removed = state
                .write()
                .await
                .remove_connection(&name, Weak::as_ptr(&watched));
            if removed {
                tracing::warn!(server = %name, "server exited, removed from catalog");
            }
        });
    }

    /// Tear down one connection. `false` if the server was not connected.
    pub async fn disconnect(&self, name: &str) -> bool {
        let connection = {
            let mut state = self.state.write().await;
            match state.slots.remove(name) {
                Some(Slot::Connected(conn)) => {
                    let (tools, resources) = state.catalog.purge(name);
                    state
                        .slots
                        .insert(name.to_string(), Slot::Disconnecting);
                    tracing::debug!(server = name, tools, resources, "purged catalog entries");
                    conn
                }
                Some(other) => {
                    state.slots.insert(name.to_string(), other);
                    return false;
                }
                None => return false,
            }
        };

        connection.shutdown().await;

        let mut state = self.state.write().await;
        if matches!(state.slots.get(name), Some(Slot::Disconnecting)) {
            state.slots.remove(name);
        }
        tracing::info!(server = name, "disconnected from MCP server");
        true
    }

    /// Connect every configured server concurrently.
    ///
    /// Servers that are already connected count as successes.
    pub async fn connect_all(&self) -> BTreeMap<String, Result<(), String>> {
        let names = self.store.read().await.names();

        let attempts = names.into_iter().map(|name| async move {
            let result = match self.connect(&name).await {
                Ok(()) | Err(McpError::AlreadyConnected { .. }) => Ok(()),
                Err(e) => Err(e.to_string()),
            };
            (name, result)
        });

        let results: BTreeMap<_, _> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .collect();

        let failed = results.values().filter(|r| r.is_err()).count();
        tracing::info!(
            servers = results.len(),
            failed,
            tools = self.state.read().await.catalog.len(),
            "connect_all finished"
        );
        results
    }

    /// Disconnect every live connection. Never fails.
    pub async fn shutdown(&self) {
        let names: Vec<String> = {
            let state = self.state.read().await;
            state
                .slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Connected(_)))
                .map(|(name, _)| name.clone())
                .collect()
        };

        let sweeps = names.iter().map(|name| self.disconnect(name));
        futures::future::join_all(sweeps).await;

        // Anything still mid-connect is abandoned; connect() cleans up.
        self.state.write().await.slots.clear();
        tracing::info!(servers = names.len(), "MCP manager shut down");
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        matches!(
            self.state.read().await.slots.get(name),
            Some(Slot::Connected(conn)) if conn.is_connected()
        )
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Invoke a tool with the manager's default timeout.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        self.call_tool_with_timeout(name, arguments, self.settings.call_timeout)
            .await
    }

    /// Invoke a tool by exposed or `server.tool` name.
    ///
    /// Unknown names fail before any I/O. A transport failure purges the
    /// owning server from the catalog.
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolResult, McpError> {
        let (tool, connection) = {
            let state = self.state.read().await;
            let tool = state
                .catalog
                .resolve_tool(name)
                .cloned()
                .ok_or_else(|| McpError::UnknownTool {
                    name: name.to_string(),
                })?;
            let connection = match state.slots.get(&tool.server_name) {
                Some(Slot::Connected(conn)) => conn.clone(),
                _ => {
                    return Err(McpError::ServerNotConnected {
                        name: tool.server_name,
                    })
                }
            };
            (tool, connection)
        };

        if !connection.is_connected() {
            self.purge_dead(&tool.server_name, &connection).await;
            return Err(McpError::ServerNotConnected {
                name: tool.server_name,
            });
        }

        tracing::debug!(tool = %tool.name, server = %tool.server_name, "calling tool");
        let start = Instant::now();
        let result = connection
            .call_tool(&tool.remote_name, arguments, timeout)
            .await;
        let elapsed = millis(start.elapsed());

        match result {
            Ok(result) => {
                tracing::info!(
                    tool = %tool.name,
                    server = %tool.server_name,
                    execution_time_ms = elapsed,
                    "tool call complete"
                );
                Ok(ToolResult {
                    tool_name: tool.name,
                    server_name: tool.server_name,
                    result,
                    execution_time_ms: elapsed,
                })
            }
            Err(e) => {
                tracing::warn!(tool = %tool.name, server = %tool.server_name, error = %e, "tool call failed");
                if e.is_connection_loss() {
                    self.purge_dead(&tool.server_name, &connection).await;
                }
                Err(e)
            }
        }
    }

    /// Read a resource, routed to the server that advertised `uri` or, failing
    /// that, the server named by its `scheme://` prefix.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        let (server, connection) = {
            let state = self.state.read().await;
            let server = state
                .catalog
                .resource_owner(uri)
                .map(str::to_string)
                .or_else(|| {
                    uri.split_once("://")
                        .map(|(scheme, _)| scheme.to_string())
                        .filter(|scheme| state.slots.contains_key(scheme))
                })
                .ok_or_else(|| McpError::UnknownResource {
                    uri: uri.to_string(),
                })?;
            let connection = match state.slots.get(&server) {
                Some(Slot::Connected(conn)) => conn.clone(),
                _ => return Err(McpError::ServerNotConnected { name: server }),
            };
            (server, connection)
        };

        let result = connection
            .read_resource(uri, self.settings.call_timeout)
            .await;
        if let Err(e) = &result {
            if e.is_connection_loss() {
                self.purge_dead(&server, &connection).await;
            }
        }
        result
    }

    /// Remove a dead connection, unless it was already replaced.
    async fn purge_dead(&self, name: &str, dead: &Arc<ServerConnection>) {
        let removed = self
            .state
            .write()
            .await
            .remove_connection(name, Arc::as_ptr(dead));
        if removed {
            tracing::warn!(server = name, "server connection lost, removed from catalog");
            dead.shutdown().await;
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Status of every configured server, keyed by name.
    pub async fn get_status(&self) -> BTreeMap<String, ServerStatus> {
        let store = self.store.read().await;
        let state = self.state.read().await;

        store
            .list()
            .into_iter()
            .map(|config| {
                let (state_kind, connection) = match state.slots.get(&config.name) {
                    Some(Slot::Connecting) => (ConnectionState::Connecting, None),
                    Some(Slot::Disconnecting) => (ConnectionState::Disconnecting, None),
                    // Exited; the watcher has not purged it yet.
                    Some(Slot::Connected(conn)) if !conn.is_connected() => {
                        (ConnectionState::Disconnecting, None)
                    }
                    Some(Slot::Connected(conn)) => (ConnectionState::Connected, Some(conn)),
                    None => (ConnectionState::Configured, None),
                };
                let status = ServerStatus {
                    name: config.name.clone(),
                    connected: connection.is_some_and(|c| c.is_connected()),
                    state: state_kind,
                    description: config.description.clone(),
                    command: config.command_line(),
                    tools_count: state.catalog.tool_count(&config.name),
                    resources_count: state.catalog.resource_count(&config.name),
                    server_info: connection.and_then(|c| c.server_info().cloned()),
                    connected_at: connection.map(|c| c.connected_at().to_rfc3339()),
                };
                (config.name, status)
            })
            .collect()
    }

    pub async fn available_tools(&self, server: Option<&str>) -> Vec<Tool> {
        self.state.read().await.catalog.tools(server)
    }

    pub async fn available_resources(&self, server: Option<&str>) -> Vec<Resource> {
        self.state.read().await.catalog.resources(server)
    }

    pub async fn tool_info(&self, name: &str) -> Option<Tool> {
        self.state.read().await.catalog.resolve_tool(name).cloned()
    }

    pub async fn search_tools(&self, query: &str) -> Vec<Tool> {
        self.state.read().await.catalog.search_tools(query)
    }

    // ─── Configuration ───────────────────────────────────────────────────

    pub async fn add_server(&self, config: ServerConfig) -> Result<(), McpError> {
        let name = config.name.clone();
        self.store.write().await.add(config)?;
        tracing::info!(server = %name, "added server configuration");
        Ok(())
    }

    /// Disconnect (if needed) and forget a server. `Ok(false)` if unknown.
    pub async fn remove_server(&self, name: &str) -> Result<bool, McpError> {
        self.disconnect(name).await;
        let removed = self.store.write().await.remove(name)?;
        if removed {
            tracing::info!(server = name, "removed server configuration");
        }
        Ok(removed)
    }

    pub async fn list_servers(&self) -> Vec<ServerConfig> {
        self.store.read().await.list()
    }

    pub async fn server_config(&self, name: &str) -> Option<ServerConfig> {
        self.store.read().await.get(name).cloned()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> McpManager {
        McpManager::new(ConfigStore::in_memory(), ManagerSettings::default())
    }

    #[test]
    fn test_default_settings() {
        let settings = ManagerSettings::default();
        assert_eq!(settings.call_timeout, Duration::from_secs(30));
        assert_eq!(settings.init_timeout, Duration::from_secs(30));
        assert_eq!(settings.client_name, "orionai-mcp");
    }

    #[tokio::test]
    async fn test_new_manager_empty() {
        let manager = manager();
        assert!(manager.get_status().await.is_empty());
        assert!(manager.available_tools(None).await.is_empty());
        assert!(manager.list_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_unknown_server() {
        let err = manager().connect("nope").await.unwrap_err();
        assert!(matches!(err, McpError::UnknownServer { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_before_io() {
        let err = manager()
            .call_tool("nonexistent", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { ref name } if name == "nonexistent"));
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let err = manager().read_resource("nowhere://x").await.unwrap_err();
        assert!(matches!(err, McpError::UnknownResource { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_disconnect_not_connected_is_noop() {
        let manager = manager();
        manager
            .add_server(ServerConfig::new("idle", ["true"]))
            .await
            .unwrap();
        assert!(!manager.disconnect("idle").await);
        assert!(!manager.disconnect("idle").await);
        assert!(!manager.disconnect("never-configured").await);
    }

    #[tokio::test]
    async fn test_status_lists_configured_servers() {
        let manager = manager();
        manager
            .add_server(ServerConfig::new("zeta", ["true"]).with_description("last"))
            .await
            .unwrap();
        manager
            .add_server(ServerConfig::new("alpha", ["true", "--flag"]))
            .await
            .unwrap();

        let status = manager.get_status().await;
        assert_eq!(status.keys().collect::<Vec<_>>(), vec!["alpha", "zeta"]);

        let alpha = &status["alpha"];
        assert!(!alpha.connected);
        assert_eq!(alpha.state, ConnectionState::Configured);
        assert_eq!(alpha.command, "true --flag");
        assert_eq!(alpha.tools_count, 0);
        assert!(alpha.connected_at.is_none());
        assert_eq!(status["zeta"].description.as_deref(), Some("last"));
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_trace() {
        let manager = manager();
        manager
            .add_server(ServerConfig::new("ghost", ["/definitely/not/a/binary"]))
            .await
            .unwrap();

        let err = manager.connect("ghost").await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }), "{err}");
        assert!(manager.available_tools(None).await.is_empty());
        assert_eq!(manager.get_status().await["ghost"].state, ConnectionState::Configured);

        let results = manager.connect_all().await;
        assert!(results["ghost"].is_err());
    }

    #[tokio::test]
    async fn test_remove_server() {
        let manager = manager();
        manager
            .add_server(ServerConfig::new("temp", ["true"]))
            .await
            .unwrap();
        let err = manager
            .add_server(ServerConfig::new("temp", ["true"]))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::DuplicateServer { .. }));

        assert!(manager.remove_server("temp").await.unwrap());
        assert!(!manager.remove_server("temp").await.unwrap());
        assert!(manager.server_config("temp").await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_without_connections() {
        let manager = manager();
        manager.shutdown().await;
        manager.shutdown().await;
    }
}
