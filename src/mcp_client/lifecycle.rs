//! Server process lifecycle management.
//!
//! Turns a `ServerConfig` into a live `ServerConnection`: spawn the child,
//! run the initialize handshake and capability discovery under one startup
//! deadline, and hand the initialized client to its connection actor. On any
//! failure the process is terminated and nothing is registered.

use super::connection::ServerConnection;
use super::errors::McpError;
use super::manager::ManagerSettings;
use super::protocol::{ClientInfo, ProtocolClient};
use super::transport::{self, format_stderr_suffix};
use super::types::{Resource, ServerConfig, Tool};

/// A server that finished its handshake, with what it advertised.
pub struct SpawnedServer {
    pub connection: ServerConnection,
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
}

/// Spawn a single MCP server process and perform the initialization handshake.
///
/// `initialize` failing (or the whole sequence exceeding
/// `settings.init_timeout`) is an `InitFailed`. A failing `tools/list` or
/// `resources/list` is not: the server connects with an empty list.
pub async fn spawn_server(
    config: &ServerConfig,
    settings: &ManagerSettings,
) -> Result<SpawnedServer, McpError> {
    let name = config.name.as_str();
    let (transport, mut process) = transport::spawn(config).await?;

    let client_info = ClientInfo {
        name: settings.client_name.clone(),
        version: settings.client_version.clone(),
    };
    let mut client = ProtocolClient::new(transport, client_info);

    let handshake = async {
        let init = client.initialize().await?;
        let (tools, resources) = client.discover().await;
        Ok::<_, McpError>((init, tools, resources))
    };
    let outcome = tokio::time::timeout(settings.init_timeout, handshake).await;

    let reason = match outcome {
        Ok(Ok((init, tools, resources))) => {
            tracing::info!(
                server = name,
                protocol_version = init.protocol_version.as_deref().unwrap_or("unknown"),
                tools = tools.len(),
                resources = resources.len(),
                "server initialized"
            );
            let connection = ServerConnection::start(client, process, init.server_info);
            return Ok(SpawnedServer {
                connection,
                tools,
                resources,
            });
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!(
            "initialization timed out after {}s",
            settings.init_timeout.as_secs_f64()
        ),
    };

    // Close stdin before reaping so well-behaved servers exit on EOF.
    drop(client);
    if let Err(e) = process.terminate().await {
        tracing::debug!(server = name, error = %e, "failed to terminate server after init failure");
    }

    let stderr_ctx = process.collect_stderr().await;
    if !stderr_ctx.is_empty() {
        tracing::warn!(
            server = name,
            stderr = %stderr_ctx,
            "server stderr captured on failure"
        );
    }

    Err(McpError::InitFailed {
        name: name.to_string(),
        reason: format!("{reason}{}", format_stderr_suffix(&stderr_ctx)),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
