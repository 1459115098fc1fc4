//! Per-server connection actor.
//!
//! Each connected server gets one tokio task that owns its protocol client
//! and process. Callers hold a cloneable-by-Arc `ServerConnection` handle and
//! submit requests over an mpsc mailbox; replies come back on oneshot
//! channels. The mailbox is FIFO, so calls to one server are strictly
//! serialized while different servers run in parallel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::errors::McpError;
use super::protocol::ProtocolClient;
use super::transport::ServerProcess;
use super::types::ServerInfo;

/// Requests that may wait in a server's mailbox.
const MAILBOX_CAPACITY: usize = 64;

// ─── Requests ────────────────────────────────────────────────────────────────

enum Operation {
    CallTool { name: String, arguments: Value },
    ReadResource { uri: String },
}

impl Operation {
    fn method(&self) -> &'static str {
        match self {
            Operation::CallTool { .. } => "tools/call",
            Operation::ReadResource { .. } => "resources/read",
        }
    }

    async fn dispatch(self, client: &mut ProtocolClient) -> Result<Value, McpError> {
        match self {
            Operation::CallTool { name, arguments } => client.call_tool(&name, arguments).await,
            Operation::ReadResource { uri } => client.read_resource(&uri).await,
        }
    }
}

struct Request {
    operation: Operation,
    /// Fixed at submission, so time spent queued counts against the call.
    deadline: Instant,
    timeout: Duration,
    reply: oneshot::Sender<Result<Value, McpError>>,
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Handle on one live server connection.
pub struct ServerConnection {
    name: String,
    mailbox: mpsc::Sender<Request>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    /// Flips to true when the actor stops.
    closed: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    server_info: Option<ServerInfo>,
    connected_at: DateTime<Utc>,
}

impl ServerConnection {
    /// Start the actor for an initialized client and its process.
    pub fn start(
        client: ProtocolClient,
        process: ServerProcess,
        server_info: Option<ServerInfo>,
    ) -> Self {
        let name = client.server_name().to_string();
        let (mailbox, inbox) = mpsc::channel(MAILBOX_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (closed_tx, closed) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));

        let actor = Actor {
            client,
            process,
            inbox,
            shutdown: shutdown_rx,
            connected: connected.clone(),
            closed: closed_tx,
        };
        let task = tokio::spawn(actor.run());

        Self {
            name,
            mailbox,
            connected,
            shutdown,
            closed,
            task: Mutex::new(Some(task)),
            server_info,
            connected_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the process exited, the pipe broke, or shutdown ran.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Resolves once the actor has stopped, whatever the cause.
    ///
    /// The future does not borrow the handle.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut closed = self.closed.clone();
        async move {
            while !*closed.borrow_and_update() {
                if closed.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// `tools/call` with the server-side tool name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let operation = Operation::CallTool {
            name: name.to_string(),
            arguments,
        };
        self.submit(operation, timeout).await
    }

    /// `resources/read` for one URI.
    pub async fn read_resource(&self, uri: &str, timeout: Duration) -> Result<Value, McpError> {
        let operation = Operation::ReadResource {
            uri: uri.to_string(),
        };
        self.submit(operation, timeout).await
    }

    async fn submit(&self, operation: Operation, timeout: Duration) -> Result<Value, McpError> {
        let (reply, response) = oneshot::channel();
        let request = Request {
            operation,
            deadline: Instant::now() + timeout,
            timeout,
            reply,
        };

        self.mailbox
            .send(request)
            .await
            .map_err(|_| self.closed_error("connection closed"))?;

        // A dropped reply sender means the actor exited with this request queued.
        response
            .await
            .map_err(|_| self.closed_error("connection closed before the server replied"))?
    }

    fn closed_error(&self, reason: &str) -> McpError {
        McpError::TransportError {
            server: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Stop the actor, fail whatever is queued, and terminate the process.
    ///
    /// Safe to call more than once and on a connection that already died.
    pub async fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(server = %self.name, error = %e, "connection task failed");
            }
        }
    }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

struct Actor {
    client: ProtocolClient,
    process: ServerProcess,
    inbox: mpsc::Receiver<Request>,
    shutdown: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
    closed: watch::Sender<bool>,
}

impl Actor {
    async fn run(mut self) {
        let name = self.client.server_name().to_string();

        loop {
            let request = tokio::select! {
                request = self.inbox.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
                _ = self.shutdown.changed() => break,
                status = self.process.wait_exit() => {
                    tracing::warn!(
                        server = %name,
                        status = ?status,
                        stderr = %self.process.stderr_tail(),
                        "server process exited"
                    );
                    break;
                }
            };

            if request.reply.is_closed() {
                continue;
            }

            let Request {
                operation,
                deadline,
                timeout,
                reply,
            } = request;
            let (outcome, fatal) = self.handle(operation, deadline, timeout).await;
            if fatal {
                self.connected.store(false, Ordering::SeqCst);
            }
            let _ = reply.send(outcome);
            if fatal {
                break;
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        let Actor {
            client,
            mut process,
            inbox,
            closed,
            ..
        } = self;
        // Queued reply senders are dropped with the receiver.
        drop(inbox);
        drop(client.into_transport());
        if let Err(e) = process.terminate().await {
            tracing::warn!(server = %name, error = %e, "failed to terminate server");
        }
        closed.send_replace(true);
        tracing::debug!(server = %name, "connection closed");
    }

    /// Run one request under its deadline. The flag says whether the
    /// connection must be torn down afterwards.
    async fn handle(
        &mut self,
        operation: Operation,
        deadline: Instant,
        timeout: Duration,
    ) -> (Result<Value, McpError>, bool) {
        let method = operation.method();
        let server = self.client.server_name().to_string();

        let result = tokio::select! {
            result = tokio::time::timeout_at(deadline, operation.dispatch(&mut self.client)) => result,
            _ = self.shutdown.changed() => {
                let err = McpError::TransportError {
                    server,
                    reason: "connection closed during call".into(),
                };
                return (Err(err), true);
            }
        };

        match result {
            Ok(Err(e)) if e.is_connection_loss() => {
                tracing::warn!(server = %server, error = %e, "connection lost");
                (Err(e), true)
            }
            Ok(outcome) => (outcome, false),
            Err(_) => {
                tracing::warn!(
                    server = %server,
                    method,
                    timeout_ms = millis(timeout),
                    "request timed out"
                );
                // A request cut off mid-write leaves a partial line on the pipe.
                let fatal = self.client.is_write_interrupted();
                let err = McpError::Timeout {
                    server,
                    method: method.to_string(),
                    timeout_ms: millis(timeout),
                };
                (Err(err), fatal)
            }
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
