//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with MCP server child processes:
//! - Spawning the process with piped stdio
//! - Writing one JSON message per line to stdin
//! - Reading one JSON message per line from stdout
//! - Draining stderr into a bounded tail for diagnostics
//! - Terminating the process (stdin close → SIGTERM → SIGKILL)

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::types::ServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long to wait after spawn before checking for an immediate exit.
const SPAWN_SETTLE: Duration = Duration::from_millis(50);

/// Grace period after stdin is closed before SIGTERM is sent.
const STDIN_CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of stderr lines retained per server.
const STDERR_TAIL_LINES: usize = 50;

/// How long to wait for buffered stderr after the process exits.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Upper bound on stderr text attached to error messages.
const STDERR_SNIPPET_CHARS: usize = 2000;

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a server process described by `config`.
///
/// The child inherits the parent environment with `config.env` layered on
/// top, and runs in `config.working_directory` when one is set.
pub async fn spawn(config: &ServerConfig) -> Result<(StdioTransport, ServerProcess), McpError> {
    let name = config.name.as_str();
    let program = config.program().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "empty command".into(),
    })?;

    let mut cmd = Command::new(program);
    cmd.args(config.program_args());
    cmd.envs(&config.env);

    if let Some(dir) = config.working_directory.as_deref() {
        if !std::path::Path::new(dir).is_dir() {
            return Err(McpError::SpawnFailed {
                name: name.to_string(),
                reason: format!("working directory '{dir}' does not exist"),
            });
        }
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{program}: {e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    let stderr = StderrTail::default();
    let stderr_drain = child
        .stderr
        .take()
        .map(|handle| drain_stderr(name.to_string(), handle, stderr.clone()));

    let mut process = ServerProcess {
        name: name.to_string(),
        child,
        stderr,
        stderr_drain,
    };

    tokio::time::sleep(SPAWN_SETTLE).await;
    if let Ok(Some(status)) = process.child.try_wait() {
        let suffix = format_stderr_suffix(&process.collect_stderr().await);
        return Err(McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("process exited immediately ({status}){suffix}"),
        });
    }

    tracing::debug!(
        server = name,
        pid = process.id(),
        command = %config.command_line(),
        "spawned MCP server process"
    );

    Ok((StdioTransport::new(name, stdin, stdout), process))
}

fn drain_stderr(server: String, stderr: ChildStderr, tail: StderrTail) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(server = %server, line = %line, "server stderr");
                    tail.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(server = %server, error = %e, "stderr read failed");
                    break;
                }
            }
        }
    })
}

/// Format a stderr suffix for error messages (empty string if no stderr).
pub(crate) fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Stderr Tail ─────────────────────────────────────────────────────────────

/// Last few lines a server wrote to stderr.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    /// Retained lines joined with newlines, capped for log readability.
    pub fn snapshot(&self) -> String {
        let mut text = match self.lines.lock() {
            Ok(lines) => lines.iter().cloned().collect::<Vec<_>>().join("\n"),
            Err(_) => return String::new(),
        };
        if text.len() > STDERR_SNIPPET_CHARS {
            let cut = text
                .char_indices()
                .map(|(i, _)| i)
                .take_while(|i| *i <= STDERR_SNIPPET_CHARS)
                .last()
                .unwrap_or(0);
            text.truncate(cut);
            text.push_str("...(truncated)");
        }
        text
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Line-delimited JSON channel over a child process's stdin/stdout.
pub struct StdioTransport {
    server_name: String,
    writer: ChildStdin,
    reader: BufReader<ChildStdout>,
    /// Survives an interrupted read so no bytes are lost on timeout.
    line_buf: Vec<u8>,
}

impl StdioTransport {
    pub fn new(server_name: &str, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            server_name: server_name.to_string(),
            writer: stdin,
            reader: BufReader::new(stdout),
            line_buf: Vec::new(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Serialize `message` as one line of JSON, write it, and flush.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), McpError> {
        let mut json = serde_json::to_string(message).map_err(|e| McpError::ProtocolError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))?;
        Ok(())
    }

    /// Read the next non-empty line from stdout and parse it as JSON.
    ///
    /// Blank lines are skipped. EOF is a `TransportError`; a line that is not
    /// JSON is a `ProtocolError` and the stream stays usable.
    pub async fn read_message(&mut self) -> Result<Value, McpError> {
        loop {
            let bytes_read = self
                .reader
                .read_until(b'\n', &mut self.line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 && self.line_buf.is_empty() {
                return Err(self.transport_error(
                    "server stdout closed (process may have exited)".into(),
                ));
            }

            let line = std::mem::take(&mut self.line_buf);
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            return serde_json::from_str(trimmed).map_err(|e| McpError::ProtocolError {
                server: self.server_name.clone(),
                reason: format!("malformed JSON line ({e}): {}", snippet(trimmed)),
            });
        }
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }
}

fn snippet(line: &str) -> String {
    const MAX: usize = 120;
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        format!("{}...", line.chars().take(MAX).collect::<String>())
    }
}

// ─── Process ─────────────────────────────────────────────────────────────────

/// Handle on a spawned server process.
pub struct ServerProcess {
    name: String,
    child: Child,
    stderr: StderrTail,
    stderr_drain: Option<JoinHandle<()>>,
}

impl ServerProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the server process has exited.
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr.snapshot()
    }

    /// Stderr tail after the process has exited.
    ///
    /// Waits briefly for the drain task to hit EOF so lines written just
    /// before exit are included.
    pub async fn collect_stderr(&mut self) -> String {
        if self.has_exited() {
            if let Some(drain) = self.stderr_drain.take() {
                let _ = tokio::time::timeout(STDERR_DRAIN_GRACE, drain).await;
            }
        }
        self.stderr_tail()
    }

    /// Resolve once the process exits on its own. Cancel-safe.
    pub async fn wait_exit(&mut self) -> Option<std::process::ExitStatus> {
        self.child.wait().await.ok()
    }

    /// Stop the process and reap it.
    ///
    /// Callers drop the `StdioTransport` first so the server sees EOF on
    /// stdin. Escalates to SIGTERM, then SIGKILL. Calling this on a process
    /// that already exited is a no-op.
    pub async fn terminate(&mut self) -> Result<(), McpError> {
        if self.has_exited() {
            return Ok(());
        }

        if let Ok(Ok(status)) = tokio::time::timeout(STDIN_CLOSE_GRACE, self.child.wait()).await {
            tracing::debug!(server = %self.name, %status, "server exited after stdin close");
            return Ok(());
        }

        #[cfg(unix)]
        self.send_sigterm();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(McpError::TransportError {
                server: self.name.clone(),
                reason: format!("failed to wait for process: {e}"),
            }),
            Err(_) => {
                tracing::warn!(
                    server = %self.name,
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "server ignored SIGTERM, killing"
                );
                self.child.kill().await.map_err(|e| McpError::TransportError {
                    server: self.name.clone(),
                    reason: format!("failed to kill process: {e}"),
                })
            }
        }
    }

    #[cfg(unix)]
    fn send_sigterm(&self) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return;
        };
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            // ESRCH: already gone between try_wait and here
            tracing::debug!(server = %self.name, error = %e, "SIGTERM failed");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
