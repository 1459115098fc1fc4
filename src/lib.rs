pub mod cli;
pub mod mcp_client;
pub mod servers;

use std::path::{Path, PathBuf};

/// Return the platform-standard data directory for OrionAI MCP (logs).
///
/// - macOS: `~/Library/Application Support/orionai-mcp/`
/// - Windows: `{FOLDERID_RoamingAppData}\orionai-mcp\`
/// - Linux: `$XDG_DATA_HOME/orionai-mcp/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.orionai-mcp/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("orionai-mcp");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".orionai-mcp")
}

/// Return the configuration directory.
///
/// An explicit override (flag or `ORIONAI_MCP_CONFIG_DIR`) wins; otherwise
/// the platform config directory, with the same home fallback as `data_dir`.
pub fn config_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("orionai-mcp");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".orionai-mcp")
}

/// Path of the persisted server registry inside a config directory.
pub fn servers_file(config_dir: &Path) -> PathBuf {
    config_dir.join("mcp").join("servers.json")
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// `<data_dir>/orionai-mcp.log`, rotated on startup.
    File,
    /// Standard error. Required when stdout carries the protocol.
    Stderr,
}

/// Initialize the tracing subscriber.
///
/// With `LogTarget::File`, on each startup:
/// 1. Rotates existing logs (orionai-mcp.log → .1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the log path for discoverability.
///
/// Never fails: if the log file cannot be opened, logs go to stderr.
pub fn init_tracing(target: LogTarget) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("orionai_mcp=info,warn"));

    let log_file = match target {
        LogTarget::File => open_log_file(),
        LogTarget::Stderr => None,
    };

    let Some((log_path, file)) = log_file else {
        let _ = fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
        return;
    };

    let installed = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            log_file = %log_path.display(),
            pid = std::process::id(),
            "=== orionai-mcp starting ==="
        );
    }
}

fn open_log_file() -> Option<(PathBuf, std::fs::File)> {
    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir).ok()?;

    let log_path = log_dir.join("orionai-mcp.log");
    rotate_log_file(&log_path, 3);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok()?;
    Some((log_path, file))
}

/// Rotate log files: `orionai-mcp.log` → `.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Each log line is on disk immediately, so a crash or a killed CLI run
/// does not lose the tail of the log.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
