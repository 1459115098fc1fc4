//! Known MCP server recipes.
//!
//! A read-only catalog that turns a template name into a runnable
//! `ServerConfig`. Packaged servers (pip / npm / docker) are only described
//! here: installing them is up to the user, guided by
//! `install_instructions`.

use serde::Serialize;

use super::errors::McpError;
use super::types::ServerConfig;

// ─── Platform Helpers ────────────────────────────────────────────────────────

/// Platform-correct npx command.
///
/// Windows requires `npx.cmd` because `npx` is a batch script;
/// `Command::new("npx")` fails without the extension on Windows.
fn default_npx_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "npx.cmd"
    } else {
        "npx"
    }
}

/// Platform-correct Python command.
///
/// macOS 12.3+ removed the `python` symlink; only `python3` exists.
/// Windows installs Python as `python.exe` via the official installer.
fn default_python_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    }
}

/// Path of the running binary, for servers it serves itself.
///
/// Falls back to a bare name resolved through `PATH`.
pub fn self_executable() -> String {
    std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string())
}

// ─── Templates ───────────────────────────────────────────────────────────────

/// How a template's server is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    /// Served by this binary (`serve <name>`).
    Builtin,
    Pip,
    Npm,
    Docker,
}

/// Recipe for one kind of MCP server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub kind: TemplateKind,
    /// Python module, npm package, docker image, or built-in server name.
    pub package: &'static str,
    pub requirements: Vec<&'static str>,
    pub install_instructions: String,
}

impl ServerTemplate {
    fn builtin(name: &'static str, server: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            category: "Built-in",
            kind: TemplateKind::Builtin,
            package: server,
            requirements: Vec::new(),
            install_instructions: "Built-in server - no installation needed".to_string(),
        }
    }

    fn pip(
        name: &'static str,
        category: &'static str,
        module: &'static str,
        requirement: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            category,
            kind: TemplateKind::Pip,
            package: module,
            requirements: vec![requirement],
            install_instructions: format!("pip install {requirement}"),
        }
    }

    fn npm(
        name: &'static str,
        category: &'static str,
        package: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            category,
            kind: TemplateKind::Npm,
            package,
            requirements: vec!["node"],
            install_instructions: format!("Requires Node.js; fetched on first run by npx ({package})"),
        }
    }

    fn docker(
        name: &'static str,
        category: &'static str,
        image: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            category,
            kind: TemplateKind::Docker,
            package: image,
            requirements: vec!["docker"],
            install_instructions: format!("docker pull {image}"),
        }
    }

    /// Executable plus fixed arguments for this template on this platform.
    pub fn command(&self) -> Vec<String> {
        match self.kind {
            TemplateKind::Builtin => vec![self_executable(), "serve".into(), self.package.into()],
            TemplateKind::Pip => vec![
                default_python_command().into(),
                "-m".into(),
                self.package.into(),
            ],
            TemplateKind::Npm => vec![
                default_npx_command().into(),
                "-y".into(),
                self.package.into(),
            ],
            TemplateKind::Docker => vec![
                "docker".into(),
                "run".into(),
                "-i".into(),
                "--rm".into(),
                self.package.into(),
            ],
        }
    }

    /// Server name used when the caller does not pick one.
    pub fn default_server_name(&self) -> &'static str {
        self.name.strip_suffix("-builtin").unwrap_or(self.name)
    }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// The set of known templates.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<ServerTemplate>,
}

impl TemplateCatalog {
    /// Templates shipped with the crate.
    pub fn builtin() -> Self {
        let templates = vec![
            ServerTemplate::builtin(
                "calculator-builtin",
                "calculator",
                "Built-in calculator with basic mathematical operations",
            ),
            ServerTemplate::builtin(
                "datetime-builtin",
                "datetime",
                "Built-in date and time operations",
            ),
            ServerTemplate::pip(
                "filesystem",
                "File Operations",
                "mcp_server_filesystem",
                "mcp-server-filesystem",
                "Provides file system operations like reading, writing, and listing files",
            ),
            ServerTemplate::pip(
                "git",
                "File Operations",
                "mcp_server_git",
                "mcp-server-git",
                "Git repository operations and version control",
            ),
            ServerTemplate::pip(
                "database",
                "Data & Database",
                "mcp_server_database",
                "mcp-server-database",
                "Database operations and SQL queries",
            ),
            ServerTemplate::pip(
                "json",
                "Data & Database",
                "mcp_server_json",
                "mcp-server-json",
                "JSON processing and manipulation",
            ),
            ServerTemplate::pip(
                "web-search",
                "Web & Network",
                "mcp_server_web_search",
                "mcp-server-web-search",
                "Web search capabilities using various search engines",
            ),
            ServerTemplate::pip(
                "http",
                "Web & Network",
                "mcp_server_http",
                "mcp-server-http",
                "HTTP requests and API interactions",
            ),
            ServerTemplate::pip(
                "weather",
                "Weather & Information",
                "mcp_server_weather",
                "mcp-server-weather",
                "Get weather information and forecasts",
            ),
            ServerTemplate::pip(
                "system",
                "System & Utilities",
                "mcp_server_system",
                "mcp-server-system",
                "System information and monitoring",
            ),
            ServerTemplate::pip(
                "memory",
                "Development",
                "mcp_server_memory",
                "mcp-server-memory",
                "Persistent memory and note-taking",
            ),
            ServerTemplate::pip(
                "code",
                "Development",
                "mcp_server_code",
                "mcp-server-code",
                "Safe code execution in sandboxed environment",
            ),
            ServerTemplate::npm(
                "filesystem-npm",
                "File Operations",
                "@modelcontextprotocol/server-filesystem",
                "Reference filesystem server (pass allowed directories as extra args)",
            ),
            ServerTemplate::npm(
                "memory-npm",
                "Development",
                "@modelcontextprotocol/server-memory",
                "Knowledge-graph memory server",
            ),
            ServerTemplate::docker(
                "fetch-docker",
                "Web & Network",
                "mcp/fetch",
                "Fetch web pages and convert them to markdown",
            ),
        ];
        Self { templates }
    }

    pub fn list(&self) -> &[ServerTemplate] {
        &self.templates
    }

    pub fn get(&self, name: &str) -> Option<&ServerTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Case-insensitive match on name or description.
    pub fn search(&self, query: &str) -> Vec<&ServerTemplate> {
        let query = query.to_lowercase();
        self.templates
            .iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&query)
                    || t.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Category → template names, in catalog order.
    pub fn categories(&self) -> Vec<(&'static str, Vec<&'static str>)> {
        let mut categories: Vec<(&'static str, Vec<&'static str>)> = Vec::new();
        for template in &self.templates {
            match categories.iter_mut().find(|(c, _)| *c == template.category) {
                Some((_, names)) => names.push(template.name),
                None => categories.push((template.category, vec![template.name])),
            }
        }
        categories
    }

    /// Build a launch configuration from a template.
    pub fn to_config(
        &self,
        template_name: &str,
        server_name: Option<&str>,
    ) -> Result<ServerConfig, McpError> {
        let template = self.get(template_name).ok_or_else(|| McpError::ConfigError {
            reason: format!("template '{template_name}' not found"),
        })?;
        let name = server_name.unwrap_or(template.default_server_name());
        Ok(ServerConfig::new(name, template.command()).with_description(template.description))
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
