//! Command-line interface parsing and handling.
//!
//! Every subcommand except `serve` opens the persisted server registry,
//! connects what it needs, runs one operation, and shuts the servers down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::mcp_client::{
    ConfigStore, ManagerSettings, McpError, McpManager, ServerConfig, TemplateCatalog,
    ToolRegistry,
};
use crate::servers::BuiltinServer;
use crate::LogTarget;

/// Template registered when the server registry is empty.
const DEFAULT_TEMPLATE: &str = "calculator-builtin";

#[derive(Parser)]
#[command(name = "orionai-mcp", version)]
#[command(about = "Manage MCP servers and call their tools over stdio JSON-RPC")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory (server registry lives in `<dir>/mcp/servers.json`)
    #[arg(long, global = true, env = "ORIONAI_MCP_CONFIG_DIR", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Per-call timeout in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers
    List,
    /// Register a new server
    Add {
        /// Unique server name
        name: String,
        /// Human-readable description
        #[arg(short, long)]
        description: Option<String>,
        /// Environment variable for the server process (KEY=VALUE, repeatable)
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// Working directory for the server process
        #[arg(long)]
        cwd: Option<String>,
        /// Executable and its arguments
        #[arg(last = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
    /// Remove a server from the registry
    Remove { name: String },
    /// Connect every server and show its state
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List tools across all connected servers
    Tools {
        /// Only tools in this category
        #[arg(short, long)]
        category: Option<String>,
        /// Print OpenAI function-calling definitions
        #[arg(long)]
        openai: bool,
    },
    /// Search tools by name, description or category
    Search { query: String },
    /// Call a tool with JSON arguments
    Call {
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
        /// Skip the schema check before calling
        #[arg(long)]
        no_validate: bool,
    },
    /// Read a resource by URI
    Read { uri: String },
    /// List known server templates
    Templates {
        /// Filter by name or description
        query: Option<String>,
    },
    /// Register a server from a template
    InstallTemplate {
        template: String,
        /// Server name (defaults to the template's)
        #[arg(long)]
        name: Option<String>,
    },
    /// Run a built-in MCP server on stdio
    Serve {
        #[arg(value_enum)]
        server: BuiltinServer,
    },
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<()> {
    run_with(Args::parse()).await
}

pub async fn run_with(args: Args) -> Result<()> {
    // stdout carries the protocol in serve mode
    let log_target = if args.log_stderr || matches!(args.command, Commands::Serve { .. }) {
        LogTarget::Stderr
    } else {
        LogTarget::File
    };
    crate::init_tracing(log_target);

    if let Commands::Serve { server } = args.command {
        let handler = server.handler();
        return crate::servers::serve(handler.as_ref())
            .await
            .context("built-in server failed");
    }

    let config_dir = crate::config_dir(args.config_dir.as_deref());
    let mut store = ConfigStore::load(crate::servers_file(&config_dir));
    let default = TemplateCatalog::builtin()
        .to_config(DEFAULT_TEMPLATE, None)
        .context("default template missing")?;
    store
        .bootstrap(default)
        .context("failed to register default server")?;

    let mut settings = ManagerSettings::default();
    if let Some(ms) = args.timeout_ms {
        settings.call_timeout = Duration::from_millis(ms);
    }
    let manager = Arc::new(McpManager::new(store, settings));

    let result = dispatch(&manager, args.command).await;
    manager.shutdown().await;
    result
}

async fn dispatch(manager: &Arc<McpManager>, command: Commands) -> Result<()> {
    match command {
        Commands::List => {
            let servers = manager.list_servers().await;
            if servers.is_empty() {
                println!("No servers configured.");
            }
            for config in servers {
                println!(
                    "{}\t{}\t{}",
                    config.name,
                    config.command_line(),
                    config.description.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Add {
            name,
            description,
            env,
            cwd,
            command,
        } => {
            let mut config = ServerConfig::new(&name, command);
            for (key, value) in &env {
                config = config.with_env(key, value);
            }
            if let Some(cwd) = cwd.as_deref() {
                config = config.with_working_directory(cwd);
            }
            if let Some(description) = description.as_deref() {
                config = config.with_description(description);
            }
            manager
                .add_server(config)
                .await
                .with_context(|| format!("failed to add server '{name}'"))?;
            println!("Added server '{name}'.");
        }
        Commands::Remove { name } => {
            let removed = manager
                .remove_server(&name)
                .await
                .with_context(|| format!("failed to remove server '{name}'"))?;
            if !removed {
                bail!("server '{name}' is not configured");
            }
            println!("Removed server '{name}'.");
        }
        Commands::Status { json } => {
            report_connect_failures(manager).await;
            let status = manager.get_status().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                for (name, s) in &status {
                    println!(
                        "{name}\t{}\t{} tools\t{} resources\t{}",
                        s.state, s.tools_count, s.resources_count, s.command
                    );
                }
            }
        }
        Commands::Tools { category, openai } => {
            report_connect_failures(manager).await;
            let registry = ToolRegistry::new(manager.clone());
            if openai {
                let tools = registry.to_openai_tools().await;
                println!("{}", serde_json::to_string_pretty(&tools)?);
                return Ok(());
            }
            let entries = registry.tools(category.as_deref()).await;
            if entries.is_empty() {
                println!("No tools available.");
            }
            for entry in entries {
                println!(
                    "{} [{}] ({})\n    {}\n    e.g. {}",
                    entry.name, entry.category, entry.server_name, entry.description, entry.example_usage
                );
            }
        }
        Commands::Search { query } => {
            report_connect_failures(manager).await;
            let registry = ToolRegistry::new(manager.clone());
            for entry in registry.search(&query).await {
                println!("{}\t{}\t{}", entry.name, entry.category, entry.description);
            }
        }
        Commands::Call {
            tool,
            arguments,
            no_validate,
        } => {
            let arguments: Value =
                serde_json::from_str(&arguments).context("arguments must be valid JSON")?;
            report_connect_failures(manager).await;
            let registry = ToolRegistry::new(manager.clone());

            let checked = if no_validate {
                Ok(())
            } else {
                registry.check_arguments(&tool, &arguments).await
            };
            let outcome = match checked {
                Ok(()) => registry.call_tool(&tool, arguments).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => {
                    println!("{}", result.display_text());
                    if result.is_error() {
                        bail!("tool '{tool}' reported an error");
                    }
                }
                Err(e @ McpError::UnknownTool { .. }) => {
                    let suggestions = registry.suggest(&tool, 3).await;
                    if !suggestions.is_empty() {
                        eprintln!("Did you mean: {}?", suggestions.join(", "));
                    }
                    return Err(e.into());
                }
                Err(e) => return Err(e).with_context(|| format!("call to '{tool}' failed")),
            }
        }
        Commands::Read { uri } => {
            report_connect_failures(manager).await;
            let content = manager
                .read_resource(&uri)
                .await
                .with_context(|| format!("failed to read '{uri}'"))?;
            println!("{}", serde_json::to_string_pretty(&content)?);
        }
        Commands::Templates { query } => {
            let catalog = TemplateCatalog::builtin();
            let templates = match query.as_deref() {
                Some(q) => catalog.search(q),
                None => catalog.list().iter().collect(),
            };
            for template in templates {
                println!(
                    "{}\t{}\t{}\n    {}",
                    template.name, template.category, template.description, template.install_instructions
                );
            }
        }
        Commands::InstallTemplate { template, name } => {
            let config = TemplateCatalog::builtin().to_config(&template, name.as_deref())?;
            let server_name = config.name.clone();
            manager
                .add_server(config)
                .await
                .with_context(|| format!("failed to register template '{template}'"))?;
            println!("Registered '{server_name}' from template '{template}'.");
        }
        Commands::Serve { .. } => bail!("serve does not run under a manager"),
    }
    Ok(())
}

/// Connect everything; failures are reported, not fatal.
async fn report_connect_failures(manager: &McpManager) {
    for (name, result) in manager.connect_all().await {
        if let Err(reason) = result {
            eprintln!("warning: server '{name}' failed to connect: {reason}");
        }
    }
}
