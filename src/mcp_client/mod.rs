//! MCP Client: JSON-RPC over stdio transport for MCP server management.
//!
//! This module handles:
//! - Spawning MCP server child processes and talking JSON-RPC 2.0 over stdio
//! - The initialize handshake and tool/resource discovery
//! - One serialized connection actor per server
//! - Aggregating tools and resources across servers, with collision handling
//! - Persisting server configurations
//! - Tool categorization, validation and LLM-facing summaries

pub mod catalog;
pub mod config_store;
pub mod connection;
pub mod errors;
pub mod lifecycle;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod templates;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config_store::ConfigStore;
pub use errors::McpError;
pub use manager::{ConnectionState, ManagerSettings, McpManager, ServerStatus};
pub use registry::{ToolEntry, ToolRegistry, ToolsSummary};
pub use templates::{ServerTemplate, TemplateCatalog, TemplateKind};
pub use types::{Resource, ServerConfig, Tool, ToolResult};
