//! Aggregate tool/resource catalog across connected servers.
//!
//! Tools are keyed by the name they are exposed under. The first server to
//! register a name owns it; a later server's tool with the same name is
//! exposed as `"server.tool"`. Qualified `"server.tool"` lookups resolve for
//! every tool regardless of how it is exposed.

use std::collections::BTreeMap;

use super::types::{Resource, Tool};

/// Merged view of every connected server's tools and resources.
#[derive(Debug, Default)]
pub struct Catalog {
    tools: BTreeMap<String, Tool>,
    resources: Vec<Resource>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one server's discovered capabilities.
    ///
    /// Returns the exposed names of the tools that were registered.
    pub fn merge(&mut self, server: &str, tools: Vec<Tool>, resources: Vec<Resource>) -> Vec<String> {
        let mut registered = Vec::with_capacity(tools.len());

        for mut tool in tools {
            if let Some(owner) = self.tools.get(&tool.name) {
                let qualified = format!("{server}.{}", tool.remote_name);
                if self.tools.contains_key(&qualified) {
                    tracing::warn!(
                        server,
                        tool = %tool.remote_name,
                        "duplicate tool name on the same server, skipping"
                    );
                    continue;
                }
                tracing::warn!(
                    server,
                    tool = %tool.name,
                    owner = %owner.server_name,
                    exposed_as = %qualified,
                    "tool name collision"
                );
                tool.name = qualified;
            }
            registered.push(tool.name.clone());
            self.tools.insert(tool.name.clone(), tool);
        }

        for resource in resources {
            if let Some(existing) = self.resources.iter().find(|r| r.uri == resource.uri) {
                tracing::warn!(
                    server,
                    uri = %resource.uri,
                    owner = %existing.server_name,
                    "resource uri already registered, skipping"
                );
                continue;
            }
            self.resources.push(resource);
        }

        registered
    }

    /// Drop everything `server` contributed. Resources are also matched by a
    /// `"server://"` uri prefix. Returns `(tools, resources)` removed.
    pub fn purge(&mut self, server: &str) -> (usize, usize) {
        let tools_before = self.tools.len();
        self.tools.retain(|_, tool| tool.server_name != server);

        let scheme = format!("{server}://");
        let resources_before = self.resources.len();
        self.resources
            .retain(|r| r.server_name != server && !r.uri.starts_with(&scheme));

        (
            tools_before - self.tools.len(),
            resources_before - self.resources.len(),
        )
    }

    /// Look a tool up by exposed name, falling back to `"server.tool"`.
    pub fn resolve_tool(&self, name: &str) -> Option<&Tool> {
        if let Some(tool) = self.tools.get(name) {
            return Some(tool);
        }
        self.tools.values().find(|tool| {
            name.len() == tool.server_name.len() + 1 + tool.remote_name.len()
                && name.starts_with(tool.server_name.as_str())
                && name[tool.server_name.len()..].starts_with('.')
                && name.ends_with(tool.remote_name.as_str())
        })
    }

    /// Tools sorted by exposed name, optionally limited to one server.
    pub fn tools(&self, server: Option<&str>) -> Vec<Tool> {
        self.tools
            .values()
            .filter(|tool| server.map_or(true, |s| tool.server_name == s))
            .cloned()
            .collect()
    }

    pub fn resources(&self, server: Option<&str>) -> Vec<Resource> {
        self.resources
            .iter()
            .filter(|r| server.map_or(true, |s| r.server_name == s))
            .cloned()
            .collect()
    }

    /// Server that advertised `uri`, if any.
    pub fn resource_owner(&self, uri: &str) -> Option<&str> {
        self.resources
            .iter()
            .find(|r| r.uri == uri)
            .map(|r| r.server_name.as_str())
    }

    /// Case-insensitive substring match on name and description.
    pub fn search_tools(&self, query: &str) -> Vec<Tool> {
        let query = query.to_lowercase();
        self.tools
            .values()
            .filter(|tool| {
                tool.name.to_lowercase().contains(&query)
                    || tool.description.to_lowercase().contains(&query)
            })
            .cloned()
            .collect()
    }

    pub fn tool_count(&self, server: &str) -> usize {
        self.tools.values().filter(|t| t.server_name == server).count()
    }

    pub fn resource_count(&self, server: &str) -> usize {
        self.resources.iter().filter(|r| r.server_name == server).count()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
