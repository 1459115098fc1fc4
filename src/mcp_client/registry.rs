//! Tool registry: categorized, validated view over the manager's catalog.
//!
//! Provides:
//! - Keyword-based categorization of tool names
//! - Example-usage strings for prompts and help output
//! - Advisory argument validation against a tool's input schema
//! - Search, summaries, and serialization into the LLM's tool format
//!
//! Nothing is cached: every read re-derives from the live catalog, so the
//! registry never disagrees with the manager about which tools exist.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::errors::McpError;
use super::manager::McpManager;
use super::types::{Tool, ToolResult};

// ─── Categories ──────────────────────────────────────────────────────────────

/// Category → tool names, checked in order as substrings of the tool name.
const CATEGORY_TOOLS: &[(&str, &[&str])] = &[
    ("filesystem", &["read_file", "write_file", "list_directory", "file_info"]),
    ("git", &["git_status", "git_log", "git_diff", "git_commit"]),
    ("web", &["search_web", "fetch_url", "http_get", "http_post"]),
    ("calculation", &["calculate", "math_eval", "add", "multiply"]),
    ("datetime", &["current_time", "format_date", "timezone_convert"]),
    ("weather", &["get_weather", "weather_forecast"]),
    ("system", &["system_info", "cpu_usage", "memory_usage"]),
    ("database", &["query_db", "execute_sql"]),
    ("json", &["parse_json", "format_json", "json_path"]),
    ("memory", &["store_note", "retrieve_note", "list_notes"]),
    ("code", &["execute_python", "lint_code", "format_code"]),
];

/// Fallback keyword groups, tried only when no explicit tool name matched.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("filesystem", &["file", "read", "write", "directory"]),
    ("git", &["git", "commit", "branch"]),
    ("web", &["web", "http", "search", "url"]),
    ("calculation", &["calc", "math", "add", "multiply"]),
    ("datetime", &["time", "date", "timezone"]),
    ("weather", &["weather", "forecast", "climate"]),
    ("system", &["system", "cpu", "memory", "disk"]),
    ("database", &["database", "sql", "query"]),
    ("json", &["json", "parse", "format"]),
    ("memory", &["note", "memory", "store", "remember"]),
    ("code", &["code", "execute", "run", "python"]),
];

/// Category for a tool name. First match wins; `"general"` otherwise.
pub fn categorize(tool_name: &str) -> &'static str {
    let lower = tool_name.to_lowercase();

    let explicit = CATEGORY_TOOLS
        .iter()
        .find(|(_, names)| names.iter().any(|n| lower.contains(n)));
    if let Some((category, _)) = explicit {
        return *category;
    }

    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or("general")
}

// ─── Example Usage ───────────────────────────────────────────────────────────

/// Hand-written examples for well-known tools, keyed by server-side name.
const CURATED_EXAMPLES: &[(&str, &str)] = &[
    ("read_file", "Read content of a file: read_file(path='/path/to/file.txt')"),
    (
        "write_file",
        "Write content to file: write_file(path='/path/to/file.txt', content='Hello World')",
    ),
    ("list_directory", "List files in directory: list_directory(path='/path/to/directory')"),
    ("get_weather", "Get current weather: get_weather(location='New York')"),
    ("calculate", "Perform calculation: calculate(expression='2 + 2 * 3')"),
    ("current_time", "Get current time: current_time(timezone='UTC')"),
    ("search_web", "Search the web: search_web(query='Rust programming')"),
    ("git_status", "Check git status: git_status(repository_path='/path/to/repo')"),
    ("execute_python", "Execute Python code: execute_python(code='print(\"Hello World\")')"),
];

/// How many schema properties a synthesized example shows.
const EXAMPLE_MAX_ARGS: usize = 3;

/// One-line usage example: curated if known, otherwise built from the schema.
pub fn example_usage(tool: &Tool) -> String {
    if let Some((_, example)) = CURATED_EXAMPLES
        .iter()
        .find(|(name, _)| *name == tool.remote_name)
    {
        return (*example).to_string();
    }

    let args: Vec<String> = tool
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .take(EXAMPLE_MAX_ARGS)
                .map(|(name, prop)| {
                    let value = match prop.get("type").and_then(Value::as_str).unwrap_or("string") {
                        "string" => "'example_value'",
                        "integer" => "42",
                        "number" => "3.14",
                        "boolean" => "true",
                        "array" => "['item1', 'item2']",
                        _ => "value",
                    };
                    format!("{name}={value}")
                })
                .collect()
        })
        .unwrap_or_default();

    format!("{}({})", tool.name, args.join(", "))
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Structural check of `arguments` against a JSON Schema object.
///
/// Required fields must be present and top-level fields with a declared
/// primitive type must match it. Anything deeper is left to the server.
pub fn check_schema(schema: &Value, arguments: &Value) -> Result<(), String> {
    let empty = serde_json::Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => return Err(format!("arguments must be a JSON object, got {}", json_type(other))),
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(format!("missing required field: '{field}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (field, value) in args {
            let Some(expected) = properties
                .get(field)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(format!(
                    "field '{field}' should be {expected}, got {}",
                    json_type(value)
                ));
            }
        }
    }

    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// A catalog tool with its derived metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub server_name: String,
    pub input_schema: Value,
    pub category: &'static str,
    pub example_usage: String,
}

impl From<Tool> for ToolEntry {
    fn from(tool: Tool) -> Self {
        Self {
            category: categorize(&tool.remote_name),
            example_usage: example_usage(&tool),
            name: tool.name,
            description: tool.description,
            server_name: tool.server_name,
            input_schema: tool.input_schema,
        }
    }
}

/// Totals for display and diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolsSummary {
    pub total_tools: usize,
    pub categories: BTreeMap<String, Vec<String>>,
    pub servers: Vec<String>,
}

impl ToolsSummary {
    fn from_entries(entries: &[ToolEntry]) -> Self {
        let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut servers: Vec<String> = Vec::new();
        for entry in entries {
            categories
                .entry(entry.category.to_string())
                .or_default()
                .push(entry.name.clone());
            if !servers.contains(&entry.server_name) {
                servers.push(entry.server_name.clone());
            }
        }
        servers.sort();
        Self {
            total_tools: entries.len(),
            categories,
            servers,
        }
    }
}

fn capability_text(entries: &[ToolEntry], summary: &ToolsSummary) -> String {
    if entries.is_empty() {
        return "No MCP tools currently available.".to_string();
    }

    let server_parts: Vec<String> = summary
        .servers
        .iter()
        .map(|server| {
            let count = entries.iter().filter(|e| &e.server_name == server).count();
            format!("{server} ({count})")
        })
        .collect();
    let category_parts: Vec<String> = summary
        .categories
        .iter()
        .map(|(category, names)| format!("{category}: {}", names.join(", ")))
        .collect();

    format!(
        "Available capabilities ({} tools across {} servers): {}.\nTools by category: {}.",
        summary.total_tools,
        summary.servers.len(),
        server_parts.join(", "),
        category_parts.join("; "),
    )
}

fn openai_tool(tool: &Tool) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Always-fresh tool view over an `McpManager`.
#[derive(Clone)]
pub struct ToolRegistry {
    manager: Arc<McpManager>,
}

impl ToolRegistry {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<McpManager> {
        &self.manager
    }

    async fn entries(&self) -> Vec<ToolEntry> {
        self.manager
            .available_tools(None)
            .await
            .into_iter()
            .map(ToolEntry::from)
            .collect()
    }

    /// All tools, or only those in `category`.
    pub async fn tools(&self, category: Option<&str>) -> Vec<ToolEntry> {
        let entries = self.entries().await;
        match category {
            Some(category) => entries
                .into_iter()
                .filter(|e| e.category == category)
                .collect(),
            None => entries,
        }
    }

    /// Categories that currently have at least one tool, sorted.
    pub async fn categories(&self) -> Vec<String> {
        self.summary().await.categories.into_keys().collect()
    }

    /// Case-insensitive match on name, description, or category.
    pub async fn search(&self, query: &str) -> Vec<ToolEntry> {
        let query = query.to_lowercase();
        self.entries()
            .await
            .into_iter()
            .filter(|e| {
                e.name.to_lowercase().contains(&query)
                    || e.description.to_lowercase().contains(&query)
                    || e.category.contains(&query)
            })
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<ToolEntry> {
        self.manager.tool_info(name).await.map(ToolEntry::from)
    }

    pub async fn schema(&self, name: &str) -> Option<Value> {
        self.manager.tool_info(name).await.map(|t| t.input_schema)
    }

    /// Whether `arguments` pass the tool's schema check. Unknown tools fail.
    pub async fn validate_arguments(&self, name: &str, arguments: &Value) -> bool {
        self.check_arguments(name, arguments).await.is_ok()
    }

    /// Like `validate_arguments`, with the reason on failure.
    pub async fn check_arguments(&self, name: &str, arguments: &Value) -> Result<(), McpError> {
        let tool = self
            .manager
            .tool_info(name)
            .await
            .ok_or_else(|| McpError::UnknownTool {
                name: name.to_string(),
            })?;
        check_schema(&tool.input_schema, arguments).map_err(|reason| McpError::InvalidArguments {
            tool: tool.name,
            reason,
        })
    }

    pub async fn summary(&self) -> ToolsSummary {
        ToolsSummary::from_entries(&self.entries().await)
    }

    /// Passthrough to the manager. Validation is the caller's choice.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        self.manager.call_tool(name, arguments).await
    }

    /// Concise capability text for the LLM system prompt.
    pub async fn capability_summary(&self) -> String {
        let entries = self.entries().await;
        let summary = ToolsSummary::from_entries(&entries);
        capability_text(&entries, &summary)
    }

    /// Serialize all tools into OpenAI function-calling format.
    pub async fn to_openai_tools(&self) -> Vec<Value> {
        self.manager
            .available_tools(None)
            .await
            .iter()
            .map(openai_tool)
            .collect()
    }

    /// Up to `max_results` tool names close to `name`, best first.
    pub async fn suggest(&self, name: &str, max_results: usize) -> Vec<String> {
        let names: Vec<String> = self
            .manager
            .available_tools(None)
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        find_similar(&names, name, max_results)
    }
}

// ─── Edit Distance ───────────────────────────────────────────────────────────

/// Names scoring above a similarity floor, ranked best first.
fn find_similar(names: &[String], query: &str, max_results: usize) -> Vec<String> {
    let mut scored: Vec<(&String, f64)> = names
        .iter()
        .map(|name| (name, similarity(query, name)))
        .filter(|(_, score)| *score > 0.3)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(max_results);
    scored.into_iter().map(|(name, _)| name.clone()).collect()
}

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Normalized similarity (0.0 = completely different, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
