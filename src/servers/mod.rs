//! Built-in MCP servers served by this binary (`orionai-mcp serve <name>`).
//!
//! They speak the same newline-delimited JSON-RPC 2.0 the client expects,
//! so the default configuration works without any external runtime.

pub mod calculator;
pub mod datetime;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::mcp_client::types::{error_codes, PROTOCOL_VERSION};

/// Tool logic behind one built-in server.
pub trait ToolHandler: Send + Sync {
    /// Reported as `serverInfo.name`.
    fn server_name(&self) -> &'static str;

    /// Tool definitions in `tools/list` shape.
    fn tools(&self) -> Value;

    /// Run a tool and return its text output, or an error message.
    fn call(&self, tool: &str, arguments: &Value) -> Result<String, String>;
}

/// Servers that ship inside the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BuiltinServer {
    Calculator,
    Datetime,
}

impl BuiltinServer {
    pub fn handler(self) -> Box<dyn ToolHandler> {
        match self {
            BuiltinServer::Calculator => Box::new(calculator::Calculator),
            BuiltinServer::Datetime => Box::new(datetime::DateTime),
        }
    }
}

/// Serve `handler` on this process's stdin/stdout until stdin closes.
pub async fn serve(handler: &dyn ToolHandler) -> std::io::Result<()> {
    tracing::info!(server = handler.server_name(), "serving on stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_io(handler, stdin, stdout).await?;
    tracing::info!(server = handler.server_name(), "stdin closed, exiting");
    Ok(())
}

/// Request loop over any line-oriented reader/writer pair.
pub async fn serve_io<R, W>(handler: &dyn ToolHandler, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Ok(message) => handle_message(handler, &message),
            Err(e) => Some(error_response(
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("Parse error: {e}"),
            )),
        };

        if let Some(response) = response {
            let mut out = response.to_string();
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

/// Answer one message. Notifications (no `id`) get no reply.
pub fn handle_message(handler: &dyn ToolHandler, message: &Value) -> Option<Value> {
    let id = message.get("id").cloned();
    let Some(method) = message.get("method").and_then(Value::as_str) else {
        return Some(error_response(
            id.unwrap_or(Value::Null),
            error_codes::INVALID_REQUEST,
            "Invalid request: missing method".to_string(),
        ));
    };
    let Some(id) = id else {
        tracing::debug!(method, "notification");
        return None;
    };
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "initialize" => json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": handler.server_name(),
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
        "ping" => json!({}),
        "tools/list" => json!({ "tools": handler.tools() }),
        "resources/list" => json!({ "resources": [] }),
        "tools/call" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
            let empty = json!({});
            let arguments = params.get("arguments").unwrap_or(&empty);
            match handler.call(name, arguments) {
                Ok(text) => json!({
                    "content": [{ "type": "text", "text": text }]
                }),
                Err(message) => {
                    tracing::debug!(tool = name, error = %message, "tool failed");
                    return Some(error_response(id, error_codes::SERVER_ERROR, message));
                }
            }
        }
        other => {
            return Some(error_response(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ))
        }
    };

    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

fn error_response(id: Value, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Render a float the way Python's `str(float)` does: `8.0`, `0.1`, `1e+16`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let abs = value.abs();
    if value != 0.0 && !(1e-4..1e16).contains(&abs) {
        let formatted = format!("{value:e}");
        if let Some((mantissa, exponent)) = formatted.split_once('e') {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            return format!("{mantissa}e{sign}{:02}", exponent.abs());
        }
        return formatted;
    }

    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Numeric argument, accepting numbers or numeric strings. Missing is `0.0`.
pub(crate) fn number_arg(arguments: &Value, key: &str) -> Result<f64, String> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| format!("'{key}' is not a valid number")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| format!("could not convert string to float: '{s}'")),
        Some(other) => Err(format!("'{key}' must be a number, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl ToolHandler for Echo {
        fn server_name(&self) -> &'static str {
            "echo"
        }

        fn tools(&self) -> Value {
            json!([{ "name": "echo", "inputSchema": { "type": "object" } }])
        }

        fn call(&self, tool: &str, arguments: &Value) -> Result<String, String> {
            match tool {
                "echo" => Ok(arguments.to_string()),
                other => Err(format!("Unknown tool: {other}")),
            }
        }
    }

    #[test]
    fn test_format_float_matches_python() {
        assert_eq!(format_float(8.0), "8.0");
        assert_eq!(format_float(-3.0), "-3.0");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(123456789.0), "123456789.0");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn test_number_arg() {
        let args = json!({"a": 2, "b": "3.5", "c": "x", "d": [1]});
        assert_eq!(number_arg(&args, "a"), Ok(2.0));
        assert_eq!(number_arg(&args, "b"), Ok(3.5));
        assert_eq!(number_arg(&args, "missing"), Ok(0.0));
        assert!(number_arg(&args, "c").is_err());
        assert!(number_arg(&args, "d").is_err());
    }

    #[test]
    fn test_handle_initialize_and_lists() {
        let init = handle_message(&Echo, &json!({"jsonrpc": "2.0", "id": "1", "method": "initialize"})).unwrap();
        assert_eq!(init["id"], "1");
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(init["result"]["serverInfo"]["name"], "echo");

        let tools = handle_message(&Echo, &json!({"id": 2, "method": "tools/list"})).unwrap();
        assert_eq!(tools["id"], 2);
        assert_eq!(tools["result"]["tools"][0]["name"], "echo");

        let resources = handle_message(&Echo, &json!({"id": 3, "method": "resources/list"})).unwrap();
        assert_eq!(resources["result"]["resources"], json!([]));
    }

    #[test]
    fn test_handle_notifications_get_no_reply() {
        let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(handle_message(&Echo, &note).is_none());
    }

    #[test]
    fn test_handle_errors() {
        let unknown = handle_message(&Echo, &json!({"id": 1, "method": "bogus"})).unwrap();
        assert_eq!(unknown["error"]["code"], error_codes::METHOD_NOT_FOUND);
        assert_eq!(unknown["error"]["message"], "Method not found: bogus");

        let failed = handle_message(
            &Echo,
            &json!({"id": 2, "method": "tools/call", "params": {"name": "nope"}}),
        )
        .unwrap();
        assert_eq!(failed["error"]["code"], error_codes::SERVER_ERROR);
        assert_eq!(failed["error"]["message"], "Unknown tool: nope");

        let invalid = handle_message(&Echo, &json!({"id": 3})).unwrap();
        assert_eq!(invalid["error"]["code"], error_codes::INVALID_REQUEST);
    }

    #[test]
    fn test_handle_tool_call() {
        let reply = handle_message(
            &Echo,
            &json!({"id": "9", "method": "tools/call", "params": {"name": "echo", "arguments": {"x": 1}}}),
        )
        .unwrap();
        assert_eq!(reply["result"]["content"][0]["type"], "text");
        assert_eq!(reply["result"]["content"][0]["text"], r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn test_serve_io_loop() {
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":\"1\",\"method\":\"initialize\"}\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "not json\n",
            "{\"jsonrpc\":\"2.0\",\"id\":\"2\",\"method\":\"tools/list\"}\n",
        );
        let mut output = Vec::new();
        serve_io(&Echo, input.as_bytes(), &mut output).await.unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["id"], "1");
        assert_eq!(replies[1]["id"], Value::Null);
        assert_eq!(replies[1]["error"]["code"], error_codes::PARSE_ERROR);
        assert_eq!(replies[2]["id"], "2");
    }
}
