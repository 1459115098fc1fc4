//! Date/time server: `current_time`, `timestamp`, `format_date`.

use chrono::format::{Item, StrftimeItems};
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};

use super::{format_float, ToolHandler};

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct DateTime;

impl ToolHandler for DateTime {
    fn server_name(&self) -> &'static str {
        "datetime"
    }

    fn tools(&self) -> Value {
        json!([
            {
                "name": "current_time",
                "description": "Get the current date and time",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "timezone": {
                            "type": "string",
                            "description": "IANA timezone name (optional, defaults to UTC)",
                            "default": "UTC"
                        },
                        "format": {
                            "type": "string",
                            "description": "strftime format string",
                            "default": DEFAULT_FORMAT
                        }
                    }
                }
            },
            {
                "name": "timestamp",
                "description": "Get current Unix timestamp",
                "inputSchema": { "type": "object", "properties": {} }
            },
            {
                "name": "format_date",
                "description": "Format a given timestamp",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "timestamp": {
                            "type": "number",
                            "description": "Unix timestamp to format"
                        },
                        "format": {
                            "type": "string",
                            "description": "strftime format string",
                            "default": DEFAULT_FORMAT
                        },
                        "timezone": {
                            "type": "string",
                            "description": "IANA timezone name (optional, defaults to UTC)",
                            "default": "UTC"
                        }
                    },
                    "required": ["timestamp"]
                }
            }
        ])
    }

    fn call(&self, tool: &str, arguments: &Value) -> Result<String, String> {
        let format = str_arg(arguments, "format").unwrap_or(DEFAULT_FORMAT);
        let zone = parse_zone(str_arg(arguments, "timezone").unwrap_or("UTC"))?;

        match tool {
            "current_time" => render(&Utc::now().with_timezone(&zone), format),
            "timestamp" => {
                let now = Utc::now();
                let seconds = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;
                Ok(format_float(seconds))
            }
            "format_date" => {
                let timestamp = match arguments.get("timestamp") {
                    Some(Value::Number(n)) => n.as_f64(),
                    Some(Value::String(s)) => s.trim().parse().ok(),
                    _ => None,
                }
                .ok_or_else(|| "'timestamp' must be a number".to_string())?;
                let instant = from_unix(timestamp)?;
                render(&instant.with_timezone(&zone), format)
            }
            other => Err(format!("Unknown tool: {other}")),
        }
    }
}

fn str_arg<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

fn parse_zone(name: &str) -> Result<Tz, String> {
    name.parse::<Tz>()
        .map_err(|_| format!("Unknown timezone: {name}"))
}

fn from_unix(timestamp: f64) -> Result<chrono::DateTime<Utc>, String> {
    if !timestamp.is_finite() {
        return Err(format!("timestamp out of range: {timestamp}"));
    }
    let seconds = timestamp.floor();
    let nanos = ((timestamp - seconds) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(seconds as i64, nanos)
        .single()
        .ok_or_else(|| format!("timestamp out of range: {timestamp}"))
}

/// strftime-style rendering that reports bad format strings instead of panicking.
fn render<T>(value: &chrono::DateTime<T>, format: &str) -> Result<String, String>
where
    T: TimeZone,
    T::Offset: std::fmt::Display,
{
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(format!("Invalid format string: {format}"));
    }

    use std::fmt::Write;
    let mut out = String::new();
    write!(out, "{}", value.format_with_items(items.into_iter()))
        .map_err(|_| format!("Invalid format string: {format}"))?;
    Ok(out)
}
