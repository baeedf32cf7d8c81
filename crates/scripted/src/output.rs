use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    channel: &'a str,
    id: u64,
    payload_size: usize,
    payload: &'a str,
    timestamp: String,
}

/// Print one message received on a named channel.
pub fn print_message(channel: &str, id: u64, payload: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                channel,
                id,
                payload_size: payload.len(),
                payload,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "ID", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    channel.to_string(),
                    id.to_string(),
                    payload.len().to_string(),
                    payload.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={channel} id={id} size={} payload={payload}",
                payload.len()
            );
        }
        OutputFormat::Raw => print_raw(payload.as_bytes()),
    }
}

#[derive(Serialize)]
struct HitOutput<'a> {
    event: &'a str,
    hit: &'a Value,
}

/// Print one batch of `add` or `revoke` items.
pub fn print_hits(event: &str, items: &[Value], format: OutputFormat) {
    if items.is_empty() {
        return;
    }
    match format {
        OutputFormat::Json => {
            for hit in items {
                println!(
                    "{}",
                    serde_json::to_string(&HitOutput { event, hit })
                        .unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "PATH", "LINE", "TEXT"]);
            for hit in items {
                let (path, line, text) = hit_columns(hit);
                table.add_row(vec![event.to_string(), path, line, text]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for hit in items {
                let (path, line, text) = hit_columns(hit);
                if line.is_empty() {
                    println!("{event} {path}");
                } else {
                    println!("{event} {path}:{line} {text}");
                }
            }
        }
        OutputFormat::Raw => {
            // Revokes are only meaningful to a listener tracking state.
            if event == "add" {
                for hit in items {
                    println!("{}", hit_columns(hit).0);
                }
            }
        }
    }
}

/// Print the end of one round of results.
pub fn print_done(paused: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(r#"{{"event":"done","paused":{paused}}}"#),
        OutputFormat::Table | OutputFormat::Pretty => {
            if paused {
                println!("done (paused at result limit)");
            } else {
                println!("done");
            }
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Path, line and text of a hit. Items that are not hit objects print whole.
fn hit_columns(hit: &Value) -> (String, String, String) {
    let Some(path) = hit.get("path").and_then(Value::as_str) else {
        let whole = match hit {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        return (whole, String::new(), String::new());
    };
    let line = hit
        .get("line")
        .and_then(Value::as_u64)
        .map(|line| line.to_string())
        .unwrap_or_default();
    let text = hit
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (path.to_string(), line, text)
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn hit_columns_read_search_hits() {
        let (path, line, text) = hit_columns(&json!({"path": "/ws/a.js", "line": 3, "text": "x"}));
        assert_eq!((path.as_str(), line.as_str(), text.as_str()), ("/ws/a.js", "3", "x"));

        let (path, line, _) = hit_columns(&json!({"path": "/ws/a.js"}));
        assert_eq!(path, "/ws/a.js");
        assert!(line.is_empty());
    }

    #[test]
    fn foreign_items_print_whole() {
        assert_eq!(hit_columns(&json!("plain")).0, "plain");
        assert_eq!(hit_columns(&json!([1, 2])).0, "[1,2]");
    }
}
