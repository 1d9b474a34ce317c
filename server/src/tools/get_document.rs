//! getDocument: retrieve one indexed document by path or id.
//!
//! The two selectors are mutually exclusive, enforced by the schema's
//! `oneOf`. Truncation via `max_content_bytes` cuts at a UTF-8 boundary;
//! `format` shapes the `content` field only.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use serde_json::{json, Map, Value};

use crate::config::ServerConfig;
use crate::store::{DocumentRecord, DocumentStore};

use super::{resolve_document_path, ToolDescriptor};

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Collapse the metadata multimap into a JSON object; repeated keys (e.g.
/// `header`) become arrays in insertion order.
fn metadata_to_json(entries: Vec<(String, String)>) -> Value {
    let mut map: Map<String, Value> = Map::new();
    for (key, value) in entries {
        match map.get_mut(&key) {
            None => {
                map.insert(key, Value::String(value));
            }
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    Value::Object(map)
}

fn shape_content(format: &str, title: &str, body: &str) -> String {
    match format {
        "markdown" => format!("# {title}\n\n{body}"),
        // "json" and "text" both carry the plain normalized text; the JSON
        // envelope is the response itself.
        _ => body.to_string(),
    }
}

fn mtime_rfc3339(record: &DocumentRecord) -> String {
    DateTime::from_timestamp(record.mtime, 0)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| record.updated_at.clone())
}

pub fn get_document_descriptor(
    store: Arc<DocumentStore>,
    config: Arc<ServerConfig>,
) -> ToolDescriptor {
    ToolDescriptor {
        name: "getDocument",
        description: "Retrieve an indexed document by file path or document id (exactly one \
                      selector). Content can be truncated with max_content_bytes and shaped \
                      with format.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Path of the indexed document (mutually exclusive with document_id)"
                },
                "document_id": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Id of the indexed document (mutually exclusive with file_path)"
                },
                "include_metadata": {
                    "type": "boolean",
                    "default": true,
                    "description": "Include parser-extracted metadata"
                },
                "format": {
                    "type": "string",
                    "enum": ["json", "markdown", "text"],
                    "default": "json",
                    "description": "Shape of the content field"
                },
                "max_content_bytes": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Truncate content at a UTF-8-safe boundary"
                }
            },
            "oneOf": [
                { "required": ["file_path"] },
                { "required": ["document_id"] }
            ]
        }),
        handler: Box::new(move |args| {
            let store = Arc::clone(&store);
            let config = Arc::clone(&config);
            Box::pin(async move {
                let record = match args.get("file_path").and_then(|v| v.as_str()) {
                    Some(raw) => {
                        let path = resolve_document_path(&config, raw);
                        store.get_by_path(&path.to_string_lossy()).await?
                    }
                    None => {
                        let id = args["document_id"].as_i64().unwrap_or_default();
                        store.get_by_id(id).await?
                    }
                };

                let include_metadata =
                    args["include_metadata"].as_bool().unwrap_or(true);
                let format = args["format"].as_str().unwrap_or("json");
                let max_bytes =
                    args.get("max_content_bytes").and_then(|v| v.as_u64()).map(|n| n as usize);

                let metadata = store.get_metadata(record.id).await?;
                let title = metadata
                    .iter()
                    .find(|(k, _)| k == "title")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| "untitled".to_string());

                let mut body = record.normalized_text.as_str();
                let mut truncated = false;
                if let Some(max) = max_bytes {
                    if body.len() > max {
                        body = &body[..floor_boundary(body, max)];
                        truncated = true;
                    }
                }

                let mut out = json!({
                    "document_id": record.id,
                    "path": record.path,
                    "content": shape_content(format, &title, body),
                    "file_size": record.size_bytes,
                    "last_modified": mtime_rfc3339(&record),
                    "indexed_at": record.indexed_at,
                });
                if include_metadata {
                    out["metadata"] = metadata_to_json(metadata);
                }
                if truncated {
                    out["truncated"] = Value::Bool(true);
                }
                Ok(out)
            })
        }),
    }
}
