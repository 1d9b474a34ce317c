//! searchDocuments: ranked keyword search over the indexed corpus.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat};
use serde_json::{json, Value};

use crate::config::ServerConfig;
use crate::store::{DocumentStore, SearchHit, SearchRequest};

use super::ToolDescriptor;

fn mtime_rfc3339(hit: &SearchHit) -> String {
    DateTime::from_timestamp(hit.mtime, 0)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| hit.updated_at.clone())
}

fn hit_to_json(hit: &SearchHit) -> Value {
    json!({
        "document_id": hit.document_id,
        "path": hit.path,
        "title": hit.title,
        "snippet": hit.snippet,
        "relevance_score": hit.score,
        "file_size": hit.file_size,
        "last_modified": mtime_rfc3339(hit),
        "matched_tokens": hit.matched_tokens,
    })
}

pub fn search_documents_descriptor(
    store: Arc<DocumentStore>,
    config: Arc<ServerConfig>,
) -> ToolDescriptor {
    let default_limit = config.max_search_results;
    ToolDescriptor {
        name: "searchDocuments",
        description: "Search indexed documents by keyword. Supports quoted phrases, \
                      -exclusions, and filetype: filters inside the query string. Results \
                      are ranked by relevance with deterministic tie-breaking.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "maxLength": 500,
                    "description": "Search terms; \"quoted phrases\", -excludes, filetype:md"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 100,
                    "default": default_limit,
                    "description": "Maximum number of results"
                },
                "file_types": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Restrict results to these file types (e.g. [\"md\", \"txt\"])"
                }
            },
            "required": ["query"]
        }),
        handler: Box::new(move |args| {
            let store = Arc::clone(&store);
            Box::pin(async move {
                let query = args["query"].as_str().unwrap_or_default().to_string();
                let limit = args["limit"].as_u64().unwrap_or(20) as usize;
                let file_types: Vec<String> = args["file_types"]
                    .as_array()
                    .map(|a| {
                        a.iter().filter_map(|v| v.as_str()).map(|s| s.to_string()).collect()
                    })
                    .unwrap_or_default();

                let start = Instant::now();
                let response =
                    store.search(SearchRequest { query, limit, file_types }).await?;
                let results: Vec<Value> = response.hits.iter().map(hit_to_json).collect();

                Ok(json!({
                    "results": results,
                    "total_found": response.total_found,
                    "execution_time_ms": start.elapsed().as_millis() as u64,
                }))
            })
        }),
    }
}
