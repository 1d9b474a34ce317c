//! indexDocument: read a file from disk, parse it, and upsert it into the
//! store in one transaction. Shared by the MCP tool and the filesystem
//! watcher, so both paths agree on resolution, hashing, and idempotence.

use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde_json::{json, Value};

use crate::config::ServerConfig;
use crate::error::{ErrorCode, ToolError};
use crate::parser::{file_type_of, ParserRegistry};
use crate::store::{content_hash, DocumentStore, NewDocument, Posting};
use crate::tokenize::term_frequencies;

use super::{resolve_document_path, ToolDescriptor};

/// What indexing did for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { document_id: i64, tokens_indexed: usize, metadata_fields: usize },
    Updated { document_id: i64, tokens_indexed: usize, metadata_fields: usize },
    /// Content hash matched the stored document; nothing was written.
    Unchanged { document_id: i64 },
}

impl IndexOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            IndexOutcome::Indexed { .. } => "indexed",
            IndexOutcome::Updated { .. } => "updated",
            IndexOutcome::Unchanged { .. } => "unchanged",
        }
    }

    pub fn document_id(&self) -> i64 {
        match self {
            IndexOutcome::Indexed { document_id, .. }
            | IndexOutcome::Updated { document_id, .. }
            | IndexOutcome::Unchanged { document_id } => *document_id,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            IndexOutcome::Indexed { document_id, tokens_indexed, metadata_fields }
            | IndexOutcome::Updated { document_id, tokens_indexed, metadata_fields } => json!({
                "status": self.status(),
                "document_id": document_id,
                "tokens_indexed": tokens_indexed,
                "metadata_fields": metadata_fields,
            }),
            IndexOutcome::Unchanged { document_id } => json!({
                "status": "unchanged",
                "document_id": document_id,
            }),
        }
    }
}

/// Index one file. `path` must already be resolved against the document
/// root. Idempotent for unchanged content unless `force_reindex` is set.
pub async fn index_file(
    store: &DocumentStore,
    parsers: &ParserRegistry,
    config: &ServerConfig,
    path: &Path,
    force_reindex: bool,
) -> Result<IndexOutcome, ToolError> {
    let file_meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| ToolError::file_not_found(path.display()))?;
    if !file_meta.is_file() {
        return Err(ToolError::file_not_found(path.display()));
    }
    if file_meta.len() > config.max_document_bytes {
        return Err(ToolError::new(
            ErrorCode::FileTooLarge,
            format!(
                "{} is {} bytes (limit {})",
                path.display(),
                file_meta.len(),
                config.max_document_bytes
            ),
        ));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ToolError::file_not_found(format!("{}: {e}", path.display())))?;
    let hash = content_hash(&bytes);
    let path_str = path.to_string_lossy().into_owned();

    if !force_reindex {
        match store.get_by_path(&path_str).await {
            Ok(existing) if existing.content_hash == hash => {
                return Ok(IndexOutcome::Unchanged { document_id: existing.id });
            }
            Ok(_) => {}
            Err(e) if e.code == ErrorCode::DocumentNotFound => {}
            Err(e) => return Err(e),
        }
    }

    let parser = parsers.resolve(path)?;
    let parsed = parser.parse(path, &bytes)?;

    let postings: Vec<Posting> = term_frequencies(&parsed.tokens)
        .into_iter()
        .map(|(token, (tf, first_offset))| Posting {
            token,
            term_frequency: tf,
            first_offset,
        })
        .collect();

    let mtime = file_meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let tokens_indexed = postings.len();
    let metadata_fields = parsed.metadata.len();
    let result = store
        .upsert_document(NewDocument {
            path: path_str,
            content_hash: hash,
            size_bytes: file_meta.len(),
            mtime,
            file_type: file_type_of(path),
            normalized_text: parsed.normalized_text,
            metadata: parsed.metadata,
            postings,
        })
        .await?;

    Ok(if result.created {
        IndexOutcome::Indexed {
            document_id: result.document_id,
            tokens_indexed,
            metadata_fields,
        }
    } else {
        IndexOutcome::Updated {
            document_id: result.document_id,
            tokens_indexed,
            metadata_fields,
        }
    })
}

pub fn index_document_descriptor(
    store: Arc<DocumentStore>,
    parsers: Arc<ParserRegistry>,
    config: Arc<ServerConfig>,
) -> ToolDescriptor {
    ToolDescriptor {
        name: "indexDocument",
        description: "Index a document file into the local search index. Relative paths \
                      resolve against the configured document root. Re-indexing unchanged \
                      content is a no-op unless force_reindex is set.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Absolute path, or path relative to the document root"
                },
                "force_reindex": {
                    "type": "boolean",
                    "default": false,
                    "description": "Reparse and rewrite even when the content hash is unchanged"
                }
            },
            "required": ["file_path"]
        }),
        handler: Box::new(move |args| {
            let store = Arc::clone(&store);
            let parsers = Arc::clone(&parsers);
            let config = Arc::clone(&config);
            Box::pin(async move {
                let raw = args["file_path"].as_str().unwrap_or_default();
                let force = args["force_reindex"].as_bool().unwrap_or(false);
                let path = resolve_document_path(&config, raw);
                let outcome = index_file(&store, &parsers, &config, &path, force).await?;
                Ok(outcome.to_json())
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(root: &Path) -> ServerConfig {
        ServerConfig {
            document_root: root.to_path_buf(),
            max_document_bytes: 1024,
            ..ServerConfig::default()
        }
    }

    async fn fixture() -> (tempfile::TempDir, DocumentStore, ParserRegistry, ServerConfig) {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(&dir.path().join("docs.db"), Duration::ZERO).unwrap();
        let config = test_config(dir.path());
        (dir, store, ParserRegistry::with_defaults(), config)
    }

    #[tokio::test]
    async fn first_index_then_unchanged() {
        let (dir, store, parsers, config) = fixture().await;
        let file = dir.path().join("guide.md");
        std::fs::write(&file, "# Guide\n\nDocker setup.\n").unwrap();

        let first = index_file(&store, &parsers, &config, &file, false).await.unwrap();
        assert_eq!(first.status(), "indexed");

        let second = index_file(&store, &parsers, &config, &file, false).await.unwrap();
        assert_eq!(second.status(), "unchanged");
        assert_eq!(second.document_id(), first.document_id());

        let forced = index_file(&store, &parsers, &config, &file, true).await.unwrap();
        assert_eq!(forced.status(), "updated");
        store.close().await;
    }

    #[tokio::test]
    async fn changed_content_is_updated() {
        let (dir, store, parsers, config) = fixture().await;
        let file = dir.path().join("guide.md");
        std::fs::write(&file, "first version").unwrap();
        index_file(&store, &parsers, &config, &file, false).await.unwrap();

        std::fs::write(&file, "second version entirely").unwrap();
        let outcome = index_file(&store, &parsers, &config, &file, false).await.unwrap();
        assert_eq!(outcome.status(), "updated");
        store.close().await;
    }

    #[tokio::test]
    async fn missing_file_and_size_limit() {
        let (dir, store, parsers, config) = fixture().await;

        let err = index_file(&store, &parsers, &config, &dir.path().join("nope.md"), false)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FileNotFound);

        let big = dir.path().join("big.md");
        std::fs::write(&big, "x".repeat(2048)).unwrap();
        let err = index_file(&store, &parsers, &config, &big, false).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FileTooLarge);
        // No partial writes for rejected files.
        assert_eq!(store.stats().await.unwrap().documents, 0);
        store.close().await;
    }

    #[tokio::test]
    async fn unsupported_extension() {
        let (dir, store, parsers, config) = fixture().await;
        let file = dir.path().join("binary.bin");
        std::fs::write(&file, "data").unwrap();
        let err = index_file(&store, &parsers, &config, &file, false).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedType);
        store.close().await;
    }
}
