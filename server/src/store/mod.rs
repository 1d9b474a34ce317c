//! Document store: durable storage and keyword search over SQLite.
//!
//! The store owns all persistent state. Writes are serialized through a
//! single dedicated writer thread fed by an mpsc work queue; every mutation
//! for one document happens in one transaction, so failed indexing never
//! leaves partial state. Reads run concurrently on a small pool of
//! read-only connections, dispatched to blocking tasks.
//!
//! `SQLITE_BUSY` is retried internally with bounded exponential backoff
//! before surfacing as `STORAGE_ERROR`; schema corruption is fatal at open
//! time and never retried.

mod cache;
mod schema;
mod search;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use crate::config::SEARCH_RESULT_CAP;
use crate::error::{AppError, ErrorCode, ToolError};
use crate::tokenize::parse_query;

use cache::QueryCache;

/// Read connections in the pool. Searches are short; a handful is plenty.
const READ_POOL_SIZE: usize = 4;

/// Backoff schedule for `SQLITE_BUSY` on the writer.
const BUSY_BACKOFF: [Duration; 3] =
    [Duration::from_millis(50), Duration::from_millis(100), Duration::from_millis(200)];

/// Depth of the writer's work queue.
const WRITE_QUEUE_DEPTH: usize = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A stored document row.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: i64,
    pub path: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub mtime: i64,
    pub file_type: String,
    pub indexed_at: String,
    pub updated_at: String,
    pub normalized_text: String,
}

/// One inverted-index entry for a document.
#[derive(Debug, Clone)]
pub struct Posting {
    pub token: String,
    pub term_frequency: u32,
    /// Byte offset of the first occurrence in `normalized_text`.
    pub first_offset: usize,
}

/// Everything needed to create or replace a document in one transaction.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub path: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub mtime: i64,
    pub file_type: String,
    pub normalized_text: String,
    pub metadata: Vec<(String, String)>,
    pub postings: Vec<Posting>,
}

#[derive(Debug, Clone)]
pub struct UpsertResult {
    pub document_id: i64,
    /// True when the path was not previously indexed.
    pub created: bool,
    pub tokens_indexed: usize,
    pub metadata_fields: usize,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub file_types: Vec<String>,
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document_id: i64,
    pub path: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub matched_tokens: Vec<String>,
    pub file_size: u64,
    pub mtime: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Matching documents before the limit was applied.
    pub total_found: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub documents: u64,
    pub postings: u64,
    pub distinct_tokens: u64,
}

/// Lowercase hex SHA-256 of raw file bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Writer work queue
// ---------------------------------------------------------------------------

enum WriteOp {
    Upsert { doc: Box<NewDocument>, reply: oneshot::Sender<Result<UpsertResult, ToolError>> },
    Delete { path: String, reply: oneshot::Sender<Result<bool, ToolError>> },
    Rename { from: String, to: String, reply: oneshot::Sender<Result<bool, ToolError>> },
    Close { reply: oneshot::Sender<()> },
}

struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, ToolError>,
    ) -> Result<T, ToolError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let conn = self.connections[idx]
            .lock()
            .map_err(|_| ToolError::internal("read connection poisoned"))?;
        f(&conn)
    }
}

/// Handle to the document store. Cheap to share via `Arc`.
pub struct DocumentStore {
    write_tx: mpsc::Sender<WriteOp>,
    readers: Arc<ReadPool>,
    cache: QueryCache,
    write_generation: Arc<AtomicU64>,
    writer_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl DocumentStore {
    /// Open (or create) the database at `db_path` and spawn the writer.
    pub fn open(db_path: &Path, cache_ttl: Duration) -> Result<Self, AppError> {
        let writer_conn = schema::open_writer(db_path)?;

        let mut connections = Vec::with_capacity(READ_POOL_SIZE);
        for _ in 0..READ_POOL_SIZE {
            connections.push(Mutex::new(schema::open_reader(db_path)?));
        }
        let readers = Arc::new(ReadPool { connections, next: AtomicUsize::new(0) });

        let write_generation = Arc::new(AtomicU64::new(0));
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);

        let generation = Arc::clone(&write_generation);
        let db_path = PathBuf::from(db_path);
        let writer_thread = std::thread::Builder::new()
            .name("mydocs-store-writer".to_string())
            .spawn(move || writer_loop(writer_conn, write_rx, generation))
            .map_err(|e| AppError::Database(format!("spawn writer for {}: {e}", db_path.display())))?;

        Ok(Self {
            write_tx,
            readers,
            cache: QueryCache::new(cache_ttl, Arc::clone(&write_generation)),
            write_generation,
            writer_thread: Mutex::new(Some(writer_thread)),
        })
    }

    // -- Writes -------------------------------------------------------------

    async fn submit<T>(
        &self,
        op: WriteOp,
        rx: oneshot::Receiver<Result<T, ToolError>>,
    ) -> Result<T, ToolError> {
        self.write_tx
            .send(op)
            .await
            .map_err(|_| ToolError::storage("store writer is shut down"))?;
        rx.await.map_err(|_| ToolError::storage("store writer dropped the request"))?
    }

    /// Create or replace the document at `doc.path` in one transaction.
    pub async fn upsert_document(&self, doc: NewDocument) -> Result<UpsertResult, ToolError> {
        let (reply, rx) = oneshot::channel();
        self.submit(WriteOp::Upsert { doc: Box::new(doc), reply }, rx).await
    }

    /// Remove the document at `path`. Returns false when nothing was stored.
    pub async fn delete_document(&self, path: &str) -> Result<bool, ToolError> {
        let (reply, rx) = oneshot::channel();
        self.submit(WriteOp::Delete { path: path.to_string(), reply }, rx).await
    }

    /// Re-key the document at `from` to `to`, preserving its id, postings,
    /// and metadata. Returns false when `from` is not indexed.
    pub async fn rename_document(&self, from: &str, to: &str) -> Result<bool, ToolError> {
        let (reply, rx) = oneshot::channel();
        self.submit(
            WriteOp::Rename { from: from.to_string(), to: to.to_string(), reply },
            rx,
        )
        .await
    }

    /// Flush the writer and stop it. Pending queued writes complete first.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.write_tx.send(WriteOp::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
        let handle = self.writer_thread.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }

    // -- Reads --------------------------------------------------------------

    async fn read<T, F>(&self, f: F) -> Result<T, ToolError>
    where
        F: FnOnce(&Connection) -> Result<T, ToolError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = Arc::clone(&self.readers);
        tokio::task::spawn_blocking(move || pool.with_conn(f))
            .await
            .map_err(|e| ToolError::internal(format!("read task failed: {e}")))?
    }

    pub async fn get_by_id(&self, id: i64) -> Result<DocumentRecord, ToolError> {
        self.read(move |conn| {
            fetch_document(conn, "id = ?1", &id)?
                .ok_or_else(|| ToolError::document_not_found(format!("id {id}")))
        })
        .await
    }

    pub async fn get_by_path(&self, path: &str) -> Result<DocumentRecord, ToolError> {
        let path = path.to_string();
        self.read(move |conn| {
            fetch_document(conn, "path = ?1", &path)?
                .ok_or_else(|| ToolError::document_not_found(&path))
        })
        .await
    }

    /// Metadata entries for a document, in insertion order.
    pub async fn get_metadata(&self, id: i64) -> Result<Vec<(String, String)>, ToolError> {
        self.read(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT key, value FROM doc_metadata WHERE document_id = ?1 ORDER BY rowid",
                )
                .map_err(|e| ToolError::storage(e))?;
            let rows = stmt
                .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| ToolError::storage(e))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| ToolError::storage(e))
        })
        .await
    }

    /// All indexed paths under `prefix` (used for rescan reconciliation).
    pub async fn list_paths(&self, prefix: &str) -> Result<Vec<String>, ToolError> {
        let like = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        self.read(move |conn| {
            let mut stmt = conn
                .prepare("SELECT path FROM documents WHERE path LIKE ?1 ESCAPE '\\'")
                .map_err(|e| ToolError::storage(e))?;
            let rows = stmt
                .query_map(params![like], |row| row.get(0))
                .map_err(|e| ToolError::storage(e))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| ToolError::storage(e))
        })
        .await
    }

    /// Ranked keyword search. Serves from the query cache when the entry is
    /// younger than the TTL and no write happened since it was stored.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, ToolError> {
        let mut parsed = parse_query(&request.query);
        for ft in &request.file_types {
            let ft = ft.trim().trim_start_matches('.').to_lowercase();
            if !ft.is_empty() {
                parsed.file_types.push(ft);
            }
        }
        parsed.file_types.sort();
        parsed.file_types.dedup();

        if parsed.is_empty() {
            return Err(ToolError::new(
                ErrorCode::InvalidQuery,
                "query contains no searchable terms",
            ));
        }

        let limit = request.limit.clamp(1, SEARCH_RESULT_CAP);
        let key = format!("{}|limit={limit}", parsed.cache_key());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let query = parsed.clone();
        let response = self
            .read(move |conn| search::execute(conn, &query, &query.file_types, limit))
            .await?;
        self.cache.insert(key, response.clone());
        Ok(response)
    }

    pub async fn stats(&self) -> Result<StoreStats, ToolError> {
        self.read(|conn| {
            let count = |sql: &str| -> Result<u64, ToolError> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n.max(0) as u64)
                    .map_err(|e| ToolError::storage(e))
            };
            Ok(StoreStats {
                documents: count("SELECT COUNT(*) FROM documents")?,
                postings: count("SELECT COUNT(*) FROM postings")?,
                distinct_tokens: count("SELECT COUNT(*) FROM token_doc_freq")?,
            })
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Writer loop
// ---------------------------------------------------------------------------

fn writer_loop(
    mut conn: Connection,
    mut rx: mpsc::Receiver<WriteOp>,
    generation: Arc<AtomicU64>,
) {
    while let Some(op) = rx.blocking_recv() {
        match op {
            WriteOp::Upsert { doc, reply } => {
                let result = with_busy_retry(|| upsert_in_tx(&mut conn, &doc));
                finish_write(&generation, result.is_ok());
                let _ = reply.send(result);
            }
            WriteOp::Delete { path, reply } => {
                let result = with_busy_retry(|| delete_in_tx(&mut conn, &path));
                finish_write(&generation, matches!(result, Ok(true)));
                let _ = reply.send(result);
            }
            WriteOp::Rename { from, to, reply } => {
                let result = with_busy_retry(|| rename_in_tx(&mut conn, &from, &to));
                finish_write(&generation, matches!(result, Ok(true)));
                let _ = reply.send(result);
            }
            WriteOp::Close { reply } => {
                let _ = reply.send(());
                break;
            }
        }
    }
}

fn finish_write(generation: &AtomicU64, changed: bool) {
    if changed {
        generation.fetch_add(1, Ordering::Release);
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Run a write closure, retrying `SQLITE_BUSY` with bounded backoff.
fn with_busy_retry<T>(
    mut f: impl FnMut() -> rusqlite::Result<T>,
) -> Result<T, ToolError> {
    let mut last_err = None;
    for (attempt, backoff) in BUSY_BACKOFF.iter().enumerate() {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_busy(&e) => {
                tracing::debug!(attempt = attempt + 1, "database busy, backing off");
                std::thread::sleep(*backoff);
                last_err = Some(e);
            }
            Err(e) => return Err(ToolError::storage(e)),
        }
    }
    match f() {
        Ok(v) => Ok(v),
        Err(e) => Err(ToolError::storage(last_err.unwrap_or(e))),
    }
}

fn upsert_in_tx(conn: &mut Connection, doc: &NewDocument) -> rusqlite::Result<UpsertResult> {
    let now = now_rfc3339();
    let tx = conn.transaction()?;

    let existing: Option<i64> = tx
        .query_row("SELECT id FROM documents WHERE path = ?1", params![doc.path], |row| {
            row.get(0)
        })
        .optional()?;

    let (id, created) = match existing {
        Some(id) => {
            decrement_doc_freq(&tx, id)?;
            tx.execute("DELETE FROM postings WHERE document_id = ?1", params![id])?;
            tx.execute("DELETE FROM doc_metadata WHERE document_id = ?1", params![id])?;
            tx.execute(
                "UPDATE documents SET content_hash = ?2, size_bytes = ?3, mtime = ?4,
                        file_type = ?5, updated_at = ?6, normalized_text = ?7
                 WHERE id = ?1",
                params![
                    id,
                    doc.content_hash,
                    doc.size_bytes as i64,
                    doc.mtime,
                    doc.file_type,
                    now,
                    doc.normalized_text
                ],
            )?;
            (id, false)
        }
        None => {
            tx.execute(
                "INSERT INTO documents
                     (path, content_hash, size_bytes, mtime, file_type,
                      indexed_at, updated_at, normalized_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
                params![
                    doc.path,
                    doc.content_hash,
                    doc.size_bytes as i64,
                    doc.mtime,
                    doc.file_type,
                    now,
                    doc.normalized_text
                ],
            )?;
            (tx.last_insert_rowid(), true)
        }
    };

    {
        let mut posting_stmt = tx.prepare(
            "INSERT INTO postings (document_id, token, term_frequency, first_offset)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut freq_stmt = tx.prepare(
            "INSERT INTO token_doc_freq (token, doc_count) VALUES (?1, 1)
             ON CONFLICT(token) DO UPDATE SET doc_count = doc_count + 1",
        )?;
        for posting in &doc.postings {
            posting_stmt.execute(params![
                id,
                posting.token,
                posting.term_frequency,
                posting.first_offset as i64
            ])?;
            freq_stmt.execute(params![posting.token])?;
        }

        let mut meta_stmt =
            tx.prepare("INSERT INTO doc_metadata (document_id, key, value) VALUES (?1, ?2, ?3)")?;
        for (key, value) in &doc.metadata {
            meta_stmt.execute(params![id, key, value])?;
        }
    }

    tx.execute("DELETE FROM token_doc_freq WHERE doc_count <= 0", [])?;
    tx.commit()?;

    Ok(UpsertResult {
        document_id: id,
        created,
        tokens_indexed: doc.postings.len(),
        metadata_fields: doc.metadata.len(),
    })
}

fn delete_in_tx(conn: &mut Connection, path: &str) -> rusqlite::Result<bool> {
    let tx = conn.transaction()?;
    let id: Option<i64> = tx
        .query_row("SELECT id FROM documents WHERE path = ?1", params![path], |row| row.get(0))
        .optional()?;
    let Some(id) = id else {
        return Ok(false);
    };

    decrement_doc_freq(&tx, id)?;
    // Postings and metadata go with the document via ON DELETE CASCADE.
    tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
    tx.execute("DELETE FROM token_doc_freq WHERE doc_count <= 0", [])?;
    tx.commit()?;
    Ok(true)
}

fn rename_in_tx(conn: &mut Connection, from: &str, to: &str) -> rusqlite::Result<bool> {
    let tx = conn.transaction()?;
    let src: Option<i64> = tx
        .query_row("SELECT id FROM documents WHERE path = ?1", params![from], |row| row.get(0))
        .optional()?;
    let Some(src) = src else {
        return Ok(false);
    };

    // A move that lands on an already-indexed path replaces that document.
    let dst: Option<i64> = tx
        .query_row("SELECT id FROM documents WHERE path = ?1", params![to], |row| row.get(0))
        .optional()?;
    if let Some(dst) = dst {
        if dst != src {
            decrement_doc_freq(&tx, dst)?;
            tx.execute("DELETE FROM documents WHERE id = ?1", params![dst])?;
            tx.execute("DELETE FROM token_doc_freq WHERE doc_count <= 0", [])?;
        }
    }

    let file_type = Path::new(to)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    tx.execute(
        "UPDATE documents SET path = ?2, file_type = ?3, updated_at = ?4 WHERE id = ?1",
        params![src, to, file_type, now_rfc3339()],
    )?;
    tx.commit()?;
    Ok(true)
}

fn decrement_doc_freq(tx: &Transaction<'_>, id: i64) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE token_doc_freq SET doc_count = doc_count - 1
         WHERE token IN (SELECT token FROM postings WHERE document_id = ?1)",
        params![id],
    )?;
    Ok(())
}

fn fetch_document(
    conn: &Connection,
    predicate: &str,
    param: &dyn rusqlite::ToSql,
) -> Result<Option<DocumentRecord>, ToolError> {
    let sql = format!(
        "SELECT id, path, content_hash, size_bytes, mtime, file_type,
                indexed_at, updated_at, normalized_text
         FROM documents WHERE {predicate}"
    );
    conn.query_row(&sql, rusqlite::params_from_iter(std::iter::once(param)), |row| {
        Ok(DocumentRecord {
            id: row.get(0)?,
            path: row.get(1)?,
            content_hash: row.get(2)?,
            size_bytes: row.get::<_, i64>(3)?.max(0) as u64,
            mtime: row.get(4)?,
            file_type: row.get(5)?,
            indexed_at: row.get(6)?,
            updated_at: row.get(7)?,
            normalized_text: row.get(8)?,
        })
    })
    .optional()
    .map_err(|e| ToolError::storage(e))
}
