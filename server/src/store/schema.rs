//! SQLite schema and connection setup for the document store.
//!
//! One writer connection (read-write, created first so the schema exists)
//! and a small pool of read-only connections. WAL keeps readers off the
//! writer's back; `synchronous=NORMAL` is the durability/latency tradeoff
//! the corpus sizes here call for.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::error::AppError;

/// Stored in `PRAGMA user_version`. Bump on DDL changes.
pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Page cache size in KiB (negative value per SQLite convention).
const CACHE_SIZE_KIB: i64 = -8000;

const BUSY_TIMEOUT_MS: i64 = 5000;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    content_hash TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    file_type TEXT NOT NULL,
    indexed_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    normalized_text TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS doc_metadata (
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS postings (
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    token TEXT NOT NULL,
    term_frequency INTEGER NOT NULL,
    first_offset INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS token_doc_freq (
    token TEXT PRIMARY KEY,
    doc_count INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(path);
CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash);
CREATE INDEX IF NOT EXISTS idx_postings_token ON postings(token);
CREATE UNIQUE INDEX IF NOT EXISTS idx_postings_token_doc ON postings(token, document_id);
CREATE INDEX IF NOT EXISTS idx_postings_doc ON postings(document_id);
CREATE INDEX IF NOT EXISTS idx_metadata_doc ON doc_metadata(document_id);
";

fn apply_pragmas(conn: &Connection) -> Result<(), AppError> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Database(format!("set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| AppError::Database(format!("set synchronous NORMAL: {e}")))?;
    conn.pragma_update(None, "cache_size", CACHE_SIZE_KIB)
        .map_err(|e| AppError::Database(format!("set cache_size: {e}")))?;
    conn.pragma_update(None, "temp_store", "MEMORY")
        .map_err(|e| AppError::Database(format!("set temp_store MEMORY: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Database(format!("set foreign_keys ON: {e}")))?;
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
        .map_err(|e| AppError::Database(format!("set busy_timeout: {e}")))?;
    Ok(())
}

/// Open the writer connection, creating the database and schema if needed.
pub(crate) fn open_writer(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Database(format!("open {}: {e}", db_path.display())))?;
    apply_pragmas(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Open a read-only connection. The writer must have run first.
pub(crate) fn open_reader(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| AppError::Database(format!("open {} read-only: {e}", db_path.display())))?;
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
        .map_err(|e| AppError::Database(format!("set busy_timeout: {e}")))?;
    Ok(conn)
}

/// Apply the DDL, gated on `user_version`. A database from a newer build is
/// corruption as far as this build is concerned — fatal, not a retry.
fn init_schema(conn: &Connection) -> Result<(), AppError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| AppError::Corruption(format!("read user_version: {e}")))?;

    if version > SCHEMA_VERSION {
        return Err(AppError::Corruption(format!(
            "database schema version {version} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(DDL)
        .map_err(|e| AppError::Database(format!("initialize schema: {e}")))?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| AppError::Database(format!("set user_version: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_schema_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");
        {
            let conn = open_writer(&path).unwrap();
            let version: i64 =
                conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
            assert_eq!(version, SCHEMA_VERSION);
        }
        // Re-open skips DDL and keeps the version.
        let conn = open_writer(&path).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn future_schema_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");
        {
            let conn = open_writer(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        }
        match open_writer(&path) {
            Err(AppError::Corruption(_)) => {}
            other => panic!("expected corruption error, got {other:?}"),
        }
    }

    #[test]
    fn reader_requires_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");
        assert!(open_reader(&path).is_err());
        open_writer(&path).unwrap();
        assert!(open_reader(&path).is_ok());
    }
}
