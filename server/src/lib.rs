//! mydocs-mcp — local, privacy-first document intelligence over MCP.
//!
//! A JSON-RPC 2.0 engine bound to line-delimited STDIO exposes three tools
//! (`indexDocument`, `searchDocuments`, `getDocument`) backed by a SQLite
//! document store with an inverted keyword index. A filesystem watcher
//! keeps the index consistent with the configured document root.

pub mod config;
pub mod context;
pub mod error;
pub mod parser;
pub mod protocol;
pub mod store;
pub mod tokenize;
pub mod tools;
pub mod watcher;

pub use config::ServerConfig;
pub use context::ServerContext;
pub use error::{AppError, ErrorCode, ToolError};
pub use protocol::{dispatch_request, run_stdio};
