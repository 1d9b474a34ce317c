//! Error types: fatal server errors and per-invocation tool errors.
//!
//! Two layers, matching the propagation policy: [`AppError`] aborts startup
//! or the server itself (bad config, database open failure, stdout I/O
//! failure); [`ToolError`] carries a stable machine-readable code across one
//! tool invocation and is translated into a JSON-RPC error by the protocol
//! engine. Nothing below the tool registry crosses the wire unwrapped.

use std::fmt;

use thiserror::Error;

/// Fatal errors. Surfacing one of these exits the process non-zero.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// Database file exists but its schema is unreadable or from the future.
    #[error("database corruption: {0}")]
    Corruption(String),

    #[error("tool registry error: {0}")]
    Registry(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Stable application error codes
// ---------------------------------------------------------------------------

/// Machine-readable codes for per-invocation failures.
///
/// The string form is what agents pattern-match on (`data.code` in JSON-RPC
/// error responses); the numeric form is the JSON-RPC error code. Codes in
/// the `-32000..-32099` range are application errors; `INVALID_PARAMS` and
/// `INTERNAL_ERROR` map to the standard JSON-RPC codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ToolNotFound,
    FileNotFound,
    FileTooLarge,
    UnsupportedType,
    ParseError,
    DocumentNotFound,
    StorageError,
    InvalidQuery,
    InvalidParams,
    ToolTimeout,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::UnsupportedType => "UNSUPPORTED_TYPE",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::InvalidQuery => "INVALID_QUERY",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    /// Numeric JSON-RPC error code for this application error.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            ErrorCode::InvalidParams => -32602,
            ErrorCode::Internal => -32603,
            ErrorCode::ToolNotFound => -32000,
            ErrorCode::FileNotFound => -32001,
            ErrorCode::FileTooLarge => -32002,
            ErrorCode::UnsupportedType => -32003,
            ErrorCode::ParseError => -32004,
            ErrorCode::DocumentNotFound => -32005,
            ErrorCode::StorageError => -32006,
            ErrorCode::InvalidQuery => -32007,
            ErrorCode::ToolTimeout => -32008,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tool errors
// ---------------------------------------------------------------------------

/// A failed tool invocation: stable code plus a human-readable message.
///
/// No stack traces, no source chains — the message is the whole payload
/// that reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn file_not_found(path: impl fmt::Display) -> Self {
        Self::new(ErrorCode::FileNotFound, format!("file not found: {path}"))
    }

    pub fn document_not_found(selector: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DocumentNotFound, format!("no indexed document for {selector}"))
    }

    pub fn parse_error(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ParseError, format!("failed to parse {path}: {reason}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn storage(reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::StorageError, format!("storage error: {reason}"))
    }

    pub fn internal(reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Internal, format!("internal error: {reason}"))
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ToolError {}
