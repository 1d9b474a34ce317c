//! Server configuration: defaults, optional TOML file, `MYDOCS_*` env overrides.
//!
//! Precedence (lowest to highest): built-in defaults, `mydocs.toml` (or the
//! file given with `--config`), environment variables. The resolved config is
//! validated once at startup and read-only afterwards.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

/// Hard cap on `max_search_results`, mirrored in the searchDocuments schema.
pub const SEARCH_RESULT_CAP: usize = 100;

/// Log verbosity, mapped onto `tracing` level filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" | "WARN" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Validated server configuration. Built once in `main`, then shared
/// read-only through the `ServerContext`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Transport name; `"stdio"` is the only supported value.
    pub transport: String,
    /// Base directory for resolving relative `file_path` arguments and for
    /// the filesystem watcher.
    pub document_root: PathBuf,
    /// Extension whitelist, stored lowercased without the leading dot.
    pub document_extensions: HashSet<String>,
    pub database_path: PathBuf,
    pub max_document_bytes: u64,
    /// Default `limit` for searchDocuments (hard cap [`SEARCH_RESULT_CAP`]).
    pub max_search_results: usize,
    /// Query cache TTL; `0` disables the cache.
    pub query_cache_ttl_seconds: u64,
    pub watch_enabled: bool,
    pub watch_debounce_ms: u64,
    pub watch_batch_ms: u64,
    /// Glob patterns excluded from watching before any work (`*.tmp`, `.*`).
    pub watch_ignore_patterns: Vec<String>,
    /// Worker pool size for watcher-triggered indexing.
    pub watch_concurrency: usize,
    pub tool_timeout_seconds: u64,
    pub shutdown_deadline_seconds: u64,
    pub log_level: LogLevel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            document_root: PathBuf::from("."),
            document_extensions: ["md", "markdown", "mdown", "txt", "text", "log"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            database_path: PathBuf::from("./data/mydocs.db"),
            max_document_bytes: 10 * 1024 * 1024,
            max_search_results: 20,
            query_cache_ttl_seconds: 300,
            watch_enabled: true,
            watch_debounce_ms: 500,
            watch_batch_ms: 1000,
            watch_ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), ".*".to_string()],
            watch_concurrency: 4,
            tool_timeout_seconds: 30,
            shutdown_deadline_seconds: 5,
            log_level: LogLevel::Info,
        }
    }
}

// ---------------------------------------------------------------------------
// TOML file shape (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    transport: Option<String>,
    document_root: Option<PathBuf>,
    document_extensions: Option<Vec<String>>,
    database_path: Option<PathBuf>,
    max_document_bytes: Option<u64>,
    max_search_results: Option<usize>,
    query_cache_ttl_seconds: Option<u64>,
    watch_enabled: Option<bool>,
    watch_debounce_ms: Option<u64>,
    watch_batch_ms: Option<u64>,
    watch_ignore_patterns: Option<Vec<String>>,
    watch_concurrency: Option<usize>,
    tool_timeout_seconds: Option<u64>,
    shutdown_deadline_seconds: Option<u64>,
    log_level: Option<LogLevel>,
}

impl ServerConfig {
    /// Load configuration: defaults, then `path` (if given and present),
    /// then `MYDOCS_*` environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Some(path) = path {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            let file: ConfigFile = toml::from_str(&raw).map_err(|e| {
                AppError::Config(format!("invalid TOML in {}: {e}", path.display()))
            })?;
            config.merge_file(file);
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.transport {
            self.transport = v;
        }
        if let Some(v) = file.document_root {
            self.document_root = v;
        }
        if let Some(v) = file.document_extensions {
            self.document_extensions = normalize_extensions(&v);
        }
        if let Some(v) = file.database_path {
            self.database_path = v;
        }
        if let Some(v) = file.max_document_bytes {
            self.max_document_bytes = v;
        }
        if let Some(v) = file.max_search_results {
            self.max_search_results = v;
        }
        if let Some(v) = file.query_cache_ttl_seconds {
            self.query_cache_ttl_seconds = v;
        }
        if let Some(v) = file.watch_enabled {
            self.watch_enabled = v;
        }
        if let Some(v) = file.watch_debounce_ms {
            self.watch_debounce_ms = v;
        }
        if let Some(v) = file.watch_batch_ms {
            self.watch_batch_ms = v;
        }
        if let Some(v) = file.watch_ignore_patterns {
            self.watch_ignore_patterns = v;
        }
        if let Some(v) = file.watch_concurrency {
            self.watch_concurrency = v;
        }
        if let Some(v) = file.tool_timeout_seconds {
            self.tool_timeout_seconds = v;
        }
        if let Some(v) = file.shutdown_deadline_seconds {
            self.shutdown_deadline_seconds = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), AppError> {
        if let Some(v) = env("MYDOCS_TRANSPORT") {
            self.transport = v;
        }
        if let Some(v) = env("MYDOCS_DOCUMENT_ROOT") {
            self.document_root = PathBuf::from(v);
        }
        if let Some(v) = env("MYDOCS_DOCUMENT_EXTENSIONS") {
            let parts: Vec<String> = v.split(',').map(|s| s.trim().to_string()).collect();
            self.document_extensions = normalize_extensions(&parts);
        }
        if let Some(v) = env("MYDOCS_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = env("MYDOCS_MAX_DOCUMENT_BYTES") {
            self.max_document_bytes = parse_env("MYDOCS_MAX_DOCUMENT_BYTES", &v)?;
        }
        if let Some(v) = env("MYDOCS_MAX_SEARCH_RESULTS") {
            self.max_search_results = parse_env("MYDOCS_MAX_SEARCH_RESULTS", &v)?;
        }
        if let Some(v) = env("MYDOCS_QUERY_CACHE_TTL_SECONDS") {
            self.query_cache_ttl_seconds = parse_env("MYDOCS_QUERY_CACHE_TTL_SECONDS", &v)?;
        }
        if let Some(v) = env("MYDOCS_WATCH_ENABLED") {
            self.watch_enabled = parse_bool("MYDOCS_WATCH_ENABLED", &v)?;
        }
        if let Some(v) = env("MYDOCS_WATCH_DEBOUNCE_MS") {
            self.watch_debounce_ms = parse_env("MYDOCS_WATCH_DEBOUNCE_MS", &v)?;
        }
        if let Some(v) = env("MYDOCS_WATCH_BATCH_MS") {
            self.watch_batch_ms = parse_env("MYDOCS_WATCH_BATCH_MS", &v)?;
        }
        if let Some(v) = env("MYDOCS_TOOL_TIMEOUT_SECONDS") {
            self.tool_timeout_seconds = parse_env("MYDOCS_TOOL_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = env("MYDOCS_SHUTDOWN_DEADLINE_SECONDS") {
            self.shutdown_deadline_seconds = parse_env("MYDOCS_SHUTDOWN_DEADLINE_SECONDS", &v)?;
        }
        if let Some(v) = env("MYDOCS_LOG_LEVEL") {
            self.log_level = LogLevel::parse(&v)
                .ok_or_else(|| AppError::Config(format!("invalid MYDOCS_LOG_LEVEL: {v}")))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<(), AppError> {
        if self.transport != "stdio" {
            return Err(AppError::Config(format!(
                "unsupported transport '{}' (only 'stdio' is available)",
                self.transport
            )));
        }
        if self.document_extensions.is_empty() {
            return Err(AppError::Config("document_extensions must not be empty".into()));
        }
        if self.max_search_results == 0 || self.max_search_results > SEARCH_RESULT_CAP {
            return Err(AppError::Config(format!(
                "max_search_results must be in 1..={SEARCH_RESULT_CAP}"
            )));
        }
        if self.watch_concurrency == 0 {
            return Err(AppError::Config("watch_concurrency must be at least 1".into()));
        }
        if self.tool_timeout_seconds == 0 {
            return Err(AppError::Config("tool_timeout_seconds must be at least 1".into()));
        }

        self.document_root = self.document_root.canonicalize().map_err(|e| {
            AppError::Config(format!(
                "document_root {} is not accessible: {e}",
                self.document_root.display()
            ))
        })?;

        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Config(format!(
                        "cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// True when `ext` (lowercase, no dot) is on the whitelist.
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.document_extensions.contains(ext)
    }
}

/// Lowercase and strip the leading dot from an extension list, dropping
/// empty entries.
fn normalize_extensions(raw: &[String]) -> HashSet<String> {
    raw.iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AppError> {
    value.parse().map_err(|_| AppError::Config(format!("invalid {name}: {value}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, AppError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::Config(format!("invalid {name}: {value}"))),
    }
}
