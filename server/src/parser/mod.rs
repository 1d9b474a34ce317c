//! Parser registry: maps file extensions to document parsers.
//!
//! A parser turns raw file bytes into a [`ParseResult`] — plain
//! `normalized_text`, string metadata, and the token stream the store will
//! index. Parsers are pure functions of their inputs; the registry owns
//! dispatch and the shared normalization guarantees (lossy UTF-8 decode,
//! lowercased metadata keys, tokens cut by the canonical tokenizer).

mod markdown;
mod text;

pub use markdown::MarkdownParser;
pub use text::TextParser;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ErrorCode, ToolError};
use crate::tokenize::{self, Token};

// ---------------------------------------------------------------------------
// Parse result
// ---------------------------------------------------------------------------

/// Uniform output of every parser.
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Plain-text projection of the file, markup stripped.
    pub normalized_text: String,
    /// Parser-extracted attributes; keys lowercased, multimap semantics.
    pub metadata: Vec<(String, String)>,
    /// Canonical token stream over `normalized_text` (byte offsets).
    pub tokens: Vec<Token>,
}

impl ParseResult {
    /// Build a result from text and metadata, tokenizing with the canonical
    /// tokenizer and lowercasing metadata keys.
    pub fn new(normalized_text: String, metadata: Vec<(String, String)>) -> Self {
        let tokens = tokenize::tokenize(&normalized_text);
        let metadata = metadata
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self { normalized_text, metadata, tokens }
    }

    /// First value for a metadata key, if present.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Decode raw bytes as UTF-8, replacing invalid sequences. Never fails.
pub fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Lowercased extension of `path`, or `"unknown"` when absent.
pub fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Filename stem used as a title fallback.
pub fn title_fallback(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

// ---------------------------------------------------------------------------
// Parser contract + registry
// ---------------------------------------------------------------------------

pub trait DocumentParser: Send + Sync {
    /// Extensions (lowercase, no dot) this parser accepts.
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Parse raw bytes into a normalized result. Must not touch the
    /// filesystem; `path` is context for titles and error messages only.
    fn parse(&self, path: &Path, bytes: &[u8]) -> Result<ParseResult, ToolError>;
}

impl std::fmt::Debug for dyn DocumentParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocumentParser({:?})", self.supported_extensions())
    }
}

/// Ordered extension → parser mapping. The most recently registered parser
/// wins on conflicting extensions.
pub struct ParserRegistry {
    by_extension: HashMap<String, Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self { by_extension: HashMap::new() }
    }

    /// Registry with the built-in Markdown and plain-text parsers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextParser));
        registry.register(Arc::new(MarkdownParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn DocumentParser>) {
        for ext in parser.supported_extensions() {
            self.by_extension.insert(ext.to_ascii_lowercase(), Arc::clone(&parser));
        }
    }

    /// Resolve a parser for `path` by extension.
    pub fn resolve(&self, path: &Path) -> Result<Arc<dyn DocumentParser>, ToolError> {
        let ext = file_type_of(path);
        self.by_extension.get(&ext).cloned().ok_or_else(|| {
            ToolError::new(
                ErrorCode::UnsupportedType,
                format!("no parser registered for '.{ext}' ({})", path.display()),
            )
        })
    }

    pub fn supported_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.by_extension.keys().cloned().collect();
        extensions.sort();
        extensions
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
