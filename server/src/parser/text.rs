//! Plain-text parser: passthrough body with line-ending normalization.

use std::path::Path;

use super::{decode_lossy, title_fallback, DocumentParser, ParseResult};
use crate::error::ToolError;

pub struct TextParser;

impl DocumentParser for TextParser {
    fn supported_extensions(&self) -> &'static [&'static str] {
        &["txt", "text", "log"]
    }

    fn parse(&self, path: &Path, bytes: &[u8]) -> Result<ParseResult, ToolError> {
        let raw = decode_lossy(bytes);
        let text = raw.replace("\r\n", "\n");
        let metadata = vec![
            ("title".to_string(), title_fallback(path)),
            ("lines".to_string(), text.lines().count().to_string()),
        ];
        Ok(ParseResult::new(text, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_with_crlf_normalization() {
        let result =
            TextParser.parse(Path::new("/docs/notes.txt"), b"one\r\ntwo\nthree").unwrap();
        assert_eq!(result.normalized_text, "one\ntwo\nthree");
        assert_eq!(result.metadata_value("title"), Some("notes"));
        assert_eq!(result.metadata_value("lines"), Some("3"));
    }

    #[test]
    fn tokens_cover_body() {
        let result = TextParser.parse(Path::new("/docs/notes.txt"), b"docker setup").unwrap();
        let texts: Vec<&str> = result.tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["docker", "setup"]);
    }
}
