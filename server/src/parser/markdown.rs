//! Markdown parser: front-matter to metadata, headers demoted to plain
//! lines, fenced code kept as body.

use std::path::Path;

use super::{decode_lossy, title_fallback, DocumentParser, ParseResult};
use crate::error::ToolError;

pub struct MarkdownParser;

impl DocumentParser for MarkdownParser {
    fn supported_extensions(&self) -> &'static [&'static str] {
        &["md", "markdown", "mdown"]
    }

    fn parse(&self, path: &Path, bytes: &[u8]) -> Result<ParseResult, ToolError> {
        let raw = decode_lossy(bytes);
        let mut metadata: Vec<(String, String)> = Vec::new();

        let body = match split_front_matter(&raw) {
            Some((front, body)) => {
                parse_front_matter(front, &mut metadata);
                body
            }
            None => raw.as_str(),
        };

        let mut text = String::with_capacity(body.len());
        let mut title: Option<String> = metadata
            .iter()
            .find(|(k, _)| k == "title")
            .map(|(_, v)| v.clone());
        let mut in_fence = false;

        for line in body.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                // Fence markers are markup; fenced content is body.
                in_fence = !in_fence;
                continue;
            }
            if !in_fence {
                if let Some((level, heading)) = parse_heading(trimmed) {
                    metadata.push(("header".to_string(), heading.to_string()));
                    if level == 1 && title.is_none() {
                        title = Some(heading.to_string());
                    }
                    text.push_str(heading);
                    text.push('\n');
                    continue;
                }
            }
            text.push_str(line.trim_end_matches('\r'));
            text.push('\n');
        }

        let title = title.unwrap_or_else(|| title_fallback(path));
        metadata.push(("title".to_string(), title));

        Ok(ParseResult::new(text, metadata))
    }
}

/// Split a leading `---` front-matter block from the body, if present.
fn split_front_matter(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix("---")?;
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;
    for terminator in ["\n---\n", "\n---\r\n"] {
        if let Some(end) = rest.find(terminator) {
            return Some((&rest[..end], &rest[end + terminator.len()..]));
        }
    }
    // Front matter that runs to EOF leaves an empty body.
    let trimmed = rest.trim_end();
    if trimmed.ends_with("\n---") {
        return Some((&trimmed[..trimmed.len() - 4], ""));
    }
    None
}

/// Parse `key: value` lines from a front-matter block.
fn parse_front_matter(front: &str, metadata: &mut Vec<(String, String)>) {
    for line in front.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            continue;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if !value.is_empty() {
            metadata.push((key.to_string(), value.to_string()));
        }
    }
}

/// ATX heading: `#{1,6}` followed by a space. Returns (level, text).
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    let rest = rest.strip_prefix(' ')?;
    let text = rest.trim().trim_end_matches('#').trim_end();
    if text.is_empty() {
        None
    } else {
        Some((hashes, text))
    }
}
