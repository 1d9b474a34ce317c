//! Search execution: posting lookups, tf-idf scoring, filters, and
//! snippet generation.
//!
//! Scoring: per positive token `t`, each containing document earns
//! `tf · ln((N + 1) / (df_t + 1))`. Documents then get a flat filename
//! bonus when any query token appears in the file-name component, and the
//! total is multiplied by a recency factor `1 + 0.10 · exp(-age_days/30)`.
//! Ordering is `(score desc, updated_at desc, id asc)` — fully
//! deterministic so repeated queries page identically.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{SearchHit, SearchResponse};
use crate::error::{ErrorCode, ToolError};
use crate::tokenize::ParsedQuery;

/// Flat bonus when a query token matches the file name.
const FILENAME_BONUS: f64 = 2.5;

/// Recency multiplier weight; factor stays within (1.0, 1.10].
const RECENCY_WEIGHT: f64 = 0.10;

/// Recency half-life-ish scale in days.
const RECENCY_SCALE_DAYS: f64 = 30.0;

/// Snippet window, in characters.
const SNIPPET_CHARS: usize = 200;

fn db_err(e: rusqlite::Error) -> ToolError {
    ToolError::storage(e)
}

struct Candidate {
    score: f64,
    matched: BTreeSet<String>,
    anchor: usize,
}

/// Execute a parsed query against the index.
///
/// `file_types` is the merged filter set (tool argument plus `filetype:`
/// query syntax), lowercased without dots. `limit` is already clamped by
/// the schema layer.
pub(crate) fn execute(
    conn: &Connection,
    query: &ParsedQuery,
    file_types: &[String],
    limit: usize,
) -> Result<SearchResponse, ToolError> {
    let terms: BTreeSet<&str> = query.terms.iter().map(|t| t.as_str()).collect();
    if terms.is_empty() {
        return Err(ToolError::new(ErrorCode::InvalidQuery, "query has no searchable terms"));
    }

    let doc_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
        .map_err(db_err)?;
    let n = doc_count as f64;

    // Gather postings per term and accumulate per-document scores.
    let mut candidates: HashMap<i64, Candidate> = HashMap::new();
    let mut df_stmt = conn
        .prepare("SELECT doc_count FROM token_doc_freq WHERE token = ?1")
        .map_err(db_err)?;
    let mut postings_stmt = conn
        .prepare(
            "SELECT document_id, term_frequency, first_offset FROM postings WHERE token = ?1",
        )
        .map_err(db_err)?;

    for term in &terms {
        let df: Option<i64> =
            df_stmt.query_row(params![term], |row| row.get(0)).optional().map_err(db_err)?;
        let df = match df {
            Some(df) if df > 0 => df,
            _ => continue,
        };
        let idf = ((n + 1.0) / (df as f64 + 1.0)).ln();

        let rows = postings_stmt
            .query_map(params![term], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })
            .map_err(db_err)?;
        for row in rows {
            let (doc_id, tf, first_offset) = row.map_err(db_err)?;
            let entry = candidates.entry(doc_id).or_insert(Candidate {
                score: 0.0,
                matched: BTreeSet::new(),
                anchor: usize::MAX,
            });
            entry.score += tf as f64 * idf;
            entry.matched.insert(term.to_string());
            entry.anchor = entry.anchor.min(first_offset.max(0) as usize);
        }
    }

    if candidates.is_empty() {
        return Ok(SearchResponse { hits: vec![], total_found: 0 });
    }

    let mut doc_stmt = conn
        .prepare(
            "SELECT path, size_bytes, mtime, file_type, updated_at, normalized_text
             FROM documents WHERE id = ?1",
        )
        .map_err(db_err)?;
    let mut exclude_stmt = conn
        .prepare("SELECT 1 FROM postings WHERE document_id = ?1 AND token = ?2 LIMIT 1")
        .map_err(db_err)?;

    let now = Utc::now();
    let mut hits: Vec<SearchHit> = Vec::new();

    'docs: for (doc_id, candidate) in candidates {
        let row = doc_stmt
            .query_row(params![doc_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .optional()
            .map_err(db_err)?;
        // A posting without its document means the id was reused mid-query;
        // skip rather than fail the whole search.
        let Some((path, size_bytes, mtime, file_type, updated_at, normalized_text)) = row else {
            continue;
        };

        if !file_types.is_empty() && !file_types.iter().any(|ft| *ft == file_type) {
            continue;
        }

        for exclude in &query.excludes {
            let found: Option<i64> = exclude_stmt
                .query_row(params![doc_id, exclude], |row| row.get(0))
                .optional()
                .map_err(db_err)?;
            if found.is_some() {
                continue 'docs;
            }
        }

        if !query.phrases.is_empty() {
            let haystack = normalized_text.to_lowercase();
            if !query.phrases.iter().all(|p| haystack.contains(p.as_str())) {
                continue;
            }
        }

        let mut score = candidate.score;
        let file_name = Path::new(&path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_lowercase();
        if candidate.matched.iter().any(|t| file_name.contains(t.as_str())) {
            score += FILENAME_BONUS;
        }
        score *= recency_factor(age_days(&updated_at, now));

        let matched: Vec<String> = candidate.matched.into_iter().collect();
        let snippet = make_snippet(&normalized_text, candidate.anchor, &matched);
        let title = document_title(conn, doc_id, &path)?;

        hits.push(SearchHit {
            document_id: doc_id,
            path,
            title,
            snippet,
            score,
            matched_tokens: matched,
            file_size: size_bytes.max(0) as u64,
            mtime,
            updated_at,
        });
    }

    let total_found = hits.len();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    hits.truncate(limit);

    Ok(SearchResponse { hits, total_found })
}

fn document_title(conn: &Connection, doc_id: i64, path: &str) -> Result<String, ToolError> {
    let title: Option<String> = conn
        .query_row(
            "SELECT value FROM doc_metadata WHERE document_id = ?1 AND key = 'title' LIMIT 1",
            params![doc_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    Ok(title.unwrap_or_else(|| {
        Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string()
    }))
}

// ---------------------------------------------------------------------------
// Recency
// ---------------------------------------------------------------------------

fn age_days(updated_at: &str, now: DateTime<Utc>) -> f64 {
    match DateTime::parse_from_rfc3339(updated_at) {
        Ok(ts) => (now - ts.with_timezone(&Utc)).num_seconds().max(0) as f64 / 86_400.0,
        Err(_) => RECENCY_SCALE_DAYS * 10.0,
    }
}

/// Monotonically decaying recency multiplier.
pub(crate) fn recency_factor(age_days: f64) -> f64 {
    1.0 + RECENCY_WEIGHT * (-age_days / RECENCY_SCALE_DAYS).exp()
}

// ---------------------------------------------------------------------------
// Snippets
// ---------------------------------------------------------------------------

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Cut a window of at most [`SNIPPET_CHARS`] characters centered on
/// `anchor`, with ellipses for truncation and `**` markers around matched
/// tokens.
pub(crate) fn make_snippet(text: &str, anchor: usize, matched: &[String]) -> String {
    let anchor = floor_boundary(text, anchor);

    // Walk back half a window of characters from the anchor.
    let start = text[..anchor]
        .char_indices()
        .rev()
        .take(SNIPPET_CHARS / 2)
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(anchor);
    let end = text[start..]
        .char_indices()
        .nth(SNIPPET_CHARS)
        .map(|(idx, _)| start + idx)
        .unwrap_or(text.len());

    let window: String = text[start..end]
        .chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .collect();
    let marked = mark_tokens(window.trim(), matched);

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(&marked);
    if end < text.len() {
        snippet.push_str("...");
    }
    snippet
}

/// Wrap whole-token occurrences of `matched` in `**` markers.
fn mark_tokens(window: &str, matched: &[String]) -> String {
    let lower = window.to_lowercase();
    // Lowercasing can change byte lengths for some scripts; marking is
    // best-effort and skipped when offsets would not line up.
    if lower.len() != window.len() {
        return window.to_string();
    }

    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for token in matched {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(token.as_str()) {
            let begin = from + pos;
            let finish = begin + token.len();
            if !window.is_char_boundary(begin) || !window.is_char_boundary(finish) {
                from = finish;
                continue;
            }
            let before_ok = begin == 0
                || !lower[..begin].chars().next_back().map(is_word).unwrap_or(false);
            let after_ok = finish >= lower.len()
                || !lower[finish..].chars().next().map(is_word).unwrap_or(false);
            if before_ok && after_ok {
                ranges.push((begin, finish));
            }
            from = finish;
        }
    }
    if ranges.is_empty() {
        return window.to_string();
    }

    ranges.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (begin, finish) in ranges {
        match merged.last_mut() {
            Some(last) if begin <= last.1 => last.1 = last.1.max(finish),
            _ => merged.push((begin, finish)),
        }
    }

    let mut out = String::with_capacity(window.len() + merged.len() * 4);
    let mut cursor = 0;
    for (begin, finish) in merged {
        out.push_str(&window[cursor..begin]);
        out.push_str("**");
        out.push_str(&window[begin..finish]);
        out.push_str("**");
        cursor = finish;
    }
    out.push_str(&window[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_factor_decays() {
        assert!(recency_factor(0.0) > recency_factor(10.0));
        assert!(recency_factor(10.0) > recency_factor(365.0));
        assert!(recency_factor(0.0) <= 1.0 + RECENCY_WEIGHT);
        assert!(recency_factor(10_000.0) >= 1.0);
    }

    #[test]
    fn snippet_marks_matched_tokens() {
        let text = "Follow the Docker setup guide before deploying.";
        let snippet = make_snippet(text, 11, &["docker".into(), "setup".into()]);
        assert!(snippet.contains("**Docker**"));
        assert!(snippet.contains("**setup**"));
        assert!(!snippet.starts_with("..."));
    }

    #[test]
    fn snippet_windows_long_text_with_ellipses() {
        let mut text = "filler ".repeat(100);
        text.push_str("needle");
        text.push_str(&" filler".repeat(100));
        let anchor = text.find("needle").unwrap();
        let snippet = make_snippet(&text, anchor, &["needle".into()]);
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("**needle**"));
        assert!(snippet.chars().count() <= SNIPPET_CHARS + 10);
    }

    #[test]
    fn marking_respects_token_boundaries() {
        let marked = mark_tokens("dock docker dockerfile", &["docker".into()]);
        assert_eq!(marked, "dock **docker** dockerfile");
    }

    #[test]
    fn snippet_survives_multibyte_anchor() {
        let text = "héllo wörld ≫ Docker";
        let snippet = make_snippet(text, text.find("Docker").unwrap(), &["docker".into()]);
        assert!(snippet.contains("**Docker**"));
    }
}
