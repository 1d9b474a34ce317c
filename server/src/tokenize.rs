//! Canonical tokenizer, shared verbatim by the indexing and query paths.
//!
//! A token is a maximal run of alphanumeric characters (plus `_`),
//! lowercased. Tokens shorter than two characters and stop words are
//! dropped. Offsets are byte offsets into the source text, which for
//! indexed documents is the parser's `normalized_text` — the same text
//! snippets are cut from.
//!
//! Query strings additionally understand `"quoted phrases"`, `-exclusion`
//! tokens, and `filetype:` filters; everything else goes through the same
//! `tokenize` function as document text. That equality is load-bearing: a
//! term matches at query time iff it was produced at index time.

use std::collections::HashMap;

/// Tokens shorter than this are dropped.
pub const MIN_TOKEN_LEN: usize = 2;

/// Common English stop words filtered on both sides of the index.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "if",
    "in", "into", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were",
    "will", "with",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ---------------------------------------------------------------------------
// Tokenization
// ---------------------------------------------------------------------------

/// A token with the byte offset of its first character in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub offset: usize,
}

/// Tokenize `text` with the canonical rules.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut start = 0usize;

    for (idx, c) in text.char_indices() {
        if is_token_char(c) {
            if current.is_empty() {
                start = idx;
            }
            for lc in c.to_lowercase() {
                current.push(lc);
            }
        } else if !current.is_empty() {
            push_token(&mut tokens, &mut current, start);
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, &mut current, start);
    }
    tokens
}

fn push_token(tokens: &mut Vec<Token>, current: &mut String, offset: usize) {
    let text = std::mem::take(current);
    if text.chars().count() >= MIN_TOKEN_LEN && !is_stop_word(text.as_str()) {
        tokens.push(Token { text, offset });
    }
}

/// Collapse a token stream into `(term_frequency, first_offset)` per term.
pub fn term_frequencies(tokens: &[Token]) -> HashMap<String, (u32, usize)> {
    let mut freqs: HashMap<String, (u32, usize)> = HashMap::new();
    for token in tokens {
        let entry = freqs.entry(token.text.clone()).or_insert((0, token.offset));
        entry.0 += 1;
    }
    freqs
}

// ---------------------------------------------------------------------------
// Query parsing
// ---------------------------------------------------------------------------

/// A parsed search query: positive terms, phrase fragments, exclusions, and
/// `filetype:` filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub terms: Vec<String>,
    pub phrases: Vec<String>,
    pub excludes: Vec<String>,
    pub file_types: Vec<String>,
}

impl ParsedQuery {
    /// A query with no positive terms cannot match anything and is an error
    /// at the tool layer (`INVALID_QUERY`).
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Stable cache-key component: terms, filters, and phrases in canonical
    /// order-insensitive form.
    pub fn cache_key(&self) -> String {
        let mut terms = self.terms.clone();
        terms.sort();
        terms.dedup();
        let mut phrases = self.phrases.clone();
        phrases.sort();
        let mut excludes = self.excludes.clone();
        excludes.sort();
        let mut types = self.file_types.clone();
        types.sort();
        format!(
            "t={};p={};x={};f={}",
            terms.join(","),
            phrases.join(","),
            excludes.join(","),
            types.join(",")
        )
    }
}

/// Parse a raw query string.
///
/// - `"exact phrase"` fragments are collected for post-filtering; their
///   words also count as positive terms.
/// - `-word` excludes documents containing the token.
/// - `filetype:md` restricts results to that file type.
pub fn parse_query(raw: &str) -> ParsedQuery {
    let mut query = ParsedQuery::default();
    let mut rest = raw;

    // Peel off quoted phrases first; they may contain whitespace.
    let mut unquoted = String::with_capacity(raw.len());
    while let Some(open) = rest.find('"') {
        unquoted.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        match tail.find('"') {
            Some(close) => {
                let phrase = tail[..close].trim();
                if !phrase.is_empty() {
                    query.phrases.push(phrase.to_lowercase());
                    for token in tokenize(phrase) {
                        query.terms.push(token.text);
                    }
                }
                rest = &tail[close + 1..];
            }
            None => {
                // Unbalanced quote: treat the remainder as plain words.
                unquoted.push_str(tail);
                rest = "";
            }
        }
    }
    unquoted.push_str(rest);

    for word in unquoted.split_whitespace() {
        if let Some(stripped) = word.strip_prefix('-') {
            for token in tokenize(stripped) {
                query.excludes.push(token.text);
            }
        } else if let Some(ft) = word.strip_prefix("filetype:") {
            let ft = ft.trim_start_matches('.').to_lowercase();
            if !ft.is_empty() {
                query.file_types.push(ft);
            }
        } else {
            for token in tokenize(word) {
                query.terms.push(token.text);
            }
        }
    }

    query.terms.dedup();
    query
}
