//! Citation extraction - find URL/quote pairs in report text
//!
//! A citation is one URL occurrence plus every quoted span found in a
//! bounded window of text around it. Extraction is a pure function of the
//! report text; the same URL appearing twice yields two citations with
//! their own (possibly different) quote sets.

use regex::Regex;
use std::sync::OnceLock;

/// Characters of context kept on each side of a URL occurrence.
const CONTEXT_RADIUS_CHARS: usize = 500;

/// One URL occurrence and the quoted material found near it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub url: String,
    /// Quoted spans near the URL, in pattern-precedence order. Not deduplicated.
    pub quotes: Vec<String>,
    /// The surrounding report text the quotes were pulled from.
    pub context_window: String,
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s<>]+").unwrap())
}

fn double_quoted_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)""#).unwrap())
}

fn blockquote_quoted_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^\s*>\s*"([^"]+)""#).unwrap())
}

fn blockquote_bare_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*>\s*(.+)$").unwrap())
}

/// Strip punctuation that prose tends to glue onto the end of a URL.
fn trim_url(raw: &str) -> &str {
    raw.trim_end_matches(|c: char| {
        matches!(
            c,
            '.' | ',' | ';' | ':' | '!' | '?' | '\'' | '"' | ')' | ']' | '}'
        )
    })
}

/// Walk back up to `n` characters from byte offset `from`, staying on char boundaries.
fn chars_back(text: &str, from: usize, n: usize) -> usize {
    let mut idx = from;
    for _ in 0..n {
        match text[..idx].char_indices().next_back() {
            Some((i, _)) => idx = i,
            None => break,
        }
    }
    idx
}

/// Walk forward up to `n` characters from byte offset `from`.
fn chars_forward(text: &str, from: usize, n: usize) -> usize {
    match text[from..].char_indices().nth(n) {
        Some((i, _)) => from + i,
        None => text.len(),
    }
}

/// Extract all quoted spans from a context window, in pattern-precedence
/// order: double-quoted text, blockquote lines carrying quotes, bare
/// blockquote lines. Matches are concatenated across patterns without
/// deduplication, so a `> "..."` line contributes to all three.
fn extract_quotes(window: &str) -> Vec<String> {
    let mut quotes = Vec::new();
    for pattern in [
        double_quoted_pattern(),
        blockquote_quoted_pattern(),
        blockquote_bare_pattern(),
    ] {
        for cap in pattern.captures_iter(window) {
            let quote = cap[1].trim();
            if !quote.is_empty() {
                quotes.push(quote.to_string());
            }
        }
    }
    quotes
}

/// Scan report text for citations, in first-seen URL order.
///
/// Each URL occurrence gets its own context window of up to
/// [`CONTEXT_RADIUS_CHARS`] characters on either side (clipped to the
/// document bounds) and its own quote set. URLs with no nearby quoted
/// text produce citations with empty `quotes`.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let mut citations = Vec::new();

    for m in url_pattern().find_iter(text) {
        let url = trim_url(m.as_str());
        if url.is_empty() {
            continue;
        }

        let start = chars_back(text, m.start(), CONTEXT_RADIUS_CHARS);
        let end = chars_forward(text, m.end(), CONTEXT_RADIUS_CHARS);
        let window = &text[start..end];

        citations.push(Citation {
            url: url.to_string(),
            quotes: extract_quotes(window),
            context_window: window.to_string(),
        });
    }

    citations
}
