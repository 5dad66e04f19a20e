//! Quote verification - judge citations against fetched page text
//!
//! The oracle does the semantic comparison; this module frames the request,
//! classifies the free-form analysis, and folds every failure mode into a
//! [`VerificationResult`] rather than letting anything propagate.

use crate::extract::Citation;
use crate::oracle::prompts::VERIFY_QUOTES_TEMPLATE;
use crate::oracle::Oracle;
use crate::util::{truncate, truncate_chars};
use serde::Serialize;

/// How much page text the oracle sees.
const PAGE_EXCERPT_CHARS: usize = 4000;
/// How much page text the result keeps for humans.
const PAGE_PREVIEW_CHARS: usize = 300;

pub const FETCH_FAILED_ERROR: &str = "Could not fetch page content";

/// Outcome of checking one citation in one iteration. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub url: String,
    pub verified: bool,
    pub quotes: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub page_preview: String,
    pub details: String,
    pub tokens_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Classify the oracle's free-form analysis into verified / not verified.
///
/// A constrained `VERDICT:` line wins when the oracle emitted one. Otherwise
/// the legacy substring heuristic applies: the uppercased analysis counts as
/// verified iff it contains "VERIFIED: TRUE" or "ACCURATE". The heuristic is
/// knowingly coarse ("inaccurate" contains "accurate") and is kept for
/// compatibility; the verdict line exists to sidestep it.
pub(crate) fn classify_analysis(analysis: &str) -> bool {
    if let Some(verdict) = parse_verdict_line(analysis) {
        return verdict;
    }
    let upper = analysis.to_uppercase();
    upper.contains("VERIFIED: TRUE") || upper.contains("ACCURATE")
}

fn parse_verdict_line(analysis: &str) -> Option<bool> {
    analysis.lines().rev().find_map(|line| {
        let rest = line.trim().strip_prefix("VERDICT:")?;
        match rest.trim().to_uppercase().as_str() {
            "ACCURATE" => Some(true),
            "INACCURATE" => Some(false),
            _ => None,
        }
    })
}

fn format_quotes(quotes: &[String]) -> String {
    quotes
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. \"{}\"", i + 1, q))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Judges citations against fetched page text via the oracle.
pub struct QuoteVerifier<'a, O> {
    oracle: &'a O,
}

impl<'a, O: Oracle> QuoteVerifier<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        Self { oracle }
    }

    /// Verify one citation against its (possibly absent) page text.
    ///
    /// Never returns an error: fetch failure, empty quote lists, and oracle
    /// failures all map onto fields of the result.
    pub async fn verify_citation(
        &self,
        citation: &Citation,
        page_text: Option<&str>,
    ) -> VerificationResult {
        // A bare URL with no quoted claim has nothing that can fail,
        // whatever happened to the fetch.
        if citation.quotes.is_empty() {
            return VerificationResult {
                url: citation.url.clone(),
                verified: true,
                quotes: Vec::new(),
                page_preview: page_text
                    .map(|t| truncate(t, PAGE_PREVIEW_CHARS))
                    .unwrap_or_default(),
                details: "No quoted text near this URL; nothing to verify".to_string(),
                tokens_used: 0,
                error: None,
            };
        }

        let Some(page_text) = page_text else {
            return VerificationResult {
                url: citation.url.clone(),
                verified: false,
                quotes: citation.quotes.clone(),
                page_preview: String::new(),
                details: "Page was unreachable or had no usable content".to_string(),
                tokens_used: 0,
                error: Some(FETCH_FAILED_ERROR.to_string()),
            };
        };

        let page_preview = truncate(page_text, PAGE_PREVIEW_CHARS);

        let quotes_block = format_quotes(&citation.quotes);
        let excerpt = truncate_chars(page_text, PAGE_EXCERPT_CHARS);
        let vars = [
            ("quotes_to_verify", quotes_block.as_str()),
            ("page_content", excerpt),
            ("source_url", citation.url.as_str()),
        ];

        match self
            .oracle
            .complete_analysis(&[], VERIFY_QUOTES_TEMPLATE, &vars)
            .await
        {
            Ok(completion) => VerificationResult {
                url: citation.url.clone(),
                verified: classify_analysis(&completion.text),
                quotes: citation.quotes.clone(),
                page_preview,
                details: completion.text,
                tokens_used: completion.tokens_used,
                error: None,
            },
            Err(err) => VerificationResult {
                url: citation.url.clone(),
                verified: false,
                quotes: citation.quotes.clone(),
                page_preview,
                details: err.to_string(),
                tokens_used: 0,
                error: None,
            },
        }
    }
}
