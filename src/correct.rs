//! Correction generation - ask the oracle to rewrite a failing report
//!
//! One oracle call per round: the full current content plus a formatted
//! block per failed citation. The corrected text is taken as-is; nothing
//! validates that untouched passages were preserved (known limitation).

use crate::oracle::prompts::CORRECTION_TEMPLATE;
use crate::oracle::Oracle;
use crate::verify::VerificationResult;

/// Result of one correction round.
#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    pub success: bool,
    pub corrected_content: Option<String>,
    pub tokens_used: u32,
    pub error: Option<String>,
}

/// Format the failed citations into the block the correction prompt expects.
fn format_failures(failures: &[&VerificationResult]) -> String {
    failures
        .iter()
        .map(|failure| {
            let mut block = format!(
                "Source: {}\nProblem quotes: {}\nDetails: {}",
                failure.url,
                failure.quotes.join(", "),
                failure.details,
            );
            if !failure.page_preview.is_empty() {
                block.push_str(&format!("\nPage preview: {}", failure.page_preview));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Rewrites report content to address failed citations, via the oracle.
pub struct CorrectionGenerator<'a, O> {
    oracle: &'a O,
}

impl<'a, O: Oracle> CorrectionGenerator<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        Self { oracle }
    }

    /// Ask the oracle for a corrected report. Oracle failures are folded
    /// into the outcome; this never returns an error.
    pub async fn generate(
        &self,
        content: &str,
        failures: &[&VerificationResult],
    ) -> CorrectionOutcome {
        let errors_block = format_failures(failures);
        let vars = [
            ("original_content", content),
            ("citation_errors", errors_block.as_str()),
        ];

        match self
            .oracle
            .complete_analysis(&[], CORRECTION_TEMPLATE, &vars)
            .await
        {
            Ok(completion) => CorrectionOutcome {
                success: true,
                corrected_content: Some(completion.text),
                tokens_used: completion.tokens_used,
                error: None,
            },
            Err(err) => CorrectionOutcome {
                success: false,
                corrected_content: None,
                tokens_used: 0,
                error: Some(err.to_string()),
            },
        }
    }
}
