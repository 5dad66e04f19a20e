//! Verification loop - extract, verify, correct, repeat
//!
//! The orchestrator drives the whole pipeline across bounded iterations:
//! extract citations from the current content, verify each one in order,
//! then either finish or ask the oracle to rewrite the report and start
//! over on the corrected text. Each iteration is one step of an explicit
//! fold over [`LoopState`]; the loop itself never returns an error. All
//! citation-level failure lives in the returned [`LoopResult`].

use crate::correct::CorrectionGenerator;
use crate::extract::extract_citations;
use crate::fetch::{PageBackend, PageFetcher};
use crate::oracle::Oracle;
use crate::verify::{QuoteVerifier, VerificationResult};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Orchestrator knobs. Tests zero the pacing delay.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub max_iterations: u32,
    /// Delay between citations, to respect third-party rate limits.
    pub citation_pacing: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            citation_pacing: Duration::from_secs(1),
        }
    }
}

/// Cooperative cancellation, checked between citations. Cloning hands the
/// same flag to another task or a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final outcome of a verification run. This shape is stable for
/// downstream consumers; field names are the wire format.
#[derive(Debug, Clone, Serialize)]
pub struct LoopResult {
    /// The loop ran to a terminal state without being aborted. Citation
    /// failures do not clear this; consult `fully_verified` for those.
    pub success: bool,
    pub final_content: String,
    pub verification_results: Vec<VerificationResult>,
    pub iterations_performed: u32,
    /// True iff no result across all iterations was left unverified.
    pub fully_verified: bool,
    /// Oracle tokens spent across both verification and correction calls.
    pub tokens_used: u32,
}

/// State carried between iterations. Each step consumes the previous
/// state and produces the next; history is append-only.
struct LoopState {
    content: String,
    history: Vec<VerificationResult>,
    iterations: u32,
    correction_tokens: u32,
}

impl LoopState {
    fn initial(content: String) -> Self {
        Self {
            content,
            history: Vec::new(),
            iterations: 0,
            correction_tokens: 0,
        }
    }

    fn into_result(self, success: bool) -> LoopResult {
        let fully_verified = !self.history.iter().any(|r| !r.verified);
        let tokens_used = self.correction_tokens
            + self.history.iter().map(|r| r.tokens_used).sum::<u32>();
        LoopResult {
            success,
            final_content: self.content,
            verification_results: self.history,
            iterations_performed: self.iterations,
            fully_verified,
            tokens_used,
        }
    }
}

enum Step {
    Continue(LoopState),
    Finished { state: LoopState, success: bool },
}

/// Drives extraction, verification, and correction to a terminal state.
pub struct VerificationLoop<O, B> {
    oracle: O,
    fetcher: PageFetcher<B>,
    options: LoopOptions,
    cancel: CancelFlag,
}

impl<O: Oracle, B: PageBackend> VerificationLoop<O, B> {
    pub fn new(oracle: O, fetcher: PageFetcher<B>) -> Self {
        Self::with_options(oracle, fetcher, LoopOptions::default())
    }

    pub fn with_options(oracle: O, fetcher: PageFetcher<B>, options: LoopOptions) -> Self {
        Self {
            oracle,
            fetcher,
            options,
            cancel: CancelFlag::new(),
        }
    }

    /// Handle for aborting the run between citations.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run the loop to completion. Never returns an error; every failure
    /// mode is encoded in the result.
    pub async fn run(&self, report_content: &str) -> LoopResult {
        let mut state = LoopState::initial(report_content.to_string());
        loop {
            match self.step(state).await {
                Step::Continue(next) => state = next,
                Step::Finished { state, success } => return state.into_result(success),
            }
        }
    }

    /// One extract → verify → (correct) pass.
    async fn step(&self, state: LoopState) -> Step {
        let LoopState {
            content,
            mut history,
            iterations,
            mut correction_tokens,
        } = state;
        let iteration = iterations + 1;

        let citations = extract_citations(&content);
        eprintln!(
            "  Iteration {}/{}: {} citation(s) to check",
            iteration, self.options.max_iterations, citations.len()
        );

        if citations.is_empty() {
            return Step::Finished {
                state: LoopState {
                    content,
                    history,
                    iterations: iteration,
                    correction_tokens,
                },
                success: true,
            };
        }

        let verifier = QuoteVerifier::new(&self.oracle);
        for (idx, citation) in citations.iter().enumerate() {
            if self.cancel.is_cancelled() {
                eprintln!("  Cancelled during iteration {}", iteration);
                return Step::Finished {
                    state: LoopState {
                        content,
                        history,
                        iterations: iteration,
                        correction_tokens,
                    },
                    success: false,
                };
            }
            if idx > 0 {
                tokio::time::sleep(self.options.citation_pacing).await;
            }

            let page = self.fetcher.fetch_page_text(&citation.url).await;
            let result = verifier.verify_citation(citation, page.as_deref()).await;
            eprintln!(
                "    {} {}",
                if result.verified { "ok " } else { "FAIL" },
                citation.url
            );
            history.push(result);
        }

        let round = &history[history.len() - citations.len()..];
        let failures: Vec<&VerificationResult> = round.iter().filter(|r| !r.verified).collect();

        if failures.is_empty() {
            return Step::Finished {
                state: LoopState {
                    content,
                    history,
                    iterations: iteration,
                    correction_tokens,
                },
                success: true,
            };
        }

        if iteration >= self.options.max_iterations {
            eprintln!(
                "  Iteration limit reached with {} unresolved citation(s)",
                failures.len()
            );
            return Step::Finished {
                state: LoopState {
                    content,
                    history,
                    iterations: iteration,
                    correction_tokens,
                },
                success: true,
            };
        }

        eprintln!("  {} citation(s) failed; requesting a correction", failures.len());
        let outcome = CorrectionGenerator::new(&self.oracle)
            .generate(&content, &failures)
            .await;

        correction_tokens += outcome.tokens_used;
        if outcome.success {
            if let Some(corrected) = outcome.corrected_content {
                eprintln!("  Correction applied ({} tokens used)", outcome.tokens_used);
                return Step::Continue(LoopState {
                    content: corrected,
                    history,
                    iterations: iteration,
                    correction_tokens,
                });
            }
        }

        // Correction failed: stop here with this iteration's input content.
        eprintln!(
            "  Correction failed: {}",
            outcome.error.as_deref().unwrap_or("no content returned")
        );
        Step::Finished {
            state: LoopState {
                content,
                history,
                iterations: iteration,
                correction_tokens,
            },
            success: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchOptions;
    use crate::oracle::prompts::VERIFY_QUOTES_TEMPLATE;
    use crate::oracle::{Completion, OracleDocument, OracleError};
    use crate::verify::FETCH_FAILED_ERROR;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Oracle with scripted replies, keyed on which template was used.
    struct ScriptedOracle {
        verify_replies: Mutex<VecDeque<Result<String, ()>>>,
        correct_replies: Mutex<VecDeque<Result<String, ()>>>,
        correction_calls: Mutex<u32>,
    }

    impl ScriptedOracle {
        fn new(
            verify: Vec<Result<String, ()>>,
            correct: Vec<Result<String, ()>>,
        ) -> Self {
            Self {
                verify_replies: Mutex::new(verify.into_iter().collect()),
                correct_replies: Mutex::new(correct.into_iter().collect()),
                correction_calls: Mutex::new(0),
            }
        }

        fn correction_call_count(&self) -> u32 {
            *self.correction_calls.lock().unwrap()
        }
    }

    impl Oracle for ScriptedOracle {
        async fn complete_analysis(
            &self,
            _documents: &[OracleDocument],
            template: &str,
            _vars: &[(&str, &str)],
        ) -> Result<Completion, OracleError> {
            let reply = if template == VERIFY_QUOTES_TEMPLATE {
                self.verify_replies.lock().unwrap().pop_front()
            } else {
                *self.correction_calls.lock().unwrap() += 1;
                self.correct_replies.lock().unwrap().pop_front()
            };
            match reply.expect("oracle called more times than scripted") {
                Ok(text) => Ok(Completion {
                    text,
                    tokens_used: 10,
                }),
                Err(()) => Err(OracleError::Server { status: 503 }),
            }
        }
    }

    /// Backend that always serves the same page, or always fails.
    struct FixedBackend {
        page: Option<String>,
    }

    impl PageBackend for FixedBackend {
        async fn fetch_rendered(&self, _url: &str) -> anyhow::Result<String> {
            match &self.page {
                Some(html) => Ok(html.clone()),
                None => Err(anyhow::anyhow!("navigation timeout")),
            }
        }
    }

    fn article_page() -> Option<String> {
        Some(format!(
            "<html><body><article>{}</article></body></html>",
            "Relevant source material. ".repeat(10)
        ))
    }

    fn test_loop(
        oracle: ScriptedOracle,
        page: Option<String>,
        max_iterations: u32,
    ) -> VerificationLoop<ScriptedOracle, FixedBackend> {
        let fetcher = PageFetcher::with_options(
            FixedBackend { page },
            FetchOptions {
                settle_delay: Duration::ZERO,
                initial_backoff: Duration::ZERO,
                ..FetchOptions::default()
            },
        );
        VerificationLoop::with_options(
            oracle,
            fetcher,
            LoopOptions {
                max_iterations,
                citation_pacing: Duration::ZERO,
            },
        )
    }

    const QUOTED_REPORT: &str =
        r#"The study found "a bold claim" according to https://example.com/study data."#;

    #[tokio::test]
    async fn test_no_citations_terminates_immediately() {
        let pipeline = test_loop(ScriptedOracle::new(vec![], vec![]), article_page(), 3);
        let result = pipeline.run("No links in this report at all.").await;

        assert!(result.success);
        assert!(result.fully_verified);
        assert_eq!(result.iterations_performed, 1);
        assert!(result.verification_results.is_empty());
        assert_eq!(result.final_content, "No links in this report at all.");
    }

    #[tokio::test]
    async fn test_bare_url_verifies_trivially() {
        let pipeline = test_loop(ScriptedOracle::new(vec![], vec![]), article_page(), 3);
        let result = pipeline
            .run("Background reading: https://example.com/about only.")
            .await;

        assert!(result.fully_verified);
        assert_eq!(result.iterations_performed, 1);
        assert_eq!(result.verification_results.len(), 1);
        assert!(result.verification_results[0].verified);
        assert!(result.verification_results[0].quotes.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_drives_correction() {
        let oracle = ScriptedOracle::new(
            vec![],
            vec![Ok("Rewritten report with no links.".to_string())],
        );
        let pipeline = test_loop(oracle, None, 3);
        let result = pipeline.run(QUOTED_REPORT).await;

        assert_eq!(result.pipeline_failures(), 1);
        assert_eq!(
            result.verification_results[0].error.as_deref(),
            Some(FETCH_FAILED_ERROR)
        );
        assert_eq!(result.final_content, "Rewritten report with no links.");
        assert_eq!(result.iterations_performed, 2);
        assert!(!result.fully_verified);
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_verified_first_round_stops_after_one_iteration() {
        let oracle = ScriptedOracle::new(vec![Ok("VERIFIED: TRUE".to_string())], vec![]);
        let pipeline = test_loop(oracle, article_page(), 3);
        let result = pipeline.run(QUOTED_REPORT).await;

        assert!(result.fully_verified);
        assert_eq!(result.iterations_performed, 1);
        assert_eq!(result.final_content, QUOTED_REPORT);
    }

    #[tokio::test]
    async fn test_correction_failure_terminates_with_input_content() {
        let oracle = ScriptedOracle::new(
            vec![Ok("The page does not support this. VERIFIED: FALSE".to_string())],
            vec![Err(())],
        );
        let pipeline = test_loop(oracle, article_page(), 3);
        let result = pipeline.run(QUOTED_REPORT).await;

        assert!(result.success);
        assert!(!result.fully_verified);
        assert_eq!(result.iterations_performed, 1);
        assert_eq!(result.final_content, QUOTED_REPORT);
    }

    #[tokio::test]
    async fn test_single_iteration_budget_skips_correction() {
        let oracle = ScriptedOracle::new(
            vec![Ok("VERIFIED: FALSE".to_string())],
            vec![Ok("should never be requested".to_string())],
        );
        let pipeline = test_loop(oracle, article_page(), 1);
        let result = pipeline.run(QUOTED_REPORT).await;

        assert_eq!(result.iterations_performed, 1);
        assert!(!result.fully_verified);
        assert_eq!(pipeline.oracle.correction_call_count(), 0);
        assert_eq!(result.final_content, QUOTED_REPORT);
    }

    #[tokio::test]
    async fn test_correction_round_reverifies_new_content() {
        // Round 1 fails, correction rewrites the report, round 2 passes.
        let corrected =
            r#"The study reported "a modest claim" per https://example.com/study data."#;
        let oracle = ScriptedOracle::new(
            vec![
                Ok("VERIFIED: FALSE".to_string()),
                Ok("VERIFIED: TRUE".to_string()),
            ],
            vec![Ok(corrected.to_string())],
        );
        let pipeline = test_loop(oracle, article_page(), 3);
        let result = pipeline.run(QUOTED_REPORT).await;

        assert_eq!(result.iterations_performed, 2);
        assert_eq!(result.final_content, corrected);
        assert_eq!(result.verification_results.len(), 2);
        assert!(!result.verification_results[0].verified);
        assert!(result.verification_results[1].verified);
        // History keeps the round-1 failure, so the run is not fully verified
        // even though the corrected content passed.
        assert!(!result.fully_verified);
    }

    #[tokio::test]
    async fn test_tokens_aggregate_verification_and_correction() {
        // Round 1: one verification (10 tokens) fails, correction (10 tokens)
        // rewrites the report. Round 2: one verification (10 tokens) passes.
        let corrected =
            r#"The study reported "a modest claim" per https://example.com/study data."#;
        let oracle = ScriptedOracle::new(
            vec![
                Ok("VERIFIED: FALSE".to_string()),
                Ok("VERIFIED: TRUE".to_string()),
            ],
            vec![Ok(corrected.to_string())],
        );
        let pipeline = test_loop(oracle, article_page(), 3);
        let result = pipeline.run(QUOTED_REPORT).await;

        let verification_tokens: u32 = result
            .verification_results
            .iter()
            .map(|r| r.tokens_used)
            .sum();
        assert_eq!(verification_tokens, 20);
        // The correction's tokens survive into the result, on top of the
        // per-citation verification tokens.
        assert_eq!(result.tokens_used, 30);
    }

    #[tokio::test]
    async fn test_correction_failure_still_counts_verification_tokens() {
        let oracle = ScriptedOracle::new(
            vec![Ok("VERIFIED: FALSE".to_string())],
            vec![Err(())],
        );
        let pipeline = test_loop(oracle, article_page(), 3);
        let result = pipeline.run(QUOTED_REPORT).await;

        // One verification call at 10 tokens; the failed correction adds none.
        assert_eq!(result.tokens_used, 10);
    }

    #[tokio::test]
    async fn test_rerun_on_verified_content_is_idempotent() {
        // A report that comes back fully verified must classify identically
        // when the loop runs again over the unchanged content.
        let oracle = ScriptedOracle::new(
            vec![
                Ok("VERIFIED: TRUE".to_string()),
                Ok("VERIFIED: TRUE".to_string()),
            ],
            vec![],
        );
        let pipeline = test_loop(oracle, article_page(), 3);

        let first = pipeline.run(QUOTED_REPORT).await;
        assert!(first.fully_verified);

        let second = pipeline.run(&first.final_content).await;
        assert_eq!(second.final_content, first.final_content);
        assert_eq!(second.iterations_performed, first.iterations_performed);
        assert_eq!(
            second
                .verification_results
                .iter()
                .map(|r| r.verified)
                .collect::<Vec<_>>(),
            first
                .verification_results
                .iter()
                .map(|r| r.verified)
                .collect::<Vec<_>>(),
        );
        assert!(second.fully_verified);
    }

    #[tokio::test]
    async fn test_iteration_count_never_exceeds_budget() {
        let oracle = ScriptedOracle::new(
            vec![
                Ok("VERIFIED: FALSE".to_string()),
                Ok("VERIFIED: FALSE".to_string()),
                Ok("VERIFIED: FALSE".to_string()),
            ],
            vec![
                Ok(QUOTED_REPORT.to_string()),
                Ok(QUOTED_REPORT.to_string()),
            ],
        );
        let pipeline = test_loop(oracle, article_page(), 3);
        let result = pipeline.run(QUOTED_REPORT).await;

        assert_eq!(result.iterations_performed, 3);
        assert_eq!(pipeline.oracle.correction_call_count(), 2);
        assert_eq!(result.verification_results.len(), 3);
        assert!(!result.fully_verified);
    }

    #[tokio::test]
    async fn test_cancellation_between_citations() {
        let pipeline = test_loop(ScriptedOracle::new(vec![], vec![]), article_page(), 3);
        pipeline.cancel_flag().cancel();
        let result = pipeline.run(QUOTED_REPORT).await;

        assert!(!result.success);
        assert_eq!(result.iterations_performed, 1);
        assert!(result.verification_results.is_empty());
        assert_eq!(result.final_content, QUOTED_REPORT);
    }

    #[tokio::test]
    async fn test_result_wire_shape() {
        let pipeline = test_loop(ScriptedOracle::new(vec![], vec![]), article_page(), 3);
        let result = pipeline.run("No links.").await;
        let json = serde_json::to_value(&result).unwrap();

        for key in [
            "success",
            "final_content",
            "verification_results",
            "iterations_performed",
            "fully_verified",
            "tokens_used",
        ] {
            assert!(json.get(key).is_some(), "missing key {}", key);
        }
    }

    impl LoopResult {
        /// Count of unverified results, for test readability.
        fn pipeline_failures(&self) -> usize {
            self.verification_results
                .iter()
                .filter(|r| !r.verified)
                .count()
        }
    }
}
