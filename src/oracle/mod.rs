//! AI oracle boundary
//!
//! The completion service is a black box behind [`Oracle`]: documents in,
//! prompt template plus named variables in, free-form analysis text out.
//! Failures are classified so call sites can decide what is retryable.

pub mod client;
pub mod prompts;

pub use client::OpenRouterOracle;

use thiserror::Error;

/// A context document handed to the oracle alongside the prompt.
#[derive(Debug, Clone)]
pub struct OracleDocument {
    pub title: String,
    pub content: String,
}

/// Successful oracle completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u32,
}

/// Classified failure kinds from the completion service.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Invalid API key")]
    InvalidKey,
    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server error (HTTP {status})")]
    Server { status: u16 },
}

/// Black-box judgment/generation function.
///
/// One call per analysis: the template is rendered with the supplied
/// variables (unknown placeholders stay literal) and any documents are
/// substituted for `{articles}` when the template asks for them.
#[allow(async_fn_in_trait)]
pub trait Oracle {
    async fn complete_analysis(
        &self,
        documents: &[OracleDocument],
        template: &str,
        vars: &[(&str, &str)],
    ) -> Result<Completion, OracleError>;
}
