//! citecheck library crate
//!
//! Exposes the verification pipeline so tests and external tooling can
//! drive it with their own oracle and page-backend implementations.

pub mod config;
pub mod correct;
pub mod extract;
pub mod fetch;
pub mod oracle;
pub mod pipeline;
pub mod util;
pub mod verify;

pub use correct::{CorrectionGenerator, CorrectionOutcome};
pub use extract::{extract_citations, Citation};
pub use fetch::{FetchOptions, HttpBackend, PageBackend, PageFetcher};
pub use oracle::{Completion, OpenRouterOracle, Oracle, OracleDocument, OracleError};
pub use pipeline::{CancelFlag, LoopOptions, LoopResult, VerificationLoop};
pub use verify::{QuoteVerifier, VerificationResult};
