//! OpenRouter-compatible chat-completions client
//!
//! One blocking-from-the-caller's-perspective call per analysis, with
//! automatic retry on rate limits. Failures map onto [`OracleError`] kinds
//! so call sites can fold them into per-citation outcomes.

use super::prompts::{render_prompt, ANALYST_SYSTEM};
use super::{Completion, Oracle, OracleDocument, OracleError};
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";
const MAX_COMPLETION_TOKENS: u32 = 8192;

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

/// Extract a retry-after hint from a rate-limit response body, if present.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    for word in text_lower[pos..].split_whitespace().skip(1).take(5) {
        if let Ok(secs) = word.trim_matches(|c: char| !c.is_numeric()).parse::<u64>() {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}

/// Stateless-per-call completion client. Safe to share across components.
pub struct OpenRouterOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenRouterOracle {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }
}

impl Oracle for OpenRouterOracle {
    async fn complete_analysis(
        &self,
        documents: &[OracleDocument],
        template: &str,
        vars: &[(&str, &str)],
    ) -> Result<Completion, OracleError> {
        let user = render_prompt(template, documents, vars);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: ANALYST_SYSTEM.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            max_tokens: MAX_COMPLETION_TOKENS,
            stream: false,
        };

        let mut retry_count = 0;

        loop {
            let response = self
                .client
                .post(OPENROUTER_URL)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        OracleError::Timeout
                    } else {
                        OracleError::Network(e.to_string())
                    }
                })?;

            let status = response.status();
            let text = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    OracleError::Network(e.to_string())
                }
            })?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    OracleError::Network(format!("Unexpected response shape: {}", e))
                })?;

                let content = parsed
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .unwrap_or_default();
                let tokens_used = parsed.usage.unwrap_or_default().total_tokens;

                return Ok(Completion {
                    text: content,
                    tokens_used,
                });
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after_secs = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });
                eprintln!(
                    "  Oracle rate limited. Retrying in {}s (attempt {}/{})",
                    retry_after_secs, retry_count, MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                continue;
            }

            return Err(match status.as_u16() {
                401 | 403 => OracleError::InvalidKey,
                400 | 404 | 422 => OracleError::BadRequest(truncate(&text, 200)),
                408 => OracleError::Timeout,
                429 => OracleError::RateLimited {
                    retries: retry_count,
                },
                s if (500..=599).contains(&s) => OracleError::Server { status: s },
                _ => OracleError::Network(format!("API error {}: {}", status, truncate(&text, 200))),
            });
        }
    }
}
