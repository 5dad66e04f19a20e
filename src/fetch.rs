//! Page fetching - retrieve and clean the textual content of a source URL
//!
//! The rendering backend sits behind [`PageBackend`] so the production HTTP
//! client and the headless-browser backend are interchangeable. The fetcher
//! owns its backend exclusively; the session is acquired when the fetcher is
//! constructed and released when it is dropped, on every exit path.

use crate::util::collapse_whitespace;
use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use url::Url;

/// Content-region selectors tried in priority order; first non-empty wins.
const CONTENT_SELECTORS: &[&str] = &[
    ".article-body",
    ".post-content",
    ".entry-content",
    ".story-body",
    "#main-content",
    "#content",
    "main",
    "article",
    "body",
];

/// Subtrees skipped entirely when collecting page text.
const SKIP_TAGS: &[&str] = &["script", "style", "nav", "aside", "footer", "header"];

/// Source of rendered HTML for a URL. May fail on timeout or navigation
/// errors; retries are the caller's concern, not the backend's.
#[allow(async_fn_in_trait)]
pub trait PageBackend {
    async fn fetch_rendered(&self, url: &str) -> Result<String>;
}

/// Plain HTTP backend. Pages that require a scripted browser to render
/// their body will come back thin and get reported as insufficient.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("citecheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl PageBackend for HttpBackend {
    async fn fetch_rendered(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("Unsupported URL scheme: {}", parsed.scheme());
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Request to {} returned an error status", url))?;

        response
            .text()
            .await
            .with_context(|| format!("Failed to read body from {}", url))
    }
}

/// Retry and acceptance knobs for [`PageFetcher`]. Tests zero the delays.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_attempts: u32,
    /// Pause after each successful load so late-rendering content settles.
    pub settle_delay: Duration,
    /// Delay before the first retry; multiplied after each failed attempt.
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Cleaned text at or below this many characters is treated as a failed attempt.
    pub min_content_chars: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            settle_delay: Duration::from_secs(2),
            initial_backoff: Duration::from_secs(2),
            backoff_multiplier: 1.5,
            min_content_chars: 100,
        }
    }
}

/// Fetches a URL with bounded retries and returns its cleaned text.
pub struct PageFetcher<B> {
    backend: B,
    options: FetchOptions,
}

impl<B: PageBackend> PageFetcher<B> {
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, FetchOptions::default())
    }

    pub fn with_options(backend: B, options: FetchOptions) -> Self {
        Self { backend, options }
    }

    /// Fetch and clean a page, retrying with multiplicative backoff.
    ///
    /// Returns `None` once attempts are exhausted; fetch failure is a
    /// reported outcome, never an error escaping to the caller.
    pub async fn fetch_page_text(&self, url: &str) -> Option<String> {
        let mut backoff = self.options.initial_backoff;

        for attempt in 1..=self.options.max_attempts {
            match self.backend.fetch_rendered(url).await {
                Ok(html) => {
                    tokio::time::sleep(self.options.settle_delay).await;
                    let text = clean_page_text(&html);
                    if text.chars().count() > self.options.min_content_chars {
                        return Some(text);
                    }
                    eprintln!(
                        "  Thin content from {} (attempt {}/{})",
                        url, attempt, self.options.max_attempts
                    );
                }
                Err(err) => {
                    eprintln!(
                        "  Fetch failed for {} (attempt {}/{}): {}",
                        url, attempt, self.options.max_attempts, err
                    );
                }
            }

            if attempt < self.options.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff = backoff.mul_f64(self.options.backoff_multiplier);
            }
        }

        None
    }
}

/// Reduce rendered HTML to readable article text.
///
/// Tries content-region selectors in priority order, skipping chrome
/// subtrees (script/style/nav/aside/footer/header), and collapses all
/// whitespace to single spaces.
pub fn clean_page_text(html: &str) -> String {
    let document = Html::parse_document(html);

    for selector in CONTENT_SELECTORS {
        let Ok(parsed) = Selector::parse(selector) else {
            continue;
        };
        if let Some(element) = document.select(&parsed).next() {
            let mut raw = String::new();
            push_visible_text(element, &mut raw);
            let text = collapse_whitespace(&raw);
            if !text.is_empty() {
                return text;
            }
        }
    }

    String::new()
}

fn push_visible_text(element: ElementRef, out: &mut String) {
    if SKIP_TAGS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child_element) = ElementRef::wrap(child) {
            push_visible_text(child_element, out);
        }
    }
}
