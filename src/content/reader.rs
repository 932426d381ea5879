use crate::util::validate_url;
use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{ContentError, ContentFetcher};

pub const DEFAULT_READER_BASE_URL: &str = "https://r.jina.ai";

const MAX_CONTENT_SIZE: usize = 5 * 1024 * 1024; // 5MB

const MIN_REQUEST_INTERVAL_MS: u64 = 100; // 10 requests/sec max
const MAX_COLLISIONS: u64 = 20; // Safety valve for rate limiter collision loop
const RATE_LIMIT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Bodies shorter than this after stripping are treated as placeholders.
pub const DEFAULT_MIN_CONTENT_CHARS: usize = 200;

/// CSS selectors targeting main article content across common news platforms.
/// Order matters: more specific selectors first, generic fallbacks last.
const TARGET_SELECTORS: &str =
    "article, .entry-content, .post-content, .article-content, .post-body, main .content, main";

/// Phrases that only show up on paywall or bot-check interstitials.
const PLACEHOLDER_MARKERS: &[&str] = &[
    "subscribe to continue reading",
    "subscribe to read the full",
    "this content is for subscribers",
    "sign in to continue reading",
    "you have reached your free article limit",
    "please enable javascript to continue",
    "verify you are a human",
];

/// Full-text fetcher backed by a jina.ai-style reader proxy (`{base}/{url}`).
///
/// The proxy returns the page as Markdown. The client paces its own requests,
/// strips common boilerplate, and rejects placeholder bodies as
/// [`ContentError::Mismatch`].
pub struct ReaderClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    min_content_chars: usize,
    timeout: Duration,
    started: Instant,
    last_request_ms: AtomicU64,
}

impl ReaderClient {
    /// Build a client for `base_url`.
    ///
    /// # Errors
    ///
    /// [`ContentError::InsecureBaseUrl`] unless the base is HTTPS, or plain
    /// HTTP on localhost (used by tests).
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<SecretString>,
    ) -> Result<Self, ContentError> {
        let base = base_url.trim_end_matches('/');

        // Keep the API key off plaintext connections
        if !base.starts_with("https://") {
            let is_localhost =
                base.starts_with("http://127.0.0.1") || base.starts_with("http://localhost");
            if !is_localhost {
                tracing::error!(base_url = %base, "Rejecting non-HTTPS reader base URL");
                return Err(ContentError::InsecureBaseUrl);
            }
            tracing::warn!(base_url = %base, "Using non-HTTPS reader base URL (localhost only)");
        }

        Ok(Self {
            client,
            base_url: base.to_string(),
            api_key,
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
            timeout: DEFAULT_TIMEOUT,
            started: Instant::now(),
            last_request_ms: AtomicU64::new(0),
        })
    }

    pub fn with_min_content_chars(mut self, min_content_chars: usize) -> Self {
        self.min_content_chars = min_content_chars;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The API key is only ever sent to the official reader host.
    fn is_official_host(&self) -> bool {
        self.base_url == DEFAULT_READER_BASE_URL || self.base_url == "https://api.jina.ai"
    }

    /// Milliseconds since this client was built (monotonic).
    fn monotonic_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Wait for the next request slot.
    ///
    /// Slots are claimed with compare-exchange so clones of the pipeline
    /// sharing one client cannot exceed the request rate.
    async fn pace(&self) {
        let mut collision_count: u64 = 0;
        let rate_limit_start = Instant::now();
        loop {
            if rate_limit_start.elapsed() > RATE_LIMIT_TIMEOUT {
                tracing::debug!(
                    elapsed_ms = rate_limit_start.elapsed().as_millis(),
                    collisions = collision_count,
                    "Rate limiter timeout budget exceeded, proceeding"
                );
                return;
            }

            // Offset by one interval so the very first request never waits
            let now = self.monotonic_ms() + MIN_REQUEST_INTERVAL_MS;
            let last = self.last_request_ms.load(Ordering::Acquire);
            let next_allowed = last.saturating_add(MIN_REQUEST_INTERVAL_MS);

            if now >= next_allowed {
                match self.last_request_ms.compare_exchange(
                    last,
                    now,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(_) => {
                        collision_count += 1;
                        if collision_count >= MAX_COLLISIONS {
                            tracing::warn!(
                                collisions = collision_count,
                                "Rate limiter max collisions reached, proceeding without slot"
                            );
                            return;
                        }
                        if collision_count > 1 {
                            let backoff_us = 100 * (1u64 << collision_count.min(6));
                            tokio::time::sleep(Duration::from_micros(backoff_us)).await;
                        }
                    }
                }
            } else {
                let wait_ms = next_allowed.saturating_sub(now).max(1);
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
        }
    }

    async fn fetch_once(&self, reader_url: &str, use_selector: bool) -> Result<String, ContentError> {
        self.pace().await;

        let mut request = self.client.get(reader_url);
        if use_selector {
            request = request.header("X-Target-Selector", TARGET_SELECTORS);
        }

        if let Some(key) = &self.api_key {
            if self.is_official_host() {
                tracing::trace!("Reader API authentication configured");
                request = request.header("Authorization", format!("Bearer {}", key.expose_secret()));
            } else {
                tracing::debug!("Skipping API key for non-official reader URL");
            }
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ContentError::Timeout)?
            .map_err(ContentError::Network)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(ContentError::NotFound);
        }
        if !status.is_success() {
            return Err(ContentError::HttpStatus(status.as_u16()));
        }

        tokio::time::timeout(self.timeout, read_limited_text(response, MAX_CONTENT_SIZE))
            .await
            .map_err(|_| ContentError::Timeout)?
    }

    /// Reject bodies that are clearly not the article.
    fn check_body(&self, body: &str) -> Result<(), ContentError> {
        let lowered = body.to_lowercase();
        if let Some(marker) = PLACEHOLDER_MARKERS.iter().find(|m| lowered.contains(*m)) {
            return Err(ContentError::Mismatch(format!("placeholder marker {marker:?}")));
        }

        let chars = body.trim().chars().count();
        if chars < self.min_content_chars {
            return Err(ContentError::Mismatch(format!(
                "body too short ({chars} < {} chars)",
                self.min_content_chars
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentFetcher for ReaderClient {
    async fn fetch(&self, url: &str) -> Result<String, ContentError> {
        // Reader proxies fetch on our behalf, so apply the same SSRF rules
        let parsed_url = validate_url(url).map_err(|_| ContentError::InvalidUrl)?;
        let reader_url = format!("{}/{}", self.base_url, parsed_url.as_str());

        // Selector first for cleaner extraction
        let content = self.fetch_once(&reader_url, true).await?;

        // Some sites don't use standard article/main containers
        let content = if content.len() < self.min_content_chars {
            tracing::debug!(
                content_len = content.len(),
                "Target selector returned minimal content, retrying without selector"
            );
            self.fetch_once(&reader_url, false).await?
        } else {
            content
        };

        let stripped = strip_boilerplate(&content);
        self.check_body(&stripped)?;
        Ok(stripped)
    }
}

/// Strip common boilerplate patterns that reader proxies don't filter.
///
/// Patterns targeted:
/// - "Skip to content" navigation links
/// - Comment section scaffolding (Loading Comments, form fields)
/// - WordPress "Powered by" footers
/// - Consecutive archive link lists (Month Year patterns)
fn strip_boilerplate(content: &str) -> String {
    let mut lines: Vec<&str> = content.lines().collect();

    // Pass 1: Remove individual cruft lines
    lines.retain(|line| {
        let trimmed = line.trim();

        if trimmed.starts_with("[Skip to content]") {
            return false;
        }

        if trimmed == "Loading Comments..."
            || trimmed == "Write a Comment..."
            || trimmed.starts_with("Email (Required)")
            || trimmed == "%d"
        {
            return false;
        }

        if trimmed.contains("Proudly powered by WordPress") {
            return false;
        }

        // Standalone "Menu" text (navigation remnant)
        trimmed != "Menu"
    });

    // Pass 2: Remove consecutive archive link runs (3+ in a row)
    let mut result = Vec::with_capacity(lines.len());
    let mut archive_run_start: Option<usize> = None;
    let mut archive_run_len = 0;

    for line in lines.iter() {
        if is_archive_link(line) {
            if archive_run_start.is_none() {
                archive_run_start = Some(result.len());
            }
            archive_run_len += 1;
            result.push(*line);
        } else {
            if archive_run_len >= 3 {
                if let Some(start) = archive_run_start {
                    result.truncate(start);
                }
            }
            archive_run_start = None;
            archive_run_len = 0;
            result.push(*line);
        }
    }

    if archive_run_len >= 3 {
        if let Some(start) = archive_run_start {
            result.truncate(start);
        }
    }

    result.join("\n")
}

const MONTH_PATTERNS: &[&str] = &[
    "[January",
    "[February",
    "[March",
    "[April",
    "[May",
    "[June",
    "[July",
    "[August",
    "[September",
    "[October",
    "[November",
    "[December",
];

/// Check if a line matches the archive link pattern: "*   [Month Year](url)"
fn is_archive_link(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('*') {
        return false;
    }

    MONTH_PATTERNS.iter().any(|pattern| {
        trimmed.find(pattern).is_some_and(|idx| {
            trimmed[idx + pattern.len()..]
                .get(1..5)
                .is_some_and(|year| year.chars().all(|c| c.is_ascii_digit()))
        })
    })
}

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, ContentError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ContentError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| ContentError::InvalidUtf8)
}
