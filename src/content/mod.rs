//! Full-text content fetch capability used by the enrichment consumer.

mod reader;

use async_trait::async_trait;
use thiserror::Error;

pub use reader::{ReaderClient, DEFAULT_MIN_CONTENT_CHARS, DEFAULT_READER_BASE_URL};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Article not found")]
    NotFound,
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
    /// Body fetched but it is not the article (paywall, placeholder)
    #[error("Content mismatch: {0}")]
    Mismatch(String),
}

impl ContentError {
    /// Mismatches are recorded as `content_mismatch`; everything else is a
    /// failed fetch.
    pub fn is_mismatch(&self) -> bool {
        matches!(self, ContentError::Mismatch(_))
    }
}

/// Fetches the full body of an article from its source URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, ContentError>;
}
