//! Sentiment and summarization capabilities.
//!
//! Two interchangeable providers:
//!
//! - [`ChatClient`] - any OpenAI-compatible chat-completions endpoint
//! - [`LexiconClassifier`] / [`LeadSummarizer`] - offline, deterministic
//!   fallbacks so the pipeline runs without credentials
//!
//! The consumer bounds every call with its own timeout; implementations do
//! not retry.

mod chat;
mod local;

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::Sentiment;

pub use chat::{ChatClient, DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL};
pub use local::{LeadSummarizer, LexiconClassifier};

/// Longest summary stored on an item.
pub const MAX_SUMMARY_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("No API key configured")]
    MissingApiKey,
    #[error("Provider returned an empty response")]
    EmptyResponse,
    #[error("Unrecognised sentiment label: {0:?}")]
    InvalidLabel(String),
    #[error("Nothing to enrich: input text is empty")]
    EmptyInput,
}

/// Classifies article text into one of the fixed [`Sentiment`] labels.
#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Sentiment, EnrichError>;
}

/// Produces a short single-line summary of article text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, EnrichError>;
}

/// Collapse whitespace and control characters into single spaces and cut to
/// at most `max_chars` characters, preferring a word boundary.
pub(crate) fn one_line(text: &str, max_chars: usize) -> String {
    let collapsed = text
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let cut: String = collapsed.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(idx) if idx > max_chars / 2 => cut[..idx].to_string(),
        _ => cut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_line_collapses_whitespace() {
        assert_eq!(one_line("  a\n\nb\t c\u{0007}d ", 100), "a b c d");
    }

    #[test]
    fn test_one_line_truncates_on_word_boundary() {
        let text = "alpha beta gamma delta";
        assert_eq!(one_line(text, 13), "alpha beta");
        assert!(one_line(&"x".repeat(500), MAX_SUMMARY_CHARS).chars().count() <= MAX_SUMMARY_CHARS);
    }

    #[test]
    fn test_one_line_multibyte_safe() {
        let text = "é".repeat(10);
        assert_eq!(one_line(&text, 3), "ééé");
    }
}
