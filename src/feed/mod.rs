//! Feed source capability for the ingestion producer.
//!
//! - [`parser`] - RSS/Atom parsing using the `feed-rs` crate
//! - [`fetcher`] - HTTP retrieval with a timeout and body size limit
//!
//! The producer only sees the [`FeedSource`] trait, so tests can substitute
//! an in-memory page.

mod fetcher;
mod parser;

use async_trait::async_trait;

pub use fetcher::{FetchError, HttpFeedSource};
pub use parser::{derive_id, parse_feed};

/// One candidate entry as the feed presents it.
///
/// Every field is optional; the producer decides how to fill gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: Option<String>,
    pub source_url: Option<String>,
    pub title: Option<String>,
    /// Unix seconds
    pub published_at: Option<i64>,
}

/// A bounded page of candidate items from an external feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch at most `limit` entries.
    async fn fetch_page(&self, limit: usize) -> Result<Vec<FeedEntry>, FetchError>;
}
