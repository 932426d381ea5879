//! Cache store: read-optimised snapshots of the item list.
//!
//! A [`Snapshot`] is always built whole and written with one
//! [`CacheStore::replace_snapshot`] call. Readers see either the previous
//! snapshot or the new one, never a mix. The cache is never the source of
//! truth and may be dropped and rebuilt at any time.

mod memory;
mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::storage::{DatabaseError, Item, ItemState, Sentiment};

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

/// Default snapshot key used by the refresher and read service.
pub const DEFAULT_CACHE_KEY: &str = "items:latest";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Cache store unavailable: {0}")]
    Open(#[from] DatabaseError),
    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Cache lock poisoned")]
    Poisoned,
}

/// One item as served to readers.
///
/// Copied field-for-field from a single committed row; content is left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemView {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub published_at: i64,
    pub sentiment: Option<Sentiment>,
    pub summary: Option<String>,
    pub needs_sentiment: bool,
    pub needs_summary: bool,
    pub state: ItemState,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub processed_at: i64,
}

impl ItemView {
    pub fn from_item(item: &Item, max_failures: u32) -> Self {
        Self {
            id: item.id.clone(),
            source_url: item.source_url.clone(),
            title: item.title.clone(),
            published_at: item.published_at,
            sentiment: item.sentiment,
            summary: item.summary.clone(),
            needs_sentiment: item.needs_sentiment,
            needs_summary: item.needs_summary,
            state: item.state(max_failures),
            failure_count: item.failure_count,
            last_error: item.last_error.clone(),
            processed_at: item.processed_at,
        }
    }
}

/// Complete, immutable item list as of `built_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix seconds when the rows were read
    pub built_at: i64,
    pub items: Vec<ItemView>,
}

impl Snapshot {
    pub fn age_secs(&self, now: i64) -> i64 {
        now.saturating_sub(self.built_at).max(0)
    }
}

/// Whole-value snapshot storage keyed by name.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Atomically replace whatever is stored under `key`, unless the stored
    /// snapshot was built later than `snapshot`.
    ///
    /// Returns `false` when the write was skipped for that reason.
    async fn replace_snapshot(&self, key: &str, snapshot: Snapshot) -> Result<bool, CacheError>;

    /// The snapshot under `key`, or `None` when absent or expired.
    async fn read_snapshot(&self, key: &str) -> Result<Option<Arc<Snapshot>>, CacheError>;
}
