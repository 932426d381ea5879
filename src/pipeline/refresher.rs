//! Cache refresher: fold durable rows into a fresh snapshot.

use thiserror::Error;

use crate::cache::{CacheError, CacheStore, ItemView, Snapshot, DEFAULT_CACHE_KEY};
use crate::storage::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// What goes into a snapshot and where it is stored.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub key: String,
    pub max_failures: u32,
    /// Pending items updated within this window are included
    pub recent_pending_secs: i64,
    pub max_items: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_CACHE_KEY.to_string(),
            max_failures: super::state::DEFAULT_MAX_FAILURES,
            recent_pending_secs: 3600,
            max_items: 500,
        }
    }
}

/// Build a snapshot from the durable store as of `now`.
///
/// All rows come from one SELECT, so each view is a copy of a single
/// committed row.
pub async fn build_snapshot(
    db: &Database,
    config: &RefreshConfig,
    now: i64,
) -> Result<Snapshot, DatabaseError> {
    let recent_since = now.saturating_sub(config.recent_pending_secs.max(0));
    let items = db
        .snapshot_items(config.max_failures, recent_since, config.max_items)
        .await?;

    Ok(Snapshot {
        built_at: now,
        items: items
            .iter()
            .map(|item| ItemView::from_item(item, config.max_failures))
            .collect(),
    })
}

/// Rebuild the snapshot and replace it in the cache in one write.
///
/// Returns the number of items in the new snapshot. If a snapshot built
/// after `now` is already stored, it is kept and this one is dropped.
pub async fn refresh_snapshot(
    db: &Database,
    cache: &dyn CacheStore,
    config: &RefreshConfig,
    now: i64,
) -> Result<usize, RefreshError> {
    let snapshot = build_snapshot(db, config, now).await?;
    let count = snapshot.items.len();
    if cache.replace_snapshot(&config.key, snapshot).await? {
        tracing::info!(key = %config.key, items = count, "Cache snapshot replaced");
    } else {
        tracing::debug!(key = %config.key, built_at = now, "Newer cache snapshot already stored");
    }
    Ok(count)
}
