use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::{CacheError, CacheStore, Snapshot};
use crate::storage::open_pool;
use crate::util::unix_now;

/// Default TTL for stored snapshots (24 hours)
const DEFAULT_TTL_HOURS: i64 = 24;

/// Snapshot cache in its own SQLite file.
///
/// Each key is one row holding the whole snapshot as JSON. A single upsert
/// swaps the row, so a reader gets the old body or the new one. Survives
/// process restarts, which the in-memory store does not.
#[derive(Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
    ttl_secs: i64,
}

impl SqliteCacheStore {
    /// Open (or create) the cache file at `path`.
    pub async fn open(path: &str, ttl_hours: Option<i64>) -> Result<Self, CacheError> {
        let pool = open_pool(path).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                built_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        let ttl_hours = ttl_hours.unwrap_or(DEFAULT_TTL_HOURS).max(1);
        Ok(Self {
            pool,
            ttl_secs: ttl_hours * 3600,
        })
    }

    /// Delete all expired snapshots.
    ///
    /// Returns the number of entries evicted.
    pub async fn evict_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM snapshots WHERE expires_at <= ?")
            .bind(unix_now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn replace_snapshot(&self, key: &str, snapshot: Snapshot) -> Result<bool, CacheError> {
        let body = serde_json::to_string(&snapshot)?;
        let expires_at = snapshot.built_at.saturating_add(self.ttl_secs);

        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (key, body, built_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                body = excluded.body,
                built_at = excluded.built_at,
                expires_at = excluded.expires_at
            WHERE excluded.built_at >= snapshots.built_at
        "#,
        )
        .bind(key)
        .bind(&body)
        .bind(snapshot.built_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn read_snapshot(&self, key: &str) -> Result<Option<Arc<Snapshot>>, CacheError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM snapshots WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(unix_now())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((body,)) => Ok(Some(Arc::new(serde_json::from_str(&body)?))),
            None => Ok(None),
        }
    }
}
