use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

/// Durable store: the system of record for every ingested item.
///
/// Cloning is cheap; all clones share one connection pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

/// Connection pool for a SQLite file, created owner-only if missing.
///
/// Shared by the durable store and the SQLite cache store.
pub(crate) async fn open_pool(path: &str) -> Result<SqlitePool, DatabaseError> {
    let url = format!("sqlite:{}?mode=rwc", path);

    // Create the file owner-only before SQLite touches it
    #[cfg(unix)]
    if path != ":memory:" {
        let db_path = std::path::Path::new(path);
        if !db_path.exists() {
            if let Some(parent) = db_path.parent() {
                if parent.as_os_str().is_empty() || parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    // If creation fails, SQLite will report the error at connect_with.
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok();
                }
            }
        }
    }

    // busy_timeout=5000: producer, consumer and read service share one file
    // and SQLite is single-writer, so short waits are expected.
    let options = SqliteConnectOptions::from_str(&url)
        .map_err(DatabaseError::from_sqlx)?
        .pragma("busy_timeout", "5000");
    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10));
    // A shared in-memory database lives only while a connection is open
    if path == ":memory:" {
        pool_options = pool_options
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    pool_options
        .connect_with(options)
        .await
        .map_err(DatabaseError::from_sqlx)
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `path` may be `":memory:"` for an isolated in-process store.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Busy` if another process keeps the database
    /// locked past the busy timeout, `DatabaseError::Migration` if the schema
    /// cannot be created, and `DatabaseError::Other` for everything else.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let pool = open_pool(path).await?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let message = e.to_string();
            if is_lock_message(&message) {
                DatabaseError::Busy
            } else {
                DatabaseError::Migration(message)
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Rows are append/update only; nothing in the pipeline deletes from items.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                title TEXT NOT NULL,
                published_at INTEGER NOT NULL,
                content TEXT,
                sentiment TEXT,
                summary TEXT,
                needs_sentiment INTEGER NOT NULL DEFAULT 1,
                needs_summary INTEGER NOT NULL DEFAULT 1,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                processed_at INTEGER NOT NULL,
                ingested_at INTEGER NOT NULL,
                lease_owner TEXT,
                lease_until INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Partial index covering the consumer's claim query: only rows with
        // pending work, ordered newest-first.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_pending ON items(published_at DESC, id) \
             WHERE needs_sentiment = 1 OR needs_summary = 1",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_processed ON items(processed_at)")
            .execute(&mut *tx)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_published ON items(published_at DESC)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
