use super::schema::Database;
use super::types::{
    DatabaseError, Item, ItemDbRow, ItemUpdate, NewItem, StateCounts, UpdateGuard,
};

/// Column list shared by every item query so `ItemDbRow` always maps.
const ITEM_COLUMNS: &str = "id, source_url, title, published_at, content, sentiment, summary, \
     needs_sentiment, needs_summary, failure_count, last_error, processed_at, ingested_at, \
     lease_owner, lease_until";

/// Upper bound for any single listing query (OOM protection)
const MAX_LIST_LIMIT: i64 = 10_000;

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(MAX_LIST_LIMIT).min(MAX_LIST_LIMIT)
}

fn into_items(rows: Vec<ItemDbRow>) -> Result<Vec<Item>, DatabaseError> {
    rows.into_iter().map(ItemDbRow::into_item).collect()
}

/// Newest-first with id as tiebreaker; the order every batch is processed in.
fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl Database {
    // ========================================================================
    // Producer Operations
    // ========================================================================

    /// Insert a new Pending row unless the id already exists.
    ///
    /// Returns `true` when a row was inserted and `false` for a duplicate.
    /// Existing rows are never touched, so re-ingesting a page is a no-op.
    pub async fn insert_if_absent(&self, item: &NewItem, now: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO items
                (id, source_url, title, published_at, needs_sentiment, needs_summary,
                 failure_count, processed_at, ingested_at)
            VALUES (?, ?, ?, ?, 1, 1, 0, ?, ?)
        "#,
        )
        .bind(&item.id)
        .bind(&item.source_url)
        .bind(&item.title)
        .bind(item.published_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Consumer Operations
    // ========================================================================

    /// Pending items eligible for enrichment, newest first.
    ///
    /// Excludes quarantined rows (`failure_count >= max_failures`) and rows
    /// held by a live lease at `now`. Read-only; see [`Database::claim_pending`]
    /// for the claiming variant used by the consumer.
    pub async fn select_pending(
        &self,
        limit: usize,
        max_failures: u32,
        now: i64,
    ) -> Result<Vec<Item>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM items
            WHERE (needs_sentiment = 1 OR needs_summary = 1)
              AND failure_count < ?
              AND (lease_until IS NULL OR lease_until <= ?)
            ORDER BY published_at DESC, id ASC
            LIMIT ?
        "#
        );
        let rows: Vec<ItemDbRow> = sqlx::query_as(&sql)
            .bind(i64::from(max_failures))
            .bind(now)
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        into_items(rows)
    }

    /// Atomically claim up to `limit` pending items for `owner`.
    ///
    /// Selection and lease assignment happen in one `UPDATE … RETURNING`
    /// statement, so two overlapping consumers can never receive the same
    /// item while its lease (`now + lease_secs`) is live. Expired leases are
    /// reclaimed. The returned items carry the new lease and are ordered
    /// newest-first.
    pub async fn claim_pending(
        &self,
        limit: usize,
        max_failures: u32,
        lease_secs: i64,
        owner: &str,
        now: i64,
    ) -> Result<Vec<Item>, DatabaseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            UPDATE items
            SET lease_owner = ?, lease_until = ?
            WHERE id IN (
                SELECT id FROM items
                WHERE (needs_sentiment = 1 OR needs_summary = 1)
                  AND failure_count < ?
                  AND (lease_until IS NULL OR lease_until <= ?)
                ORDER BY published_at DESC, id ASC
                LIMIT ?
            )
            RETURNING {ITEM_COLUMNS}
        "#
        );
        let rows: Vec<ItemDbRow> = sqlx::query_as(&sql)
            .bind(owner)
            .bind(now.saturating_add(lease_secs.max(0)))
            .bind(i64::from(max_failures))
            .bind(now)
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        // RETURNING order is unspecified; restore the selection order.
        let mut items = into_items(rows)?;
        sort_newest_first(&mut items);
        Ok(items)
    }

    /// Write back the outcome of one enrichment attempt and release the lease.
    ///
    /// Returns `Ok(false)` when the guard rejects the write: the row changed
    /// underneath (failure count moved, lease taken over) or is quarantined.
    ///
    /// The statement itself enforces the per-field invariants: flags can only
    /// go from 1 to 0 (`MIN`), a result is stored only together with the flag
    /// it clears, content is never overwritten once present, and the failure
    /// count never exceeds the cap.
    pub async fn update_item(
        &self,
        id: &str,
        update: &ItemUpdate,
        guard: &UpdateGuard,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE items SET
                content = COALESCE(content, ?),
                sentiment = CASE WHEN needs_sentiment = 1 AND ? = 0 THEN ? ELSE sentiment END,
                summary = CASE WHEN needs_summary = 1 AND ? = 0 THEN ? ELSE summary END,
                needs_sentiment = MIN(needs_sentiment, ?),
                needs_summary = MIN(needs_summary, ?),
                failure_count = MIN(?, ?),
                last_error = ?,
                processed_at = ?,
                lease_owner = NULL,
                lease_until = NULL
            WHERE id = ?
              AND failure_count = ?
              AND failure_count < ?
              AND lease_owner IS ?
        "#,
        )
        .bind(&update.content)
        .bind(update.needs_sentiment)
        .bind(update.sentiment.map(|s| s.as_str()))
        .bind(update.needs_summary)
        .bind(&update.summary)
        .bind(update.needs_sentiment)
        .bind(update.needs_summary)
        .bind(i64::from(update.failure_count))
        .bind(i64::from(guard.max_failures))
        .bind(&update.last_error)
        .bind(update.processed_at)
        .bind(id)
        .bind(i64::from(guard.expected_failure_count))
        .bind(i64::from(guard.max_failures))
        .bind(&guard.lease_owner)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Push the lease on a claimed item out to `now + lease_secs`.
    ///
    /// Called as each item of a batch starts, so a lease only has to outlast
    /// one item rather than the whole batch. Succeeds only while `owner`
    /// still holds the lease and the row has not moved on; once another
    /// consumer has reclaimed the item this returns `Ok(false)` and the
    /// caller must leave the item alone.
    pub async fn renew_lease(
        &self,
        id: &str,
        owner: &str,
        expected_failure_count: u32,
        lease_secs: i64,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE items SET lease_until = ? \
             WHERE id = ? AND lease_owner = ? AND failure_count = ?",
        )
        .bind(now.saturating_add(lease_secs.max(0)))
        .bind(id)
        .bind(owner)
        .bind(i64::from(expected_failure_count))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Cache Refresher Operations
    // ========================================================================

    /// Rows that belong in the read snapshot, newest first.
    ///
    /// Enriched and quarantined items are always included; pending items only
    /// when updated at or after `recent_since`. Runs as a single statement, so
    /// every row reflects one committed write.
    pub async fn snapshot_items(
        &self,
        max_failures: u32,
        recent_since: i64,
        limit: usize,
    ) -> Result<Vec<Item>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM items
            WHERE (needs_sentiment = 0 AND needs_summary = 0)
               OR failure_count >= ?
               OR processed_at >= ?
            ORDER BY published_at DESC, id ASC
            LIMIT ?
        "#
        );
        let rows: Vec<ItemDbRow> = sqlx::query_as(&sql)
            .bind(i64::from(max_failures))
            .bind(recent_since)
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        into_items(rows)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Fetch a single item by id.
    pub async fn get_item(&self, id: &str) -> Result<Option<Item>, DatabaseError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
        let row: Option<ItemDbRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        row.map(ItemDbRow::into_item).transpose()
    }

    /// Quarantined items, most recently failed first.
    pub async fn quarantined_items(
        &self,
        max_failures: u32,
        limit: usize,
    ) -> Result<Vec<Item>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM items
            WHERE (needs_sentiment = 1 OR needs_summary = 1)
              AND failure_count >= ?
            ORDER BY processed_at DESC, id ASC
            LIMIT ?
        "#
        );
        let rows: Vec<ItemDbRow> = sqlx::query_as(&sql)
            .bind(i64::from(max_failures))
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        into_items(rows)
    }

    /// Count rows per lifecycle state.
    pub async fn state_counts(
        &self,
        max_failures: u32,
        now: i64,
    ) -> Result<StateCounts, DatabaseError> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(CASE WHEN (needs_sentiment = 1 OR needs_summary = 1)
                            AND failure_count < ?1 THEN 1 END),
                COUNT(CASE WHEN needs_sentiment = 0 AND needs_summary = 0 THEN 1 END),
                COUNT(CASE WHEN (needs_sentiment = 1 OR needs_summary = 1)
                            AND failure_count >= ?1 THEN 1 END),
                COUNT(CASE WHEN (needs_sentiment = 1 OR needs_summary = 1)
                            AND failure_count < ?1
                            AND lease_until > ?2 THEN 1 END)
            FROM items
        "#,
        )
        .bind(i64::from(max_failures))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(StateCounts {
            pending: row.0,
            enriched: row.1,
            quarantined: row.2,
            leased: row.3,
        })
    }

    /// Total number of rows ever ingested.
    pub async fn count_items(&self) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(row.0)
    }
}
