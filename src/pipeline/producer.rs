//! Ingestion producer: one bounded feed page into new Pending rows.

use thiserror::Error;

use crate::feed::{derive_id, FeedEntry, FeedSource, FetchError};
use crate::storage::{Database, DatabaseError, NewItem};
use crate::util::validate_url;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The feed could not be fetched or parsed; nothing was inserted
    #[error("Feed fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Outcome of one producer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Entries returned by the feed
    pub fetched: usize,
    pub inserted: usize,
    /// Entries whose id already existed
    pub duplicates: usize,
    /// Entries without a usable source URL
    pub skipped: usize,
}

/// Fill the gaps a feed entry may have.
///
/// Returns `None` when the entry has no link, or a link that fails URL
/// validation: there is nothing the consumer could fetch.
pub(crate) fn normalize_entry(entry: FeedEntry, now: i64) -> Option<NewItem> {
    let source_url = entry.source_url?;
    if let Err(e) = validate_url(&source_url) {
        tracing::debug!(url = %source_url, error = %e, "Skipping entry with unusable link");
        return None;
    }

    let title = entry.title.unwrap_or_else(|| "Untitled".to_string());
    let id = entry
        .id
        .unwrap_or_else(|| derive_id(&source_url, &title, entry.published_at));

    Some(NewItem {
        id,
        source_url,
        title,
        published_at: entry.published_at.unwrap_or(now),
    })
}

/// Run one ingestion pass.
///
/// Fetches at most `page_size` entries and inserts each new id as a Pending
/// row. Ids already present are skipped silently, so re-running on an
/// overlapping page is harmless. A feed failure returns before any insert.
pub async fn run_ingest(
    db: &Database,
    source: &dyn FeedSource,
    page_size: usize,
    now: i64,
) -> Result<IngestReport, IngestError> {
    let entries = source.fetch_page(page_size).await?;

    let mut report = IngestReport {
        fetched: entries.len(),
        ..IngestReport::default()
    };

    for entry in entries {
        let Some(item) = normalize_entry(entry, now) else {
            report.skipped += 1;
            continue;
        };

        if db.insert_if_absent(&item, now).await? {
            tracing::debug!(item_id = %item.id, "Inserted pending item");
            report.inserted += 1;
        } else {
            report.duplicates += 1;
        }
    }

    tracing::info!(
        fetched = report.fetched,
        inserted = report.inserted,
        duplicates = report.duplicates,
        skipped = report.skipped,
        "Ingest run complete"
    );
    Ok(report)
}
