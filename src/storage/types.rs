use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Durable store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the write lock longer than the busy timeout
    #[error("Database is busy: another process holds the lock")]
    Busy,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored row could not be mapped back to an item
    #[error("Corrupt row for item {id}: {reason}")]
    CorruptRow { id: String, reason: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::Busy;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) surface only as text.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
}

// ============================================================================
// Sentiment
// ============================================================================

/// Fixed label set returned by the sentiment capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl Sentiment {
    pub const ALL: [Sentiment; 4] = [
        Sentiment::Positive,
        Sentiment::Negative,
        Sentiment::Neutral,
        Sentiment::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Mixed => "mixed",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Sentiment::ALL
            .into_iter()
            .find(|label| label.as_str() == normalized)
            .ok_or_else(|| format!("unknown sentiment label: {s:?}"))
    }
}

// ============================================================================
// Item State
// ============================================================================

/// Enrichment lifecycle state, derived from flags and failure count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// At least one flag set and retry budget remaining
    Pending,
    /// Both flags cleared
    Enriched,
    /// Retry budget exhausted; flags left set on purpose
    Quarantined,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::Pending => "pending",
            ItemState::Enriched => "enriched",
            ItemState::Quarantined => "quarantined",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A candidate row produced by ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub published_at: i64,
}

/// One ingested news entry and its enrichment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub published_at: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub summary: Option<String>,
    pub needs_sentiment: bool,
    pub needs_summary: bool,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub processed_at: i64,
    pub ingested_at: i64,
    #[serde(skip)]
    pub lease_owner: Option<String>,
    #[serde(skip)]
    pub lease_until: Option<i64>,
}

impl Item {
    /// Derive the lifecycle state under a retry cap of `max_failures`.
    ///
    /// Enriched wins over Quarantined: an item whose last step succeeded on
    /// the final allowed attempt is enriched, not quarantined.
    pub fn state(&self, max_failures: u32) -> ItemState {
        if !self.needs_sentiment && !self.needs_summary {
            ItemState::Enriched
        } else if self.failure_count >= max_failures {
            ItemState::Quarantined
        } else {
            ItemState::Pending
        }
    }

    pub fn has_pending_work(&self) -> bool {
        self.needs_sentiment || self.needs_summary
    }
}

/// Full set of mutable fields written back after one enrichment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUpdate {
    /// Stored only when the row has no content yet
    pub content: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub summary: Option<String>,
    pub needs_sentiment: bool,
    pub needs_summary: bool,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub processed_at: i64,
}

/// Optimistic-concurrency preconditions for [`ItemUpdate`].
///
/// The write applies only when the stored row still carries the failure count
/// and lease owner the attempt started from, and is not yet quarantined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateGuard {
    pub expected_failure_count: u32,
    pub lease_owner: Option<String>,
    pub max_failures: u32,
}

/// Row counts per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: i64,
    pub enriched: i64,
    pub quarantined: i64,
    /// Pending rows currently held by a live lease
    pub leased: i64,
}

impl StateCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.enriched + self.quarantined
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

/// Internal row type for item queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemDbRow {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub published_at: i64,
    pub content: Option<String>,
    pub sentiment: Option<String>,
    pub summary: Option<String>,
    pub needs_sentiment: bool,
    pub needs_summary: bool,
    pub failure_count: i64,
    pub last_error: Option<String>,
    pub processed_at: i64,
    pub ingested_at: i64,
    pub lease_owner: Option<String>,
    pub lease_until: Option<i64>,
}

impl ItemDbRow {
    pub(crate) fn into_item(self) -> Result<Item, DatabaseError> {
        let sentiment = match self.sentiment.as_deref() {
            Some(label) => Some(label.parse::<Sentiment>().map_err(|reason| {
                DatabaseError::CorruptRow {
                    id: self.id.clone(),
                    reason,
                }
            })?),
            None => None,
        };
        let failure_count =
            u32::try_from(self.failure_count).map_err(|_| DatabaseError::CorruptRow {
                id: self.id.clone(),
                reason: format!("failure_count out of range: {}", self.failure_count),
            })?;

        Ok(Item {
            id: self.id,
            source_url: self.source_url,
            title: self.title,
            published_at: self.published_at,
            content: self.content,
            sentiment,
            summary: self.summary,
            needs_sentiment: self.needs_sentiment,
            needs_summary: self.needs_summary,
            failure_count,
            last_error: self.last_error,
            processed_at: self.processed_at,
            ingested_at: self.ingested_at,
            lease_owner: self.lease_owner,
            lease_until: self.lease_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(needs_sentiment: bool, needs_summary: bool, failure_count: u32) -> Item {
        Item {
            id: "a".into(),
            source_url: "https://example.com/a".into(),
            title: "A".into(),
            published_at: 0,
            content: None,
            sentiment: None,
            summary: None,
            needs_sentiment,
            needs_summary,
            failure_count,
            last_error: None,
            processed_at: 0,
            ingested_at: 0,
            lease_owner: None,
            lease_until: None,
        }
    }

    #[test]
    fn test_state_derivation() {
        assert_eq!(item(true, true, 0).state(5), ItemState::Pending);
        assert_eq!(item(false, true, 4).state(5), ItemState::Pending);
        assert_eq!(item(false, false, 0).state(5), ItemState::Enriched);
        assert_eq!(item(true, false, 5).state(5), ItemState::Quarantined);
    }

    #[test]
    fn test_enriched_takes_precedence_over_cap() {
        assert_eq!(item(false, false, 5).state(5), ItemState::Enriched);
    }

    #[test]
    fn test_sentiment_parse_is_case_insensitive() {
        assert_eq!(" Positive ".parse::<Sentiment>(), Ok(Sentiment::Positive));
        assert_eq!("MIXED".parse::<Sentiment>(), Ok(Sentiment::Mixed));
        assert!("bullish".parse::<Sentiment>().is_err());
    }

    #[test]
    fn test_corrupt_sentiment_label_reported() {
        let row = ItemDbRow {
            id: "x".into(),
            source_url: "https://example.com/x".into(),
            title: "X".into(),
            published_at: 1,
            content: None,
            sentiment: Some("bullish".into()),
            summary: None,
            needs_sentiment: false,
            needs_summary: true,
            failure_count: 0,
            last_error: None,
            processed_at: 1,
            ingested_at: 1,
            lease_owner: None,
            lease_until: None,
        };
        assert!(matches!(
            row.into_item(),
            Err(DatabaseError::CorruptRow { ref id, .. }) if id == "x"
        ));
    }
}
