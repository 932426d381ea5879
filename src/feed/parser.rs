use feed_rs::parser;
use sha2::{Digest, Sha256};

use super::FeedEntry;

/// Parse RSS/Atom bytes into raw entries, in document order.
///
/// Missing fields stay `None`; normalisation (fallback ids, titles,
/// timestamps) is the producer's job.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let id = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());
            let source_url = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .filter(|href| !href.is_empty());
            let published_at = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty());

            FeedEntry {
                id,
                source_url,
                title,
                published_at,
            }
        })
        .collect();

    Ok(entries)
}

/// Deterministic id for entries whose feed supplies none.
///
/// SHA-256 over `url|title|published`, hex encoded, so the same entry seen on
/// two overlapping pages maps to the same id.
pub fn derive_id(url: &str, title: &str, published_at: Option<i64>) -> String {
    let input = format!(
        "{}|{}|{}",
        url,
        title,
        published_at.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
