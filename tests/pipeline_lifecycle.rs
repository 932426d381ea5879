//! End-to-end lifecycle tests: producer, consumer and refresher against one
//! in-memory store, with in-process capabilities standing in for the network.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

use brief::cache::{CacheStore, ItemView, MemoryCacheStore};
use brief::content::{ContentError, ContentFetcher};
use brief::enrich::{EnrichError, LeadSummarizer, LexiconClassifier, SentimentClassifier, Summarizer};
use brief::feed::{FeedEntry, FeedSource, FetchError};
use brief::pipeline::{
    refresh_snapshot, run_ingest, Consumer, ConsumerConfig, RefreshConfig, RetryPolicy,
};
use brief::storage::{Database, ItemState, Sentiment};
use brief::util::unix_now;

const ARTICLE: &str = "The company reported strong growth and record profit this quarter. \
Investors welcomed the results and shares rallied in early trading.";

// ============================================================================
// Test Doubles
// ============================================================================

struct StaticFeed(Vec<FeedEntry>);

#[async_trait]
impl FeedSource for StaticFeed {
    async fn fetch_page(&self, limit: usize) -> Result<Vec<FeedEntry>, FetchError> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
}

/// Content by URL; anything unknown is a network-style failure.
#[derive(Default)]
struct Pages {
    bodies: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl Pages {
    fn serving(urls: &[String]) -> Self {
        Self {
            bodies: urls.iter().map(|u| (u.clone(), ARTICLE.to_string())).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentFetcher for Pages {
    async fn fetch(&self, url: &str) -> Result<String, ContentError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or(ContentError::HttpStatus(503))
    }
}

/// Serves the first URL, then blocks every later call forever.
struct StallsAfterFirst {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ContentFetcher for StallsAfterFirst {
    async fn fetch(&self, url: &str) -> Result<String, ContentError> {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(url.to_string());
            calls.len() == 1
        };
        if !first {
            std::future::pending::<()>().await;
        }
        Ok(ARTICLE.to_string())
    }
}

/// Signals each call and holds it until the gate opens.
struct Gated {
    started: Notify,
    gate: watch::Receiver<bool>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ContentFetcher for Gated {
    async fn fetch(&self, url: &str) -> Result<String, ContentError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.started.notify_one();
        let mut gate = self.gate.clone();
        let _ = gate.wait_for(|open| *open).await;
        Ok(ARTICLE.to_string())
    }
}

/// Takes a fixed wall-clock time per fetch.
struct Slow {
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ContentFetcher for Slow {
    async fn fetch(&self, url: &str) -> Result<String, ContentError> {
        self.calls.lock().unwrap().push(url.to_string());
        tokio::time::sleep(self.delay).await;
        Ok(ARTICLE.to_string())
    }
}

struct Label(Sentiment);

#[async_trait]
impl SentimentClassifier for Label {
    async fn classify(&self, _text: &str) -> Result<Sentiment, EnrichError> {
        Ok(self.0)
    }
}

struct Summary(&'static str);

#[async_trait]
impl Summarizer for Summary {
    async fn summarize(&self, _text: &str) -> Result<String, EnrichError> {
        Ok(self.0.to_string())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn url(n: usize) -> String {
    format!("https://news.example.com/story-{n}")
}

fn entries(range: std::ops::Range<usize>) -> Vec<FeedEntry> {
    range
        .map(|n| FeedEntry {
            id: Some(format!("story-{n}")),
            source_url: Some(url(n)),
            title: Some(format!("Story {n}")),
            published_at: Some(1_000 + n as i64),
        })
        .collect()
}

async fn ingested(range: std::ops::Range<usize>) -> Database {
    let db = Database::open(":memory:").await.unwrap();
    run_ingest(&db, &StaticFeed(entries(range)), 100, unix_now())
        .await
        .unwrap();
    db
}

fn consumer_with(db: &Database, fetcher: Arc<dyn ContentFetcher>, config: ConsumerConfig) -> Consumer {
    Consumer::new(
        db.clone(),
        fetcher,
        Arc::new(Label(Sentiment::Positive)),
        Arc::new(Summary("Profits up.")),
        config,
    )
}

fn quick() -> ConsumerConfig {
    ConsumerConfig {
        call_timeout: Duration::from_millis(500),
        ..ConsumerConfig::default()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn both_steps_succeed_item_is_enriched() {
    let db = ingested(0..1).await;
    let consumer = consumer_with(&db, Arc::new(Pages::serving(&[url(0)])), quick());

    let report = consumer.run_batch().await.unwrap();
    assert_eq!(report.enriched, 1);

    let item = db.get_item("story-0").await.unwrap().unwrap();
    assert!(!item.needs_sentiment);
    assert!(!item.needs_summary);
    assert_eq!(item.failure_count, 0);
    assert_eq!(item.state(5), ItemState::Enriched);
    assert_eq!(item.sentiment, Some(Sentiment::Positive));
    assert_eq!(item.summary.as_deref(), Some("Profits up."));
}

#[tokio::test]
async fn fetch_failing_five_runs_quarantines_item() {
    let db = ingested(0..1).await;
    let consumer = consumer_with(&db, Arc::new(Pages::default()), quick());

    for run in 1..=5u32 {
        let report = consumer.run_batch().await.unwrap();
        assert_eq!(report.claimed, 1, "run {run} should claim the item");
        let item = db.get_item("story-0").await.unwrap().unwrap();
        assert_eq!(item.failure_count, run);
    }

    let item = db.get_item("story-0").await.unwrap().unwrap();
    assert_eq!(item.failure_count, 5);
    assert_eq!(item.state(5), ItemState::Quarantined);
    assert_eq!(item.last_error.as_deref(), Some("fetch_failed (attempt 5/5)"));
    assert!(item.needs_sentiment && item.needs_summary);
    assert!(db.select_pending(10, 5, unix_now()).await.unwrap().is_empty());

    // A sixth run finds nothing and the count stays capped
    let report = consumer.run_batch().await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(db.get_item("story-0").await.unwrap().unwrap().failure_count, 5);

    let quarantined = db.quarantined_items(5, 10).await.unwrap();
    assert_eq!(quarantined.len(), 1);
}

#[tokio::test]
async fn producer_skips_existing_ids() {
    let db = ingested(0..3).await;

    let report = run_ingest(&db, &StaticFeed(entries(0..3)), 100, unix_now())
        .await
        .unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.duplicates, 3);

    let report = run_ingest(&db, &StaticFeed(entries(2..5)), 100, unix_now())
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(db.count_items().await.unwrap(), 5);
}

#[tokio::test]
async fn interrupted_batch_resumes_to_same_outcome() {
    let urls: Vec<String> = (0..3).map(url).collect();

    // Reference: one uninterrupted run
    let reference = ingested(0..3).await;
    consumer_with(&reference, Arc::new(Pages::serving(&urls)), quick())
        .run_batch()
        .await
        .unwrap();

    // Interrupted: the batch is dropped while stuck on its second item
    let db = ingested(0..3).await;
    let stalled = consumer_with(
        &db,
        Arc::new(StallsAfterFirst {
            calls: Mutex::new(Vec::new()),
        }),
        ConsumerConfig {
            lease_secs: 0,
            call_timeout: Duration::from_secs(3600),
            ..ConsumerConfig::default()
        },
    );
    let killed = tokio::time::timeout(Duration::from_millis(300), stalled.run_batch()).await;
    assert!(killed.is_err());

    // The newest item was committed before the interruption
    let first = db.get_item("story-2").await.unwrap().unwrap();
    assert_eq!(first.state(5), ItemState::Enriched);
    assert_eq!(db.get_item("story-1").await.unwrap().unwrap().failure_count, 0);

    let pages = Arc::new(Pages::serving(&urls));
    let report = consumer_with(&db, pages.clone(), quick())
        .run_batch()
        .await
        .unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(pages.calls(), vec![url(1), url(0)]);

    for id in ["story-0", "story-1", "story-2"] {
        let resumed = db.get_item(id).await.unwrap().unwrap();
        let expected = reference.get_item(id).await.unwrap().unwrap();
        assert_eq!(resumed.state(5), expected.state(5));
        assert_eq!(resumed.sentiment, expected.sentiment);
        assert_eq!(resumed.summary, expected.summary);
        assert_eq!(resumed.content, expected.content);
        assert_eq!(resumed.failure_count, expected.failure_count);
        assert_eq!(resumed.last_error, expected.last_error);
    }
}

#[tokio::test]
async fn overlapping_consumers_never_share_items() {
    let db = ingested(0..4).await;
    let (open_gate, gate) = watch::channel(false);
    let gated = Arc::new(Gated {
        started: Notify::new(),
        gate,
        calls: Mutex::new(Vec::new()),
    });

    let first = consumer_with(
        &db,
        gated.clone(),
        ConsumerConfig {
            batch_size: 2,
            ..ConsumerConfig::default()
        },
    );
    let running = tokio::spawn(async move { first.run_batch().await });
    gated.started.notified().await;

    let pages = Arc::new(Pages::serving(&(0..4).map(url).collect::<Vec<_>>()));
    let second = consumer_with(&db, pages.clone(), quick());
    let report = second.run_batch().await.unwrap();
    assert_eq!(report.claimed, 2);

    open_gate.send(true).unwrap();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.enriched, 2);

    let mut all: Vec<String> = gated.calls.lock().unwrap().clone();
    all.extend(pages.calls());
    all.sort();
    let mut expected: Vec<String> = (0..4).map(url).collect();
    expected.sort();
    assert_eq!(all, expected);

    assert_eq!(db.state_counts(5, unix_now()).await.unwrap().enriched, 4);
}

#[tokio::test]
async fn late_consumer_does_not_redo_items_in_flight() {
    // The whole batch takes longer than one lease. Leases have one-second
    // resolution, so the timings keep a margin of at least half a second.
    let db = ingested(0..5).await;
    let slow = Arc::new(Slow {
        delay: Duration::from_millis(1_200),
        calls: Mutex::new(Vec::new()),
    });
    let config = ConsumerConfig {
        lease_secs: 4,
        call_timeout: Duration::from_millis(1_300),
        ..ConsumerConfig::default()
    };

    let first = consumer_with(&db, slow.clone(), config.clone());
    let running = tokio::spawn(async move { first.run_batch().await });

    // By now the batch lease has expired; story-1 is in flight and story-0
    // has not been started
    tokio::time::sleep(Duration::from_millis(4_200)).await;
    let second = consumer_with(&db, slow.clone(), config);
    let late = second.run_batch().await.unwrap();
    assert_eq!(late.claimed, 1);
    assert_eq!(late.enriched, 1);

    let early = running.await.unwrap().unwrap();
    assert_eq!(early.claimed, 5);
    assert_eq!(early.enriched, 4);
    assert_eq!(early.lost_leases, 1);
    assert_eq!(early.conflicts, 0);

    let mut calls = slow.calls.lock().unwrap().clone();
    calls.sort();
    let mut expected: Vec<String> = (0..5).map(url).collect();
    expected.sort();
    assert_eq!(calls, expected, "every item fetched exactly once");
    assert_eq!(db.state_counts(5, unix_now()).await.unwrap().enriched, 5);
}

#[tokio::test]
async fn snapshot_items_match_committed_rows() {
    let db = ingested(0..4).await;
    // Two items enrich, two fail once
    let pages = Arc::new(Pages::serving(&[url(3), url(1)]));
    consumer_with(&db, pages, quick()).run_batch().await.unwrap();

    let cache = MemoryCacheStore::default();
    let config = RefreshConfig::default();
    let count = refresh_snapshot(&db, &cache, &config, unix_now()).await.unwrap();
    assert_eq!(count, 4);

    let snapshot = cache.read_snapshot(&config.key).await.unwrap().unwrap();
    for view in &snapshot.items {
        let row = db.get_item(&view.id).await.unwrap().unwrap();
        assert_eq!(view, &ItemView::from_item(&row, config.max_failures));
    }
    let states: Vec<ItemState> = snapshot.items.iter().map(|v| v.state).collect();
    assert_eq!(
        states,
        vec![
            ItemState::Enriched,
            ItemState::Pending,
            ItemState::Enriched,
            ItemState::Pending
        ]
    );
}

#[tokio::test]
async fn local_provider_enriches_without_network() {
    let db = ingested(0..1).await;
    let consumer = Consumer::new(
        db.clone(),
        Arc::new(Pages::serving(&[url(0)])),
        Arc::new(LexiconClassifier::new()),
        Arc::new(LeadSummarizer::default()),
        ConsumerConfig {
            policy: RetryPolicy::new(3),
            ..quick()
        },
    );

    consumer.run_batch().await.unwrap();
    let item = db.get_item("story-0").await.unwrap().unwrap();
    assert_eq!(item.state(3), ItemState::Enriched);
    assert_eq!(item.sentiment, Some(Sentiment::Positive));
    let summary = item.summary.unwrap();
    assert!(summary.starts_with("The company reported strong growth"));
    assert!(!summary.contains('\n'));
}
