//! Enrichment consumer: one bounded, resumable batch per invocation.
//!
//! Items are claimed under a lease, processed strictly one at a time in
//! newest-first order, and each is written back before the next starts. The
//! lease is renewed as each item starts, so it only has to cover one item's
//! calls; an item whose lease ran out and was reclaimed by another consumer
//! is skipped without any external call. If the invocation dies mid-batch,
//! finished items are already durable and unfinished ones become claimable
//! again once their lease expires.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::state::{apply_attempt, resulting_state, Attempt, FailureReason, RetryPolicy};
use crate::content::ContentFetcher;
use crate::enrich::{SentimentClassifier, Summarizer};
use crate::storage::{Database, DatabaseError, Item, ItemState, UpdateGuard};
use crate::util::unix_now;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_LEASE_SECS: i64 = 300;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Batch tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub batch_size: usize,
    pub policy: RetryPolicy,
    /// Seconds an item stays reserved, counted from claim and again from
    /// the moment processing of that item starts
    pub lease_secs: i64,
    /// Upper bound for each external call
    pub call_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            policy: RetryPolicy::default(),
            lease_secs: DEFAULT_LEASE_SECS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Per-batch tally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub enriched: usize,
    /// Failed this attempt but still within the retry budget
    pub failed: usize,
    pub quarantined: usize,
    /// Write-backs rejected because the row moved on underneath
    pub conflicts: usize,
    /// Write-backs or lease renewals that hit a database error
    pub write_errors: usize,
    /// Claimed items skipped because another consumer took over the lease
    pub lost_leases: usize,
}

/// Runs enrichment batches against the durable store.
#[derive(Clone)]
pub struct Consumer {
    db: Database,
    fetcher: Arc<dyn ContentFetcher>,
    classifier: Arc<dyn SentimentClassifier>,
    summarizer: Arc<dyn Summarizer>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(
        db: Database,
        fetcher: Arc<dyn ContentFetcher>,
        classifier: Arc<dyn SentimentClassifier>,
        summarizer: Arc<dyn Summarizer>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            db,
            fetcher,
            classifier,
            summarizer,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Claim and process one batch.
    ///
    /// Only a failure to claim is returned as an error. Per-item failures are
    /// recorded on the row; a rejected or failed write-back is logged and
    /// counted, and the batch carries on.
    pub async fn run_batch(&self) -> Result<BatchReport, DatabaseError> {
        let owner = format!(
            "consumer-{}-{}",
            std::process::id(),
            RUN_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let policy = self.config.policy;

        let items = self
            .db
            .claim_pending(
                self.config.batch_size,
                policy.max_failures,
                self.config.lease_secs,
                &owner,
                unix_now(),
            )
            .await?;

        let mut report = BatchReport {
            claimed: items.len(),
            ..BatchReport::default()
        };
        tracing::info!(owner = %owner, claimed = items.len(), "Claimed enrichment batch");

        for item in &items {
            match self
                .db
                .renew_lease(
                    &item.id,
                    &owner,
                    item.failure_count,
                    self.config.lease_secs,
                    unix_now(),
                )
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        item_id = %item.id,
                        owner = %owner,
                        "Lease taken over before processing, skipping"
                    );
                    report.lost_leases += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(item_id = %item.id, error = %e, "Lease renewal failed");
                    report.write_errors += 1;
                    continue;
                }
            }

            let attempt = self.attempt(item).await;
            let update = apply_attempt(item, attempt, &policy, unix_now());
            let guard = UpdateGuard {
                expected_failure_count: item.failure_count,
                lease_owner: Some(owner.clone()),
                max_failures: policy.max_failures,
            };

            match self.db.update_item(&item.id, &update, &guard).await {
                Ok(true) => match resulting_state(&update, &policy) {
                    ItemState::Enriched => {
                        tracing::info!(item_id = %item.id, "Item enriched");
                        report.enriched += 1;
                    }
                    ItemState::Pending => {
                        tracing::warn!(
                            item_id = %item.id,
                            attempt = update.failure_count,
                            reason = update.last_error.as_deref().unwrap_or_default(),
                            "Enrichment attempt failed"
                        );
                        report.failed += 1;
                    }
                    ItemState::Quarantined => {
                        tracing::warn!(
                            item_id = %item.id,
                            attempt = update.failure_count,
                            reason = update.last_error.as_deref().unwrap_or_default(),
                            "Item quarantined after exhausting retries"
                        );
                        report.quarantined += 1;
                    }
                },
                Ok(false) => {
                    tracing::warn!(
                        item_id = %item.id,
                        expected_failures = item.failure_count,
                        "Write-back rejected: lease lost or row changed"
                    );
                    report.conflicts += 1;
                }
                Err(e) => {
                    tracing::error!(item_id = %item.id, error = %e, "Write-back failed");
                    report.write_errors += 1;
                }
            }
        }

        tracing::info!(
            owner = %owner,
            claimed = report.claimed,
            enriched = report.enriched,
            failed = report.failed,
            quarantined = report.quarantined,
            conflicts = report.conflicts,
            lost_leases = report.lost_leases,
            "Enrichment batch complete"
        );
        Ok(report)
    }

    /// Run every still-needed step for one item. Never fails: failures are
    /// folded into the returned [`Attempt`].
    async fn attempt(&self, item: &Item) -> Attempt {
        let mut fetched_content = None;
        let mut failure = None;

        if item.content.is_none() {
            match self.bounded(self.fetcher.fetch(&item.source_url)).await {
                Ok(Ok(body)) => fetched_content = Some(body),
                Ok(Err(e)) => {
                    let reason = if e.is_mismatch() {
                        FailureReason::ContentMismatch
                    } else {
                        FailureReason::FetchFailed
                    };
                    tracing::debug!(item_id = %item.id, reason = %reason, error = %e, "Content fetch failed");
                    failure = Some(reason);
                }
                Err(_) => {
                    tracing::debug!(item_id = %item.id, "Content fetch timed out");
                    failure = Some(FailureReason::FetchFailed);
                }
            }
        }

        let Some(text) = item.content.as_deref().or(fetched_content.as_deref()) else {
            return Attempt {
                failure,
                ..Attempt::default()
            };
        };

        let mut sentiment = None;
        if item.needs_sentiment {
            match self.bounded(self.classifier.classify(text)).await {
                Ok(Ok(label)) => sentiment = Some(label),
                Ok(Err(e)) => {
                    tracing::debug!(item_id = %item.id, error = %e, "Sentiment call failed");
                    failure = Some(FailureReason::SentimentFailed);
                }
                Err(_) => {
                    tracing::debug!(item_id = %item.id, "Sentiment call timed out");
                    failure = Some(FailureReason::SentimentFailed);
                }
            }
        }

        let mut summary = None;
        if item.needs_summary {
            match self.bounded(self.summarizer.summarize(text)).await {
                Ok(Ok(generated)) => summary = Some(generated),
                Ok(Err(e)) => {
                    tracing::debug!(item_id = %item.id, error = %e, "Summary call failed");
                    failure = Some(FailureReason::SummaryFailed);
                }
                Err(_) => {
                    tracing::debug!(item_id = %item.id, "Summary call timed out");
                    failure = Some(FailureReason::SummaryFailed);
                }
            }
        }

        Attempt {
            fetched_content,
            sentiment,
            summary,
            failure,
        }
    }

    async fn bounded<F: Future>(&self, call: F) -> Result<F::Output, tokio::time::error::Elapsed> {
        tokio::time::timeout(self.config.call_timeout, call).await
    }
}
