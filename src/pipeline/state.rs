//! Item state machine.
//!
//! [`apply_attempt`] is the single place where the outcome of one enrichment
//! attempt is turned into the row written back to the durable store. It is
//! pure so the lifecycle rules can be checked without a database.

use std::fmt;

use crate::storage::{Item, ItemState, ItemUpdate, Sentiment};

/// Retry cap used when none is configured.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// Why an attempt left work undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// Content fetch timed out, failed on the network, or returned an error status
    FetchFailed,
    /// Content was fetched but rejected (paywall, placeholder, too short)
    ContentMismatch,
    SentimentFailed,
    SummaryFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::FetchFailed => "fetch_failed",
            FailureReason::ContentMismatch => "content_mismatch",
            FailureReason::SentimentFailed => "sentiment_failed",
            FailureReason::SummaryFailed => "summary_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded retry policy shared by the consumer and the inspection queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

impl RetryPolicy {
    /// A cap of zero would quarantine items before their first attempt.
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
        }
    }

    pub fn is_exhausted(&self, failure_count: u32) -> bool {
        failure_count >= self.max_failures
    }

    /// Diagnostic stored in `last_error`, e.g. `fetch_failed (attempt 5/5)`.
    pub fn diagnostic(&self, reason: FailureReason, attempt: u32) -> String {
        format!("{} (attempt {}/{})", reason, attempt, self.max_failures)
    }
}

/// Everything one pass over an item produced.
///
/// Steps that were skipped or failed leave their field `None`. `failure`
/// holds the most recent failure; later steps overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attempt {
    /// Body fetched during this attempt (only when the item had none)
    pub fetched_content: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub summary: Option<String>,
    pub failure: Option<FailureReason>,
}

impl Attempt {
    pub fn fail(&mut self, reason: FailureReason) {
        self.failure = Some(reason);
    }
}

/// Compute the row to write back after `attempt` ran against `item`.
///
/// - A flag is cleared only when its result is present, and never set again.
/// - Content already stored is kept; fetched content fills an empty slot.
/// - Clearing both flags makes the item Enriched: the failure count resets
///   and `last_error` is cleared.
/// - Otherwise the failure count goes up by one, capped at the policy maximum,
///   and `last_error` names the reason and attempt number.
pub fn apply_attempt(item: &Item, attempt: Attempt, policy: &RetryPolicy, now: i64) -> ItemUpdate {
    let Attempt {
        fetched_content,
        sentiment,
        summary,
        failure,
    } = attempt;

    let (needs_sentiment, sentiment) = if item.needs_sentiment {
        (sentiment.is_none(), sentiment)
    } else {
        (false, item.sentiment)
    };
    let (needs_summary, summary) = if item.needs_summary {
        (summary.is_none(), summary)
    } else {
        (false, item.summary.clone())
    };
    let content = item.content.clone().or(fetched_content);

    if !needs_sentiment && !needs_summary {
        return ItemUpdate {
            content,
            sentiment,
            summary,
            needs_sentiment,
            needs_summary,
            failure_count: 0,
            last_error: None,
            processed_at: now,
        };
    }

    let reason = failure.unwrap_or(if content.is_none() {
        FailureReason::FetchFailed
    } else if needs_sentiment {
        FailureReason::SentimentFailed
    } else {
        FailureReason::SummaryFailed
    });
    let failure_count = item
        .failure_count
        .saturating_add(1)
        .min(policy.max_failures);

    ItemUpdate {
        content,
        sentiment,
        summary,
        needs_sentiment,
        needs_summary,
        failure_count,
        last_error: Some(policy.diagnostic(reason, failure_count)),
        processed_at: now,
    }
}

/// State an item will be in once `update` is committed.
pub fn resulting_state(update: &ItemUpdate, policy: &RetryPolicy) -> ItemState {
    if !update.needs_sentiment && !update.needs_summary {
        ItemState::Enriched
    } else if policy.is_exhausted(update.failure_count) {
        ItemState::Quarantined
    } else {
        ItemState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn pending_item(failure_count: u32) -> Item {
        Item {
            id: "a".into(),
            source_url: "https://example.com/a".into(),
            title: "A".into(),
            published_at: 10,
            content: None,
            sentiment: None,
            summary: None,
            needs_sentiment: true,
            needs_summary: true,
            failure_count,
            last_error: None,
            processed_at: 10,
            ingested_at: 10,
            lease_owner: None,
            lease_until: None,
        }
    }

    fn full_success() -> Attempt {
        Attempt {
            fetched_content: Some("body".into()),
            sentiment: Some(Sentiment::Positive),
            summary: Some("summary".into()),
            failure: None,
        }
    }

    #[test]
    fn test_both_steps_succeed() {
        let policy = RetryPolicy::default();
        let update = apply_attempt(&pending_item(0), full_success(), &policy, 100);

        assert!(!update.needs_sentiment);
        assert!(!update.needs_summary);
        assert_eq!(update.failure_count, 0);
        assert_eq!(update.last_error, None);
        assert_eq!(update.content.as_deref(), Some("body"));
        assert_eq!(resulting_state(&update, &policy), ItemState::Enriched);
    }

    #[test]
    fn test_success_after_failures_resets_count() {
        let policy = RetryPolicy::default();
        let mut item = pending_item(3);
        item.last_error = Some("fetch_failed (attempt 3/5)".into());

        let update = apply_attempt(&item, full_success(), &policy, 100);
        assert_eq!(update.failure_count, 0);
        assert_eq!(update.last_error, None);
    }

    #[test]
    fn test_fetch_failure_records_attempt() {
        let policy = RetryPolicy::default();
        let mut attempt = Attempt::default();
        attempt.fail(FailureReason::FetchFailed);

        let update = apply_attempt(&pending_item(0), attempt, &policy, 100);
        assert_eq!(update.failure_count, 1);
        assert_eq!(update.last_error.as_deref(), Some("fetch_failed (attempt 1/5)"));
        assert_eq!(resulting_state(&update, &policy), ItemState::Pending);
    }

    #[test]
    fn test_fifth_failure_quarantines() {
        let policy = RetryPolicy::default();
        let mut attempt = Attempt::default();
        attempt.fail(FailureReason::FetchFailed);

        let update = apply_attempt(&pending_item(4), attempt, &policy, 100);
        assert_eq!(update.failure_count, 5);
        assert_eq!(update.last_error.as_deref(), Some("fetch_failed (attempt 5/5)"));
        assert!(update.needs_sentiment && update.needs_summary);
        assert_eq!(resulting_state(&update, &policy), ItemState::Quarantined);
    }

    #[test]
    fn test_partial_success_keeps_result_and_counts_failure() {
        let policy = RetryPolicy::default();
        let mut attempt = Attempt {
            fetched_content: Some("body".into()),
            sentiment: Some(Sentiment::Negative),
            ..Attempt::default()
        };
        attempt.fail(FailureReason::SummaryFailed);

        let update = apply_attempt(&pending_item(0), attempt, &policy, 100);
        assert!(!update.needs_sentiment);
        assert!(update.needs_summary);
        assert_eq!(update.sentiment, Some(Sentiment::Negative));
        assert_eq!(update.failure_count, 1);
        assert_eq!(
            update.last_error.as_deref(),
            Some("summary_failed (attempt 1/5)")
        );
    }

    #[test]
    fn test_existing_content_is_kept() {
        let policy = RetryPolicy::default();
        let mut item = pending_item(1);
        item.content = Some("original".into());
        let mut attempt = full_success();
        attempt.fetched_content = Some("replacement".into());

        let update = apply_attempt(&item, attempt, &policy, 100);
        assert_eq!(update.content.as_deref(), Some("original"));
    }

    #[test]
    fn test_cleared_step_is_not_redone() {
        let policy = RetryPolicy::default();
        let mut item = pending_item(1);
        item.needs_sentiment = false;
        item.sentiment = Some(Sentiment::Mixed);
        item.content = Some("body".into());
        let attempt = Attempt {
            sentiment: Some(Sentiment::Positive),
            summary: Some("s".into()),
            ..Attempt::default()
        };

        let update = apply_attempt(&item, attempt, &policy, 100);
        assert_eq!(update.sentiment, Some(Sentiment::Mixed));
        assert_eq!(resulting_state(&update, &policy), ItemState::Enriched);
    }

    #[test]
    fn test_missing_reason_is_inferred() {
        let policy = RetryPolicy::default();
        let update = apply_attempt(&pending_item(0), Attempt::default(), &policy, 1);
        assert_eq!(update.last_error.as_deref(), Some("fetch_failed (attempt 1/5)"));

        let mut item = pending_item(0);
        item.content = Some("body".into());
        let update = apply_attempt(&item, Attempt::default(), &policy, 1);
        assert_eq!(
            update.last_error.as_deref(),
            Some("sentiment_failed (attempt 1/5)")
        );
    }

    #[test]
    fn test_zero_cap_is_raised_to_one() {
        assert_eq!(RetryPolicy::new(0).max_failures, 1);
    }

    fn arb_sentiment() -> impl Strategy<Value = Option<Sentiment>> {
        prop_oneof![
            Just(None),
            Just(Some(Sentiment::Positive)),
            Just(Some(Sentiment::Negative)),
            Just(Some(Sentiment::Neutral)),
            Just(Some(Sentiment::Mixed)),
        ]
    }

    fn arb_reason() -> impl Strategy<Value = Option<FailureReason>> {
        prop_oneof![
            Just(None),
            Just(Some(FailureReason::FetchFailed)),
            Just(Some(FailureReason::ContentMismatch)),
            Just(Some(FailureReason::SentimentFailed)),
            Just(Some(FailureReason::SummaryFailed)),
        ]
    }

    proptest! {
        #[test]
        fn prop_attempt_invariants(
            needs_sentiment in any::<bool>(),
            needs_summary in any::<bool>(),
            max_failures in 1u32..10,
            count_offset in 0u32..10,
            has_content in any::<bool>(),
            sentiment in arb_sentiment(),
            summary in proptest::option::of("[a-z]{1,12}"),
            failure in arb_reason(),
        ) {
            prop_assume!(needs_sentiment || needs_summary);
            let policy = RetryPolicy::new(max_failures);
            let mut item = pending_item(count_offset % max_failures);
            item.needs_sentiment = needs_sentiment;
            item.needs_summary = needs_summary;
            if has_content {
                item.content = Some("stored".into());
            }
            let attempt = Attempt {
                fetched_content: Some("fetched".into()),
                sentiment,
                summary,
                failure,
            };

            let update = apply_attempt(&item, attempt, &policy, 42);

            // Flags never flip back to true
            prop_assert!(item.needs_sentiment || !update.needs_sentiment);
            prop_assert!(item.needs_summary || !update.needs_summary);
            // Cap is never exceeded
            prop_assert!(update.failure_count <= policy.max_failures);
            // Stored content is never replaced
            if has_content {
                prop_assert_eq!(update.content.as_deref(), Some("stored"));
            }
            if update.needs_sentiment || update.needs_summary {
                prop_assert_eq!(update.failure_count, item.failure_count + 1);
                let suffix = format!("(attempt {}/{})", update.failure_count, max_failures);
                prop_assert!(update.last_error.as_deref().is_some_and(|e| e.ends_with(&suffix)));
            } else {
                prop_assert_eq!(update.failure_count, 0);
                prop_assert!(update.last_error.is_none());
            }
        }

        #[test]
        fn prop_repeated_failures_stop_at_cap(max_failures in 1u32..8, runs in 1usize..20) {
            let policy = RetryPolicy::new(max_failures);
            let mut item = pending_item(0);
            for _ in 0..runs {
                if policy.is_exhausted(item.failure_count) {
                    break;
                }
                let mut attempt = Attempt::default();
                attempt.fail(FailureReason::FetchFailed);
                let update = apply_attempt(&item, attempt, &policy, 1);
                item.failure_count = update.failure_count;
                item.last_error = update.last_error;
            }
            prop_assert!(item.failure_count <= max_failures);
            if runs as u32 >= max_failures {
                prop_assert_eq!(item.state(max_failures), ItemState::Quarantined);
                let expected = format!("fetch_failed (attempt {max_failures}/{max_failures})");
                prop_assert_eq!(item.last_error.as_deref(), Some(expected.as_str()));
            }
        }
    }
}
