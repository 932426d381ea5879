//! The incremental enrichment pipeline.
//!
//! - [`state`] - item state machine and retry policy
//! - [`producer`] - feed page into Pending rows
//! - [`consumer`] - leased, resumable enrichment batches
//! - [`refresher`] - durable rows into a cache snapshot
//!
//! The producer and consumer never talk to each other; the durable store is
//! the only coordination point.

pub mod consumer;
pub mod producer;
pub mod refresher;
pub mod state;

pub use consumer::{BatchReport, Consumer, ConsumerConfig};
pub use producer::{run_ingest, IngestError, IngestReport};
pub use refresher::{build_snapshot, refresh_snapshot, RefreshConfig, RefreshError};
pub use state::{apply_attempt, Attempt, FailureReason, RetryPolicy, DEFAULT_MAX_FAILURES};
