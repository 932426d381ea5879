//! brief: incremental news enrichment.
//!
//! A producer ingests feed entries as Pending rows, a consumer enriches them
//! in small leased batches (content, sentiment, summary), and a refresher
//! folds the durable rows into a cache snapshot that the read service serves.
//! Each stage is a separate, short invocation coordinated only through the
//! durable store.

pub mod app;
pub mod cache;
pub mod config;
pub mod content;
pub mod enrich;
pub mod feed;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod util;
