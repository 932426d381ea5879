//! Durable store: the SQLite system of record for items and their
//! enrichment state.
//!
//! Every mutation is scoped to one row. The consumer's write-back
//! ([`Database::update_item`]) is guarded by the failure count and lease the
//! attempt started from, so a stale writer can never regress a row.

mod items;
mod schema;
mod types;

pub(crate) use schema::open_pool;
pub use schema::Database;
pub use types::{
    DatabaseError, Item, ItemState, ItemUpdate, NewItem, Sentiment, StateCounts, UpdateGuard,
};
