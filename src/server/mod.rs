//! Read service: serves the cached snapshot over HTTP.
//!
//! `GET /items` answers from the cache when a fresh snapshot exists. On a
//! miss, a cache error, or a snapshot older than the staleness bound, it
//! answers from the durable store instead and kicks off one background
//! rebuild. Item failure state is data, never an HTTP error.

mod items;

use axum::{routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::cache::CacheStore;
use crate::pipeline::{refresh_snapshot, RefreshConfig};
use crate::storage::Database;
use crate::util::unix_now;

/// Default bound on snapshot age before a request falls back to the store.
pub const DEFAULT_MAX_STALENESS_SECS: i64 = 300;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    db: Database,
    cache: Arc<dyn CacheStore>,
    refresh: RefreshConfig,
    max_staleness_secs: i64,
    rebuilding: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        db: Database,
        cache: Arc<dyn CacheStore>,
        refresh: RefreshConfig,
        max_staleness_secs: i64,
    ) -> Self {
        Self {
            db,
            cache,
            refresh,
            max_staleness_secs: max_staleness_secs.max(0),
            rebuilding: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a background rebuild is currently running.
    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }

    /// Start a cache rebuild unless one is already in flight.
    ///
    /// Returns `false` when another rebuild already holds the slot.
    fn spawn_rebuild(&self) -> bool {
        if self.rebuilding.swap(true, Ordering::AcqRel) {
            tracing::debug!("Cache rebuild already in flight");
            return false;
        }

        let state = self.clone();
        tokio::spawn(async move {
            let result =
                refresh_snapshot(&state.db, state.cache.as_ref(), &state.refresh, unix_now()).await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "Background cache rebuild failed");
            }
            state.rebuilding.store(false, Ordering::Release);
        });
        true
    }
}

/// Build the read-service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/items", get(items::list_items))
        .route("/health", get(items::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `listen` until the process is stopped.
pub async fn serve(listen: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(addr = %listener.local_addr()?, "Read service listening");
    axum::serve(listener, router(state)).await
}
