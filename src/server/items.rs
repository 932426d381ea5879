use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::AppState;
use crate::cache::Snapshot;
use crate::pipeline::build_snapshot;
use crate::util::unix_now;

pub(super) const SERVED_FROM: &str = "x-served-from";
pub(super) const SNAPSHOT_AGE: &str = "x-snapshot-age";

#[derive(Debug, Clone, Copy)]
enum Source {
    Cache,
    Durable,
}

impl Source {
    fn as_str(self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::Durable => "durable",
        }
    }
}

fn snapshot_response(snapshot: &Snapshot, source: Source, now: i64) -> Response {
    let headers = [
        (SERVED_FROM, source.as_str().to_string()),
        (SNAPSHOT_AGE, snapshot.age_secs(now).to_string()),
    ];
    (headers, Json(snapshot)).into_response()
}

pub(super) async fn list_items(State(state): State<AppState>) -> Response {
    let now = unix_now();

    match state.cache.read_snapshot(&state.refresh.key).await {
        Ok(Some(snapshot)) if snapshot.age_secs(now) <= state.max_staleness_secs => {
            return snapshot_response(&snapshot, Source::Cache, now);
        }
        Ok(Some(snapshot)) => {
            tracing::debug!(age = snapshot.age_secs(now), "Cached snapshot is stale");
        }
        Ok(None) => tracing::debug!(key = %state.refresh.key, "Cache miss"),
        Err(e) => tracing::warn!(error = %e, "Cache read failed, serving from store"),
    }

    state.spawn_rebuild();

    match build_snapshot(&state.db, &state.refresh, now).await {
        Ok(snapshot) => snapshot_response(&snapshot, Source::Durable, now),
        Err(e) => {
            tracing::error!(error = %e, "Durable store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "item store unavailable" })),
            )
                .into_response()
        }
    }
}

pub(super) async fn health(State(state): State<AppState>) -> Response {
    match state
        .db
        .state_counts(state.refresh.max_failures, unix_now())
        .await
    {
        Ok(counts) => Json(json!({
            "status": "ok",
            "items": counts,
            "rebuilding": state.is_rebuilding(),
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, CacheStore, MemoryCacheStore};
    use crate::pipeline::RefreshConfig;
    use crate::server::router;
    use crate::storage::{Database, NewItem};
    use async_trait::async_trait;
    use axum::body::{self, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt as _;

    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn replace_snapshot(&self, _key: &str, _snapshot: Snapshot) -> Result<bool, CacheError> {
            Err(CacheError::Poisoned)
        }

        async fn read_snapshot(&self, _key: &str) -> Result<Option<Arc<Snapshot>>, CacheError> {
            Err(CacheError::Poisoned)
        }
    }

    async fn seeded_db() -> Database {
        let db = Database::open(":memory:").await.unwrap();
        db.insert_if_absent(
            &NewItem {
                id: "a".into(),
                source_url: "https://example.com/a".into(),
                title: "A".into(),
                published_at: 1,
            },
            unix_now(),
        )
        .await
        .unwrap();
        db
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_cache_error_falls_back_to_store() {
        let state = AppState::new(
            seeded_db().await,
            Arc::new(BrokenCache),
            RefreshConfig::default(),
            300,
        );

        let resp = router(state).oneshot(get("/items")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[SERVED_FROM], "durable");
        assert_eq!(resp.headers()[SNAPSHOT_AGE], "0");

        let bytes = body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let snapshot: Snapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot.items.len(), 1);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let state = AppState::new(
            seeded_db().await,
            Arc::new(MemoryCacheStore::default()),
            RefreshConfig::default(),
            300,
        );

        let resp = router(state).oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["status"], "ok");
        assert_eq!(v["items"]["pending"], 1);
    }

    #[tokio::test]
    async fn test_only_one_rebuild_in_flight() {
        let state = AppState::new(
            seeded_db().await,
            Arc::new(MemoryCacheStore::default()),
            RefreshConfig::default(),
            300,
        );
        state.rebuilding.store(true, std::sync::atomic::Ordering::Release);
        assert!(!state.spawn_rebuild());
    }
}
