use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use super::{CacheError, CacheStore, Snapshot};
use crate::util::unix_now;

const DEFAULT_CAPACITY: usize = 16;

/// In-process cache store.
///
/// Each key holds an `Arc<Snapshot>`; replacing swaps the pointer under the
/// lock, so readers holding the old `Arc` keep a consistent copy.
pub struct MemoryCacheStore {
    entries: Mutex<LruCache<String, Arc<Snapshot>>>,
    ttl_secs: Option<i64>,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryCacheStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl_secs: None,
        }
    }

    /// Treat snapshots older than `ttl_secs` as absent.
    pub fn with_ttl_secs(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn replace_snapshot(&self, key: &str, snapshot: Snapshot) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        if let Some(current) = entries.peek(key) {
            if current.built_at > snapshot.built_at {
                return Ok(false);
            }
        }
        entries.put(key.to_string(), Arc::new(snapshot));
        Ok(true)
    }

    async fn read_snapshot(&self, key: &str) -> Result<Option<Arc<Snapshot>>, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let Some(snapshot) = entries.get(key).cloned() else {
            return Ok(None);
        };

        if let Some(ttl) = self.ttl_secs {
            if snapshot.age_secs(unix_now()) >= ttl {
                entries.pop(key);
                return Ok(None);
            }
        }
        Ok(Some(snapshot))
    }
}
