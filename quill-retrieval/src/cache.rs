use crate::result::QueryHit;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

struct CachedResults {
    hits: Vec<QueryHit>,
    stored_at: Instant,
}

/// Size-bounded LRU keyed by `(normalized query, k)` with a TTL; an
/// expired hit counts as a miss and is evicted on read.
pub struct QueryCache {
    ttl: Duration,
    entries: Mutex<LruCache<(String, usize), CachedResults>>,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1))
            .unwrap_or_else(|| unreachable!("capacity is clamped to at least 1"));
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, text: &str, k: usize) -> Option<Vec<QueryHit>> {
        let key = (text.to_string(), k);
        let mut entries = self.lock();
        match entries.get(&key) {
            Some(cached) if cached.stored_at.elapsed() <= self.ttl => Some(cached.hits.clone()),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, text: &str, k: usize, hits: Vec<QueryHit>) {
        self.lock().put(
            (text.to_string(), k),
            CachedResults {
                hits,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<(String, usize), CachedResults>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
