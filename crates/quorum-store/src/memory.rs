use std::time::Duration;

use moka::future::Cache;

/// In-memory hot cache backed by moka.
///
/// Sits in front of the metric database so that round-2 re-analysis of a
/// ticker reads the same tool outputs without touching SQLite again.
/// Entries are evicted after TTL.
pub struct HotCache<V> {
    inner: Cache<String, V>,
}

impl<V> HotCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, value: V) {
        self.inner.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}
