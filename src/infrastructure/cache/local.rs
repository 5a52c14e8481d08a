//! Process-local LRU cache with per-entry TTL

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use lru::LruCache;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::domain::cache::{CacheProvider, CacheStats, StatsRecorder};
use crate::domain::ServiceResult;

/// Configuration for the local cache
#[derive(Debug, Clone)]
pub struct LocalCacheConfig {
    /// Maximum number of entries before LRU eviction
    pub max_size: usize,
    /// TTL for entries set without one
    pub default_ttl: Duration,
    /// Period of the background expiry sweep; zero disables it
    pub sweep_interval: Duration,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl LocalCacheConfig {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    /// Wall-clock millis since epoch
    stored_at: u64,
    ttl_ms: u64,
    hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.stored_at) >= self.ttl_ms
    }

    fn remaining(&self, now: u64) -> Duration {
        let elapsed = now.saturating_sub(self.stored_at);
        Duration::from_millis(self.ttl_ms.saturating_sub(elapsed))
    }
}

/// State shared with the sweep task
///
/// The LRU list doubles as the access-order structure: every key in the map
/// has exactly one position in it.
#[derive(Debug)]
struct Shared {
    entries: Mutex<LruCache<String, CacheEntry>>,
    stats: StatsRecorder,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep(&self, now: u64) -> usize {
        let mut entries = self.lock();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }

        self.stats.record_expirations(expired.len() as u64);
        expired.len()
    }
}

/// In-memory cache with least-recently-used eviction
///
/// A background task started on construction removes expired entries every
/// `sweep_interval`. It is stopped by [`close`](CacheProvider::close) or when
/// the cache is dropped. Constructing outside a Tokio runtime leaves expiry
/// to reads and [`sweep_expired`](Self::sweep_expired).
#[derive(Debug)]
pub struct LocalCache {
    config: LocalCacheConfig,
    shared: Arc<Shared>,
    sweeper: CancellationToken,
}

impl LocalCache {
    pub fn new(config: LocalCacheConfig) -> Self {
        let shared = Arc::new(Shared {
            entries: Mutex::new(LruCache::unbounded()),
            stats: StatsRecorder::new(),
        });
        let sweeper = CancellationToken::new();

        spawn_sweeper(Arc::downgrade(&shared), config.sweep_interval, sweeper.clone());

        Self {
            config: LocalCacheConfig {
                max_size: config.max_size.max(1),
                ..config
            },
            shared,
            sweeper,
        }
    }

    pub fn config(&self) -> &LocalCacheConfig {
        &self.config
    }

    /// Removes all expired entries now, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        self.shared.sweep(now_millis())
    }

    /// Number of reads served by a live entry since it was stored
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        let now = now_millis();
        self.shared
            .lock()
            .peek(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.hit_count)
    }

    fn live_len(&self) -> usize {
        let now = now_millis();
        self.shared
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count()
    }
}

impl Drop for LocalCache {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

#[async_trait]
impl CacheProvider for LocalCache {
    async fn get_raw(&self, key: &str) -> ServiceResult<Option<String>> {
        let now = now_millis();
        let mut entries = self.shared.lock();

        if entries.peek(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.pop(key);
            self.shared.stats.record_expirations(1);
            self.shared.stats.record_miss();
            return Ok(None);
        }

        // get_mut moves the key to the most-recently-used end
        match entries.get_mut(key) {
            Some(entry) => {
                entry.hit_count += 1;
                self.shared.stats.record_hit();
                Ok(Some(entry.value.clone()))
            }
            None => {
                self.shared.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Option<Duration>) -> ServiceResult<()> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry {
            value: value.to_string(),
            stored_at: now_millis(),
            ttl_ms: ttl.as_millis() as u64,
            hit_count: 0,
        };

        let mut entries = self.shared.lock();

        if !entries.contains(key) {
            let mut evicted = 0u64;
            while entries.len() >= self.config.max_size {
                match entries.pop_lru() {
                    Some((evicted_key, _)) => {
                        tracing::trace!(key = %evicted_key, "Evicted least recently used entry");
                        evicted += 1;
                    }
                    None => break,
                }
            }
            self.shared.stats.record_evictions(evicted);
        }

        entries.put(key.to_string(), entry);
        self.shared.stats.record_set();

        Ok(())
    }

    async fn delete(&self, key: &str) -> ServiceResult<bool> {
        let removed = self.shared.lock().pop(key).is_some();
        if removed {
            self.shared.stats.record_delete();
        }
        Ok(removed)
    }

    async fn clear(&self) -> ServiceResult<()> {
        self.shared.lock().clear();
        self.shared.stats.reset();
        Ok(())
    }

    async fn has(&self, key: &str) -> ServiceResult<bool> {
        let now = now_millis();
        Ok(self
            .shared
            .lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn ttl(&self, key: &str) -> ServiceResult<Option<Duration>> {
        let now = now_millis();
        Ok(self
            .shared
            .lock()
            .peek(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.remaining(now)))
    }

    async fn keys(&self) -> ServiceResult<Option<Vec<String>>> {
        let now = now_millis();
        let keys = self
            .shared
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        Ok(Some(keys))
    }

    fn enumerates_keys(&self) -> bool {
        true
    }

    async fn stats(&self) -> ServiceResult<CacheStats> {
        Ok(self.shared.stats.snapshot(self.live_len()))
    }

    async fn close(&self) -> ServiceResult<()> {
        self.sweeper.cancel();
        self.shared.lock().clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

fn spawn_sweeper(shared: Weak<Shared>, interval: Duration, token: CancellationToken) {
    if interval.is_zero() {
        return;
    }

    let Ok(handle) = Handle::try_current() else {
        tracing::debug!("No Tokio runtime, local cache sweep disabled");
        return;
    };

    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    let removed = shared.sweep(now_millis());
                    if removed > 0 {
                        tracing::debug!(removed, "Swept expired local cache entries");
                    }
                }
            }
        }
    });
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::CacheProviderExt;

    fn cache(max_size: usize) -> LocalCache {
        LocalCache::new(
            LocalCacheConfig::default()
                .with_max_size(max_size)
                .with_sweep_interval(Duration::ZERO),
        )
    }

    async fn keys_of(cache: &LocalCache) -> Vec<String> {
        let mut keys = cache.keys().await.unwrap().unwrap();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = cache(10);

        cache.set("user:1", &serde_json::json!({"name": "ada"}), None).await.unwrap();
        let value: Option<serde_json::Value> = cache.get("user:1").await.unwrap();

        assert_eq!(value, Some(serde_json::json!({"name": "ada"})));
        assert_eq!(cache.hit_count("user:1"), Some(1));
    }

    #[tokio::test]
    async fn test_miss_is_not_an_error() {
        let cache = cache(10);
        let value: Option<String> = cache.get("missing").await.unwrap();

        assert!(value.is_none());
        assert_eq!(cache.stats().await.unwrap().misses, 1);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = cache(10);
        cache.set("k", &1, Some(Duration::from_millis(500))).await.unwrap();

        assert_eq!(cache.get::<i32>("k").await.unwrap(), Some(1));
        tokio::time::sleep(Duration::from_millis(550)).await;
        assert_eq!(cache.get::<i32>("k").await.unwrap(), None);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_recency() {
        let cache = cache(3);

        cache.set("a", &1, None).await.unwrap();
        cache.set("b", &2, None).await.unwrap();
        cache.set("c", &3, None).await.unwrap();

        // Touch "a" so "b" becomes least recently used
        cache.get::<i32>("a").await.unwrap();
        cache.set("d", &4, None).await.unwrap();

        assert_eq!(keys_of(&cache).await, vec!["a", "c", "d"]);
        assert_eq!(cache.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_overflowing_sets_keep_most_recent_keys() {
        let cache = cache(5);

        for i in 0..20 {
            cache.set(&format!("k{:02}", i), &i, None).await.unwrap();
        }

        assert_eq!(keys_of(&cache).await, vec!["k15", "k16", "k17", "k18", "k19"]);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.size, 5);
        assert_eq!(stats.evictions, 15);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = cache(2);

        cache.set("a", &1, None).await.unwrap();
        cache.set("b", &2, None).await.unwrap();
        cache.set("a", &10, None).await.unwrap();

        assert_eq!(cache.get::<i32>("a").await.unwrap(), Some(10));
        assert_eq!(cache.get::<i32>("b").await.unwrap(), Some(2));
        assert_eq!(cache.stats().await.unwrap().evictions, 0);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let cache = cache(10);
        cache.set("k", &"v", None).await.unwrap();

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.stats().await.unwrap().deletes, 1);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let cache = cache(10);
        cache.set("a", &1, None).await.unwrap();
        cache.get::<i32>("a").await.unwrap();

        cache.clear().await.unwrap();
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());

        cache.clear().await.unwrap();
        assert!(keys_of(&cache).await.is_empty());
        assert_eq!(cache.stats().await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_has_does_not_touch_counters() {
        let cache = cache(10);
        cache.set("k", &true, None).await.unwrap();

        assert!(cache.has("k").await.unwrap());
        assert!(!cache.has("other").await.unwrap());

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_ttl_reports_remaining_time() {
        let cache = cache(10);
        cache.set("k", &1, Some(Duration::from_secs(30))).await.unwrap();

        let remaining = cache.ttl("k").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(remaining > Duration::from_secs(29));
        assert_eq!(cache.ttl("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_manual_sweep_removes_expired() {
        let cache = cache(10);
        cache.set("short", &1, Some(Duration::from_millis(10))).await.unwrap();
        cache.set("long", &2, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(keys_of(&cache).await, vec!["long"]);
    }

    #[tokio::test]
    async fn test_background_sweep_runs_without_reads() {
        let cache = LocalCache::new(
            LocalCacheConfig::default().with_sweep_interval(Duration::from_millis(20)),
        );
        cache.set("k", &1, Some(Duration::from_millis(10))).await.unwrap();

        // Wait for a sweep tick, bounded so a stuck sweeper fails the test
        let mut stats = cache.stats().await.unwrap();
        for _ in 0..100 {
            if stats.expirations > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            stats = cache.stats().await.unwrap();
        }

        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_close_stops_sweeper() {
        let cache = LocalCache::new(
            LocalCacheConfig::default().with_sweep_interval(Duration::from_millis(10)),
        );
        cache.set("k", &1, None).await.unwrap();

        cache.close().await.unwrap();

        assert!(cache.sweeper.is_cancelled());
        assert_eq!(cache.stats().await.unwrap().size, 0);
    }

    #[test]
    fn test_construct_outside_runtime() {
        let cache = LocalCache::new(LocalCacheConfig::default());
        assert_eq!(cache.sweep_expired(), 0);
        assert_eq!(cache.config().max_size, 1000);
    }
}
