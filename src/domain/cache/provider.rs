//! Cache provider contract

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::CacheStats;
use crate::domain::{ServiceError, ServiceResult};

/// Storage backend contract implemented by every cache tier
///
/// Values cross the trait boundary as JSON strings so the trait stays
/// dyn-compatible. Use [`CacheProviderExt`] for typed access.
///
/// A miss is `Ok(None)`, never an error. Transport or storage failures are
/// surfaced as network, timeout or service-unreachable errors.
#[async_trait]
pub trait CacheProvider: Send + Sync + Debug {
    /// Gets a raw JSON value
    async fn get_raw(&self, key: &str) -> ServiceResult<Option<String>>;

    /// Stores a raw JSON value; `None` uses the provider's default TTL
    async fn set_raw(&self, key: &str, value: &str, ttl: Option<Duration>) -> ServiceResult<()>;

    /// Removes a key, returning whether it was present
    async fn delete(&self, key: &str) -> ServiceResult<bool>;

    /// Removes every entry owned by this provider
    async fn clear(&self) -> ServiceResult<()>;

    /// Checks for a live entry without touching hit/miss counters
    async fn has(&self, key: &str) -> ServiceResult<bool>;

    /// Remaining time-to-live of a live entry, if the backend knows it
    async fn ttl(&self, _key: &str) -> ServiceResult<Option<Duration>> {
        Ok(None)
    }

    /// Enumerates live keys; `None` when the backend cannot enumerate
    async fn keys(&self) -> ServiceResult<Option<Vec<String>>> {
        Ok(None)
    }

    /// Whether [`keys`](Self::keys) returns `Some` for this backend
    fn enumerates_keys(&self) -> bool {
        false
    }

    /// Snapshot of the provider's counters
    async fn stats(&self) -> ServiceResult<CacheStats>;

    /// Releases background tasks and connections
    async fn close(&self) -> ServiceResult<()>;

    /// Short provider name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Typed get/set on top of the raw JSON contract
pub trait CacheProviderExt: CacheProvider {
    /// Gets a typed value; data that does not decode into `V` is treated as absent
    fn get<'a, V>(
        &'a self,
        key: &'a str,
    ) -> impl std::future::Future<Output = ServiceResult<Option<V>>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            match self.get_raw(key).await? {
                Some(data) => match serde_json::from_str(&data) {
                    Ok(value) => Ok(Some(value)),
                    Err(e) => {
                        tracing::warn!(
                            provider = self.name(),
                            key = %key,
                            error = %e,
                            "Discarding cache value that failed to deserialize"
                        );
                        Ok(None)
                    }
                },
                None => Ok(None),
            }
        }
    }

    /// Sets a typed value
    fn set<'a, V>(
        &'a self,
        key: &'a str,
        value: &'a V,
        ttl: Option<Duration>,
    ) -> impl std::future::Future<Output = ServiceResult<()>> + Send
    where
        V: Serialize + Send + Sync + ?Sized,
    {
        async move {
            let data = serde_json::to_string(value).map_err(|e| {
                ServiceError::internal(format!("serialization failed for key '{}': {}", key, e))
            })?;
            self.set_raw(key, &data, ttl).await
        }
    }
}

impl<T: CacheProvider + ?Sized> CacheProviderExt for T {}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    use crate::domain::cache::StatsRecorder;

    /// In-memory provider for tests that counts round-trips
    #[derive(Debug, Default)]
    pub struct MockCacheProvider {
        entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
        error: Mutex<Option<ServiceError>>,
        enumerable: bool,
        stats: StatsRecorder,
        get_calls: AtomicUsize,
        set_calls: AtomicUsize,
        delete_calls: AtomicUsize,
    }

    impl MockCacheProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Provider that reports its keys through `keys()`
        pub fn enumerable() -> Self {
            Self {
                enumerable: true,
                ..Self::default()
            }
        }

        pub fn with_entry<V: Serialize>(self, key: &str, value: &V, ttl: Option<Duration>) -> Self {
            let json = serde_json::to_string(value).unwrap();
            let expires_at = ttl.map(|ttl| Instant::now() + ttl);
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (json, expires_at));
            self
        }

        pub fn with_error(self, error: ServiceError) -> Self {
            *self.error.lock().unwrap() = Some(error);
            self
        }

        pub fn fail_with(&self, error: Option<ServiceError>) {
            *self.error.lock().unwrap() = error;
        }

        pub fn get_calls(&self) -> usize {
            self.get_calls.load(Ordering::SeqCst)
        }

        pub fn set_calls(&self) -> usize {
            self.set_calls.load(Ordering::SeqCst)
        }

        pub fn delete_calls(&self) -> usize {
            self.delete_calls.load(Ordering::SeqCst)
        }

        pub fn contains(&self, key: &str) -> bool {
            self.entries.lock().unwrap().contains_key(key)
        }

        fn check_error(&self) -> ServiceResult<()> {
            match self.error.lock().unwrap().clone() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }

        fn live_value(&self, key: &str) -> Option<(String, Option<Instant>)> {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(key).cloned() {
                Some((_, Some(expires_at))) if Instant::now() >= expires_at => {
                    entries.remove(key);
                    None
                }
                other => other,
            }
        }
    }

    #[async_trait]
    impl CacheProvider for MockCacheProvider {
        async fn get_raw(&self, key: &str) -> ServiceResult<Option<String>> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            self.check_error()?;

            match self.live_value(key) {
                Some((json, _)) => {
                    self.stats.record_hit();
                    Ok(Some(json))
                }
                None => {
                    self.stats.record_miss();
                    Ok(None)
                }
            }
        }

        async fn set_raw(&self, key: &str, value: &str, ttl: Option<Duration>) -> ServiceResult<()> {
            self.set_calls.fetch_add(1, Ordering::SeqCst);
            self.check_error()?;

            let expires_at = ttl.map(|ttl| Instant::now() + ttl);
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_string(), expires_at));
            self.stats.record_set();
            Ok(())
        }

        async fn delete(&self, key: &str) -> ServiceResult<bool> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            self.check_error()?;

            let removed = self.entries.lock().unwrap().remove(key).is_some();
            if removed {
                self.stats.record_delete();
            }
            Ok(removed)
        }

        async fn clear(&self) -> ServiceResult<()> {
            self.check_error()?;
            self.entries.lock().unwrap().clear();
            Ok(())
        }

        async fn has(&self, key: &str) -> ServiceResult<bool> {
            self.check_error()?;
            Ok(self.live_value(key).is_some())
        }

        async fn ttl(&self, key: &str) -> ServiceResult<Option<Duration>> {
            self.check_error()?;
            Ok(self
                .live_value(key)
                .and_then(|(_, expires_at)| expires_at)
                .map(|expires_at| expires_at.saturating_duration_since(Instant::now())))
        }

        async fn keys(&self) -> ServiceResult<Option<Vec<String>>> {
            self.check_error()?;
            if !self.enumerable {
                return Ok(None);
            }
            Ok(Some(self.entries.lock().unwrap().keys().cloned().collect()))
        }

        fn enumerates_keys(&self) -> bool {
            self.enumerable
        }

        async fn stats(&self) -> ServiceResult<CacheStats> {
            let size = self.entries.lock().unwrap().len();
            Ok(self.stats.snapshot(size))
        }

        async fn close(&self) -> ServiceResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_provider_set_get() {
            let cache = MockCacheProvider::new();
            cache
                .set("key1", &"value1", Some(Duration::from_secs(60)))
                .await
                .unwrap();

            let result: Option<String> = cache.get("key1").await.unwrap();
            assert_eq!(result, Some("value1".to_string()));
            assert_eq!(cache.get_calls(), 1);
            assert_eq!(cache.set_calls(), 1);
        }

        #[tokio::test]
        async fn test_mock_provider_with_error() {
            let cache = MockCacheProvider::new().with_error(ServiceError::network("down"));

            let result: ServiceResult<Option<String>> = cache.get("key").await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_typed_get_treats_mismatched_type_as_absent() {
            let cache = MockCacheProvider::new().with_entry("count", &"not-a-number", None);

            let result: Option<u64> = cache.get("count").await.unwrap();
            assert!(result.is_none());
        }
    }
}
