//! Cache manager - the single entry point callers use for caching

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::factory::{CacheConfig, CacheFactory};
use crate::domain::cache::{self, CacheProvider, CacheProviderExt, CacheStats, KeyPattern};
use crate::domain::{ServiceError, ServiceResult};
use crate::infrastructure::observability::metrics;

/// One entry for [`CacheManager::warm_up`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmUpEntry {
    pub key: String,
    pub value: Value,
    /// Seconds; provider default when absent
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl WarmUpEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.ttl = Some(secs);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmUpOutcome {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

/// Per-entry results of a warm-up, in input order
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmUpReport {
    pub outcomes: Vec<WarmUpOutcome>,
}

impl WarmUpReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &WarmUpOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }
}

#[derive(Debug)]
struct Inner {
    provider: Arc<dyn CacheProvider>,
    /// Keys written through this manager; only filled when the provider
    /// cannot enumerate its own keys
    registry: RwLock<HashSet<String>>,
    track_keys: bool,
    /// Per-key locks held by single-flight computations
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Facade over one cache provider
///
/// Cheap to clone; clones share the provider and the key registry.
#[derive(Debug, Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        let track_keys = !provider.enumerates_keys();
        Self {
            inner: Arc::new(Inner {
                provider,
                registry: RwLock::new(HashSet::new()),
                track_keys,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> ServiceResult<Self> {
        Ok(Self::new(CacheFactory::create(config)?))
    }

    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.inner.provider
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.provider.name()
    }

    /// See [`cache::generate_key`]
    pub fn generate_key<P>(&self, service: &str, method: &str, params: &P) -> ServiceResult<String>
    where
        P: Serialize + ?Sized,
    {
        cache::generate_key(service, method, params)
    }

    pub async fn get<V>(&self, key: &str) -> ServiceResult<Option<V>>
    where
        V: DeserializeOwned + Send,
    {
        let result = self.inner.provider.get::<V>(key).await;
        self.record(
            "get",
            match &result {
                Ok(Some(_)) => "hit",
                Ok(None) => "miss",
                Err(_) => "error",
            },
        );
        result
    }

    pub async fn set<V>(&self, key: &str, value: &V, ttl: Option<Duration>) -> ServiceResult<()>
    where
        V: Serialize + Send + Sync + ?Sized,
    {
        let result = self.inner.provider.set(key, value, ttl).await;
        self.record_result("set", &result);

        if result.is_ok() && self.inner.track_keys {
            self.registry_write().insert(key.to_string());
        }
        result
    }

    pub async fn delete(&self, key: &str) -> ServiceResult<bool> {
        let result = self.inner.provider.delete(key).await;
        self.record_result("delete", &result);

        if result.is_ok() {
            self.registry_write().remove(key);
        }
        result
    }

    pub async fn has(&self, key: &str) -> ServiceResult<bool> {
        let result = self.inner.provider.has(key).await;
        self.record_result("has", &result);
        result
    }

    pub async fn clear(&self) -> ServiceResult<()> {
        let result = self.inner.provider.clear().await;
        self.record_result("clear", &result);

        if result.is_ok() {
            self.registry_write().clear();
        }
        result
    }

    pub async fn stats(&self) -> ServiceResult<CacheStats> {
        self.inner.provider.stats().await
    }

    pub async fn close(&self) -> ServiceResult<()> {
        tracing::debug!(provider = self.provider_name(), "Closing cache manager");
        self.inner.provider.close().await
    }

    /// Returns the cached value or computes, stores and returns it
    ///
    /// Concurrent callers on a cold key each run `compute`; the last write
    /// wins. Use [`cached_single_flight`](Self::cached_single_flight) when at
    /// most one computation per key is wanted. A failing cache read or write
    /// is logged and the computed value is still returned. Errors from
    /// `compute` are returned and nothing is stored.
    pub async fn cached<T, E, F, Fut>(&self, key: &str, compute: F, ttl: Option<Duration>) -> ServiceResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        E: Into<ServiceError> + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.lookup(key).await {
            return Ok(value);
        }

        let value = compute().await.map_err(Into::into)?;
        self.store(key, &value, ttl).await;
        Ok(value)
    }

    /// Like [`cached`](Self::cached), but concurrent callers on the same cold
    /// key wait for a single computation and then read its result
    ///
    /// If the computation fails, the next waiter runs its own.
    pub async fn cached_single_flight<T, E, F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl: Option<Duration>,
    ) -> ServiceResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        E: Into<ServiceError> + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.lookup(key).await {
            return Ok(value);
        }

        let flight = {
            let mut in_flight = self.in_flight();
            Arc::clone(
                in_flight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        let result = {
            let _guard = flight.lock().await;

            match self.lookup(key).await {
                Some(value) => Ok(value),
                None => match compute().await {
                    Ok(value) => {
                        self.store(key, &value, ttl).await;
                        Ok(value)
                    }
                    Err(e) => Err(e.into()),
                },
            }
        };

        {
            let mut in_flight = self.in_flight();
            // The map and this call are the only holders left
            if Arc::strong_count(&flight) <= 2 {
                in_flight.remove(key);
            }
        }

        result
    }

    /// Wraps `compute` so its results are cached under `key_fn(&args)`
    ///
    /// Same no-dedup semantics as [`cached`](Self::cached).
    pub fn memoize<A, T, E, F, Fut, K>(
        &self,
        compute: F,
        key_fn: K,
        ttl: Option<Duration>,
    ) -> impl Fn(A) -> BoxFuture<'static, ServiceResult<T>> + Send + Sync + 'static
    where
        A: Send + 'static,
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: Into<ServiceError> + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        let manager = self.clone();
        let compute = Arc::new(compute);

        move |args: A| -> BoxFuture<'static, ServiceResult<T>> {
            let manager = manager.clone();
            let compute = Arc::clone(&compute);
            let key = key_fn(&args);

            Box::pin(async move { manager.cached(&key, move || (*compute)(args), ttl).await })
        }
    }

    /// Deletes every key matching a `*` glob, returning how many were removed
    ///
    /// Candidates come from the provider when it can enumerate its keys,
    /// otherwise from the keys written through this manager. Registered keys
    /// the provider no longer holds are dropped from the registry on the way.
    pub async fn invalidate_pattern(&self, pattern: &str) -> ServiceResult<usize> {
        let pattern = KeyPattern::new(pattern)?;

        let (candidates, from_registry) = match self.inner.provider.keys().await? {
            Some(keys) => (keys, false),
            None => (self.registered_keys(), true),
        };

        let mut removed = 0;
        for key in &candidates {
            if pattern.matches(key) {
                if self.inner.provider.delete(key).await? {
                    removed += 1;
                }
                self.registry_write().remove(key);
            } else if from_registry && !self.inner.provider.has(key).await? {
                self.registry_write().remove(key);
            }
        }

        self.record("invalidate", "ok");
        tracing::debug!(
            provider = self.provider_name(),
            pattern = pattern.as_str(),
            removed,
            "Invalidated cache keys"
        );

        Ok(removed)
    }

    /// Stores every entry independently; one failure does not stop the others
    pub async fn warm_up(&self, entries: &[WarmUpEntry]) -> WarmUpReport {
        let outcomes = join_all(entries.iter().map(|entry| async move {
            let ttl = entry.ttl.map(Duration::from_secs);
            let error = self.set(&entry.key, &entry.value, ttl).await.err();
            WarmUpOutcome {
                key: entry.key.clone(),
                error,
            }
        }))
        .await;

        let report = WarmUpReport { outcomes };

        if report.failed() > 0 {
            tracing::warn!(
                provider = self.provider_name(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                "Cache warm-up finished with failures"
            );
        } else {
            tracing::info!(
                provider = self.provider_name(),
                entries = report.succeeded(),
                "Cache warmed up"
            );
        }

        report
    }

    async fn lookup<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        match self.get::<T>(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, code = e.code(), error = %e, "Cache read failed, computing value");
                None
            }
        }
    }

    async fn store<T>(&self, key: &str, value: &T, ttl: Option<Duration>)
    where
        T: Serialize + Send + Sync,
    {
        if let Err(e) = self.set(key, value, ttl).await {
            tracing::warn!(key = %key, code = e.code(), error = %e, "Cache write failed, value not cached");
        }
    }

    fn record(&self, operation: &'static str, result: &'static str) {
        metrics::record_cache_operation(self.provider_name(), operation, result);
    }

    fn record_result<T>(&self, operation: &'static str, result: &ServiceResult<T>) {
        self.record(operation, if result.is_ok() { "ok" } else { "error" });
    }

    fn registered_keys(&self) -> Vec<String> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn registry_write(&self) -> std::sync::RwLockWriteGuard<'_, HashSet<String>> {
        self.inner.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
