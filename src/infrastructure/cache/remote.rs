//! Redis-backed remote cache

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, IntoConnectionInfo};
use tokio::sync::Mutex;

use super::codec::ValueCodec;
use crate::domain::cache::{CacheProvider, CacheStats, StatsRecorder};
use crate::domain::{ServiceError, ServiceResult};
use crate::infrastructure::error::ErrorFactory;

const SERVICE: &str = "remote-cache";
const SCAN_BATCH: usize = 500;

/// Configuration for the remote cache
#[derive(Clone)]
pub struct RemoteCacheConfig {
    /// Redis URL (`redis://host:port`); a bare `host:port` is accepted too
    pub endpoint: String,
    /// Namespace prepended as `{prefix}:{key}`; empty disables namespacing
    pub key_prefix: String,
    pub password: Option<String>,
    pub db: Option<i64>,
    pub default_ttl: Duration,
    pub connect_timeout: Duration,
    pub compression: bool,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            endpoint: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "cache".to_string(),
            password: None,
            db: None,
            default_ttl: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(5),
            compression: false,
        }
    }
}

impl fmt::Debug for RemoteCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCacheConfig")
            .field("endpoint", &self.endpoint)
            .field("key_prefix", &self.key_prefix)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("default_ttl", &self.default_ttl)
            .field("connect_timeout", &self.connect_timeout)
            .field("compression", &self.compression)
            .finish()
    }
}

impl RemoteCacheConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }
}

/// Remote cache over a lazily established Redis connection
///
/// The first operation connects; later ones reuse the same
/// `ConnectionManager`, which reconnects on its own after drops. Hit and miss
/// counters are kept client-side.
pub struct RemoteCache {
    client: Client,
    connection: Mutex<Option<ConnectionManager>>,
    config: RemoteCacheConfig,
    codec: ValueCodec,
    stats: StatsRecorder,
}

impl fmt::Debug for RemoteCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCache")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RemoteCache {
    /// Validates the endpoint and prepares a client without connecting
    pub fn new(config: RemoteCacheConfig) -> ServiceResult<Self> {
        let endpoint = if config.endpoint.contains("://") {
            config.endpoint.clone()
        } else {
            format!("redis://{}", config.endpoint)
        };

        let mut info = endpoint.as_str().into_connection_info().map_err(|e| {
            ServiceError::configuration(format!("Invalid remote cache endpoint: {}", e))
                .with_service(SERVICE)
        })?;

        if let Some(db) = config.db {
            info.redis.db = db;
        }
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }

        let client = Client::open(info).map_err(|e| {
            ServiceError::configuration(format!("Failed to create remote cache client: {}", e))
                .with_service(SERVICE)
        })?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            codec: ValueCodec::new(config.compression),
            config,
            stats: StatsRecorder::new(),
        })
    }

    pub fn config(&self) -> &RemoteCacheConfig {
        &self.config
    }

    async fn connection(&self) -> ServiceResult<ConnectionManager> {
        let mut guard = self.connection.lock().await;

        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }

        let timeout = self.config.connect_timeout;
        let connection = tokio::time::timeout(timeout, self.client.get_connection_manager())
            .await
            .map_err(|_| {
                ServiceError::timeout("Timed out connecting to remote cache", Some(timeout))
                    .with_service(SERVICE)
            })?
            .map_err(|e| ErrorFactory::from_redis_error(&e, Some(SERVICE)))?;

        tracing::info!(
            key_prefix = %self.config.key_prefix,
            db = ?self.config.db,
            "Connected to remote cache"
        );

        *guard = Some(connection.clone());
        Ok(connection)
    }

    fn prefix_key(&self, key: &str) -> String {
        if self.config.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.config.key_prefix, key)
        }
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.config.key_prefix.is_empty() {
            return key;
        }
        key.strip_prefix(self.config.key_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }

    fn redis_error(&self, error: redis::RedisError) -> ServiceError {
        ErrorFactory::from_redis_error(&error, Some(SERVICE))
    }

    /// Namespaced keys currently stored, via incremental SCAN
    async fn scan_keys(&self, connection: &mut ConnectionManager) -> ServiceResult<Vec<String>> {
        let pattern = self.prefix_key("*");
        let mut cursor = 0u64;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(connection)
                .await
                .map_err(|e| self.redis_error(e))?;

            keys.extend(batch);
            cursor = next;

            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}

/// Whole seconds for `SET EX`, rounded up, at least one
fn ttl_secs(ttl: Duration) -> u64 {
    let millis = ttl.as_millis() as u64;
    millis.div_ceil(1000).max(1)
}

#[async_trait]
impl CacheProvider for RemoteCache {
    async fn get_raw(&self, key: &str) -> ServiceResult<Option<String>> {
        let mut connection = self.connection().await?;
        let data: Option<Vec<u8>> = connection
            .get(self.prefix_key(key))
            .await
            .map_err(|e| self.redis_error(e))?;

        let Some(data) = data else {
            self.stats.record_miss();
            return Ok(None);
        };

        match self.codec.decode(&data) {
            Some(value) => {
                self.stats.record_hit();
                Ok(Some(value))
            }
            None => {
                tracing::warn!(key = %key, bytes = data.len(), "Ignoring malformed remote cache value");
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Option<Duration>) -> ServiceResult<()> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let data = self.codec.encode(value)?;

        let mut connection = self.connection().await?;
        let _: () = connection
            .set_ex(self.prefix_key(key), data, ttl_secs(ttl))
            .await
            .map_err(|e| self.redis_error(e))?;

        self.stats.record_set();
        Ok(())
    }

    async fn delete(&self, key: &str) -> ServiceResult<bool> {
        let mut connection = self.connection().await?;
        let deleted: i64 = connection
            .del(self.prefix_key(key))
            .await
            .map_err(|e| self.redis_error(e))?;

        if deleted > 0 {
            self.stats.record_delete();
        }
        Ok(deleted > 0)
    }

    async fn clear(&self) -> ServiceResult<()> {
        let mut connection = self.connection().await?;

        if self.config.key_prefix.is_empty() {
            redis::cmd("FLUSHDB")
                .query_async::<()>(&mut connection)
                .await
                .map_err(|e| self.redis_error(e))?;
        } else {
            let keys = self.scan_keys(&mut connection).await?;
            for batch in keys.chunks(SCAN_BATCH) {
                let _: i64 = connection
                    .del(batch)
                    .await
                    .map_err(|e| self.redis_error(e))?;
            }
        }

        self.stats.reset();
        Ok(())
    }

    async fn has(&self, key: &str) -> ServiceResult<bool> {
        let mut connection = self.connection().await?;
        connection
            .exists(self.prefix_key(key))
            .await
            .map_err(|e| self.redis_error(e))
    }

    async fn ttl(&self, key: &str) -> ServiceResult<Option<Duration>> {
        let mut connection = self.connection().await?;
        let millis: i64 = connection
            .pttl(self.prefix_key(key))
            .await
            .map_err(|e| self.redis_error(e))?;

        // -2: no such key, -1: no expiry
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn keys(&self) -> ServiceResult<Option<Vec<String>>> {
        let mut connection = self.connection().await?;
        let keys = self
            .scan_keys(&mut connection)
            .await?
            .iter()
            .map(|key| self.strip_prefix(key).to_string())
            .collect();
        Ok(Some(keys))
    }

    fn enumerates_keys(&self) -> bool {
        true
    }

    async fn stats(&self) -> ServiceResult<CacheStats> {
        let mut connection = self.connection().await?;
        let size = self.scan_keys(&mut connection).await?.len();
        Ok(self.stats.snapshot(size))
    }

    async fn close(&self) -> ServiceResult<()> {
        if self.connection.lock().await.take().is_some() {
            tracing::debug!("Remote cache connection released");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::CacheProviderExt;

    // Tests marked #[ignore] need a Redis instance on 127.0.0.1:6379
    // Run with: cargo test -- --ignored

    fn test_config(prefix: &str) -> RemoteCacheConfig {
        RemoteCacheConfig::new("redis://127.0.0.1:6379")
            .with_key_prefix(prefix)
            .with_default_ttl(Duration::from_secs(60))
    }

    #[test]
    fn test_prefix_key() {
        let cache = RemoteCache::new(test_config("svc")).unwrap();
        assert_eq!(cache.prefix_key("user:1"), "svc:user:1");
        assert_eq!(cache.strip_prefix("svc:user:1"), "user:1");

        let bare = RemoteCache::new(test_config("")).unwrap();
        assert_eq!(bare.prefix_key("user:1"), "user:1");
        assert_eq!(bare.strip_prefix("user:1"), "user:1");
    }

    #[test]
    fn test_ttl_secs_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }

    #[test]
    fn test_bare_host_port_endpoint() {
        assert!(RemoteCache::new(RemoteCacheConfig::new("127.0.0.1:6379")).is_ok());
    }

    #[test]
    fn test_invalid_endpoint_is_configuration_error() {
        let error = RemoteCache::new(RemoteCacheConfig::new("http://not-redis")).unwrap_err();
        assert_eq!(error.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_debug_redacts_password() {
        let cache = RemoteCache::new(test_config("p").with_password("hunter2")).unwrap();
        let debug = format!("{:?}", cache);

        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient_failure() {
        let cache = RemoteCache::new(
            RemoteCacheConfig::new("redis://127.0.0.1:1").with_connect_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        let error = cache.get_raw("k").await.unwrap_err();

        assert!(error.is_retryable(), "unexpected {:?}", error);
        assert_eq!(error.service(), Some("remote-cache"));
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_remote_set_get_delete() {
        let cache = RemoteCache::new(test_config("rc-test-basic")).unwrap();
        cache.clear().await.unwrap();

        cache.set("key1", &"value1", None).await.unwrap();
        assert_eq!(cache.get::<String>("key1").await.unwrap(), Some("value1".to_string()));
        assert!(cache.has("key1").await.unwrap());

        assert!(cache.delete("key1").await.unwrap());
        assert!(!cache.delete("key1").await.unwrap());
        assert_eq!(cache.get::<String>("key1").await.unwrap(), None);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 1);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_remote_clear_only_own_prefix() {
        let ours = RemoteCache::new(test_config("rc-test-a")).unwrap();
        let theirs = RemoteCache::new(test_config("rc-test-b")).unwrap();

        ours.set("k", &1, None).await.unwrap();
        theirs.set("k", &2, None).await.unwrap();

        ours.clear().await.unwrap();
        ours.clear().await.unwrap();

        assert_eq!(ours.get::<i32>("k").await.unwrap(), None);
        assert_eq!(theirs.get::<i32>("k").await.unwrap(), Some(2));
        theirs.clear().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_remote_ttl_and_keys() {
        let cache = RemoteCache::new(test_config("rc-test-ttl")).unwrap();
        cache.clear().await.unwrap();

        cache.set("a", &1, Some(Duration::from_secs(30))).await.unwrap();
        cache.set("b", &2, None).await.unwrap();

        let ttl = cache.ttl("a").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(30));

        let mut keys = cache.keys().await.unwrap().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(cache.stats().await.unwrap().size, 2);

        cache.clear().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_remote_compression_and_malformed_values() {
        let cache = RemoteCache::new(test_config("rc-test-gzip").with_compression(true)).unwrap();
        cache.clear().await.unwrap();

        let payload = vec!["row"; 500];
        cache.set("big", &payload, None).await.unwrap();
        assert_eq!(cache.get::<Vec<String>>("big").await.unwrap().map(|v| v.len()), Some(500));

        let mut raw = cache.connection().await.unwrap();
        let _: () = raw.set("rc-test-gzip:junk", b"{broken".to_vec()).await.unwrap();
        assert_eq!(cache.get_raw("junk").await.unwrap(), None);

        cache.clear().await.unwrap();
        cache.close().await.unwrap();
    }
}
