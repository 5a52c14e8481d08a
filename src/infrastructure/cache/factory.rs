//! Cache factory for runtime selection

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::codec::Serialization;
use super::hybrid::HybridCache;
use super::local::{LocalCache, LocalCacheConfig};
use super::remote::{RemoteCache, RemoteCacheConfig};
use crate::domain::cache::CacheProvider;
use crate::domain::{ServiceError, ServiceResult};

/// Supported cache providers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Process-local LRU
    #[default]
    Local,
    /// Redis
    Remote,
    /// Local L1 in front of Redis L2
    Hybrid,
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheType::Local => write!(f, "local"),
            CacheType::Remote => write!(f, "remote"),
            CacheType::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for CacheType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "memory" | "in_memory" | "inmemory" => Ok(CacheType::Local),
            "remote" | "redis" => Ok(CacheType::Remote),
            "hybrid" | "tiered" => Ok(CacheType::Hybrid),
            _ => Err(ServiceError::configuration(format!(
                "Unknown cache type: {}. Valid types: local, remote, hybrid",
                s
            ))),
        }
    }
}

/// Connection settings for the remote tier
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub endpoint: String,
    pub key_prefix: String,
    pub password: Option<String>,
    pub db: Option<i64>,
    pub connect_timeout_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            key_prefix: "cache".to_string(),
            password: None,
            db: None,
            connect_timeout_ms: 5000,
        }
    }
}

impl fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("endpoint", &self.endpoint)
            .field("key_prefix", &self.key_prefix)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl RemoteSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

/// Cache configuration, as read from the `cache` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "type", alias = "provider")]
    pub cache_type: CacheType,
    /// Default TTL in seconds
    pub ttl: u64,
    /// Local tier capacity
    pub max_size: usize,
    /// Local tier expiry sweep period; 0 disables the sweep
    pub sweep_interval_ms: u64,
    pub remote: Option<RemoteSettings>,
    /// Gzip values sent to the remote tier
    pub compression: bool,
    pub serialization: Serialization,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Local,
            ttl: 3600,
            max_size: 1000,
            sweep_interval_ms: 60_000,
            remote: None,
            compression: false,
            serialization: Serialization::Json,
        }
    }
}

impl CacheConfig {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(endpoint: impl Into<String>) -> Self {
        Self {
            cache_type: CacheType::Remote,
            remote: Some(RemoteSettings::new(endpoint)),
            ..Default::default()
        }
    }

    pub fn hybrid(endpoint: impl Into<String>) -> Self {
        Self {
            cache_type: CacheType::Hybrid,
            remote: Some(RemoteSettings::new(endpoint)),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.ttl = secs;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        if let Some(remote) = self.remote.as_mut() {
            remote.key_prefix = prefix.into();
        }
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.max_size == 0 {
            return Err(ServiceError::configuration("cache.max_size must be greater than 0"));
        }

        if self.serialization == Serialization::Binary {
            return Err(ServiceError::configuration(
                "cache.serialization 'binary' is not supported, use 'json'",
            ));
        }

        if matches!(self.cache_type, CacheType::Remote | CacheType::Hybrid) {
            let remote = self.remote.as_ref().ok_or_else(|| {
                ServiceError::configuration(format!(
                    "cache.remote is required for the {} cache type",
                    self.cache_type
                ))
            })?;

            if remote.endpoint.trim().is_empty() {
                return Err(ServiceError::configuration("cache.remote.endpoint must not be empty"));
            }
        }

        Ok(())
    }

    fn local_config(&self) -> LocalCacheConfig {
        LocalCacheConfig::default()
            .with_max_size(self.max_size)
            .with_default_ttl(self.default_ttl())
            .with_sweep_interval(Duration::from_millis(self.sweep_interval_ms))
    }

    fn remote_config(&self) -> ServiceResult<RemoteCacheConfig> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| ServiceError::configuration("cache.remote is required"))?;

        let mut config = RemoteCacheConfig::new(remote.endpoint.clone())
            .with_key_prefix(remote.key_prefix.clone())
            .with_default_ttl(self.default_ttl())
            .with_connect_timeout(Duration::from_millis(remote.connect_timeout_ms))
            .with_compression(self.compression);

        if let Some(password) = &remote.password {
            config = config.with_password(password.clone());
        }
        if let Some(db) = remote.db {
            config = config.with_db(db);
        }

        Ok(config)
    }
}

/// Builds the configured provider
///
/// Nothing connects here; the remote tier connects on first use.
#[derive(Debug, Default)]
pub struct CacheFactory;

impl CacheFactory {
    pub fn create(config: &CacheConfig) -> ServiceResult<Arc<dyn CacheProvider>> {
        config.validate()?;

        let provider: Arc<dyn CacheProvider> = match config.cache_type {
            CacheType::Local => Arc::new(LocalCache::new(config.local_config())),
            CacheType::Remote => Arc::new(RemoteCache::new(config.remote_config()?)?),
            CacheType::Hybrid => {
                let l2 = Arc::new(RemoteCache::new(config.remote_config()?)?);
                Arc::new(HybridCache::new(
                    LocalCache::new(config.local_config()),
                    l2,
                    config.default_ttl(),
                ))
            }
        };

        tracing::info!(
            provider = %config.cache_type,
            ttl_secs = config.ttl,
            max_size = config.max_size,
            "Cache provider created"
        );

        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_type_from_str() {
        assert_eq!("local".parse::<CacheType>().unwrap(), CacheType::Local);
        assert_eq!("MEMORY".parse::<CacheType>().unwrap(), CacheType::Local);
        assert_eq!("redis".parse::<CacheType>().unwrap(), CacheType::Remote);
        assert_eq!("hybrid".parse::<CacheType>().unwrap(), CacheType::Hybrid);
        assert_eq!(
            "memcached".parse::<CacheType>().unwrap_err().code(),
            "CONFIGURATION_ERROR"
        );
    }

    #[test]
    fn test_cache_type_display() {
        assert_eq!(CacheType::Local.to_string(), "local");
        assert_eq!(CacheType::Remote.to_string(), "remote");
        assert_eq!(CacheType::Hybrid.to_string(), "hybrid");
    }

    #[test]
    fn test_config_deserializes_type_and_defaults() {
        let config: CacheConfig = serde_json::from_value(serde_json::json!({
            "type": "hybrid",
            "ttl": 120,
            "remote": {"endpoint": "redis://cache:6379", "db": 2}
        }))
        .unwrap();

        assert_eq!(config.cache_type, CacheType::Hybrid);
        assert_eq!(config.ttl, 120);
        assert_eq!(config.max_size, 1000);
        let remote = config.remote.unwrap();
        assert_eq!(remote.key_prefix, "cache");
        assert_eq!(remote.db, Some(2));
        assert_eq!(remote.connect_timeout_ms, 5000);
    }

    #[test]
    fn test_config_accepts_provider_alias() {
        let config: CacheConfig =
            serde_json::from_value(serde_json::json!({"provider": "remote"})).unwrap();
        assert_eq!(config.cache_type, CacheType::Remote);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(CacheConfig::local().validate().is_ok());
        assert!(CacheConfig::local().with_max_size(0).validate().is_err());

        let missing_remote = CacheConfig {
            cache_type: CacheType::Remote,
            ..Default::default()
        };
        assert_eq!(missing_remote.validate().unwrap_err().code(), "CONFIGURATION_ERROR");

        assert!(CacheConfig::hybrid("  ").validate().is_err());

        let binary = CacheConfig {
            serialization: Serialization::Binary,
            ..Default::default()
        };
        assert!(binary.validate().is_err());
    }

    #[test]
    fn test_remote_settings_debug_redacts_password() {
        let settings = RemoteSettings {
            password: Some("s3cret".to_string()),
            ..RemoteSettings::new("redis://localhost")
        };
        assert!(!format!("{:?}", settings).contains("s3cret"));
    }

    #[tokio::test]
    async fn test_factory_creates_each_type() {
        let local = CacheFactory::create(&CacheConfig::local()).unwrap();
        assert_eq!(local.name(), "local");

        let remote = CacheFactory::create(&CacheConfig::remote("redis://127.0.0.1:6379")).unwrap();
        assert_eq!(remote.name(), "remote");

        let hybrid = CacheFactory::create(&CacheConfig::hybrid("127.0.0.1:6379").with_key_prefix("svc"))
            .unwrap();
        assert_eq!(hybrid.name(), "hybrid");
    }

    #[test]
    fn test_factory_validates_first() {
        let error = CacheFactory::create(&CacheConfig::local().with_max_size(0)).unwrap_err();
        assert_eq!(error.code(), "CONFIGURATION_ERROR");
    }
}
