//! Cache infrastructure - providers, factory and manager

mod codec;
mod factory;
mod hybrid;
mod local;
mod manager;
mod remote;

pub use codec::{Serialization, ValueCodec};
pub use factory::{CacheConfig, CacheFactory, CacheType, RemoteSettings};
pub use hybrid::HybridCache;
pub use local::{LocalCache, LocalCacheConfig};
pub use manager::{CacheManager, WarmUpEntry, WarmUpOutcome, WarmUpReport};
pub use remote::{RemoteCache, RemoteCacheConfig};
