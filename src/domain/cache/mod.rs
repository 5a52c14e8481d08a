//! Cache domain - provider contract, statistics and key derivation

mod key;
mod pattern;
mod provider;
mod stats;

pub use key::{canonical_json, generate_key};
pub use pattern::KeyPattern;
pub use provider::{CacheProvider, CacheProviderExt};
pub use stats::{CacheStats, StatsRecorder};

#[cfg(test)]
pub use provider::mock::MockCacheProvider;
