//! Resilient cache
//!
//! A caching and resilience layer for service API clients:
//! - Local LRU, remote (Redis) and hybrid L1/L2 cache providers
//! - A cache manager with deterministic keys, memoization and pattern invalidation
//! - An error taxonomy with HTTP and transport classification
//! - Retry with exponential back-off and a circuit breaker

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::{ErrorKind, ServiceError, ServiceResult};
pub use infrastructure::cache::{CacheConfig, CacheManager, CacheType};
pub use infrastructure::error::{ErrorContext, ErrorFactory, ErrorHandler};
pub use infrastructure::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryExecutor,
};
