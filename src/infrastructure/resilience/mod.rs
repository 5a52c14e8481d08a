//! Resilience primitives - retry with back-off and circuit breaking

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use retry::{RetryConfig, RetryContext, RetryExecutor};
