//! Circuit breaker - stops calling a dependency that keeps failing
//!
//! Closed lets calls through and counts consecutive failures. Reaching the
//! threshold opens the circuit, and calls are rejected without running the
//! operation until the recovery timeout elapses. The next call then moves the
//! circuit to half-open, where a limited number of trial calls decide whether
//! it closes again or reopens.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::{ServiceError, ServiceResult};
use crate::infrastructure::observability::metrics;

/// Breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    /// A failure arriving later than this after the previous one restarts the count
    pub monitoring_period_ms: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            monitoring_period_ms: 10_000,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, ms: u64) -> Self {
        self.recovery_timeout_ms = ms;
        self
    }

    pub fn with_monitoring_period(mut self, ms: u64) -> Self {
        self.monitoring_period_ms = ms;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Time left before an open circuit admits a trial call
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    next_attempt_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    half_open_in_flight: u32,
    /// Bumped on every transition so stale trial permits release nothing
    generation: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            next_attempt_at: None,
            last_failure_at: None,
            half_open_in_flight: 0,
            generation: 0,
        }
    }
}

/// One breaker per guarded dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

/// Admission ticket for one call; frees its half-open slot when dropped
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.trial {
            let mut inner = self.breaker.lock();
            if inner.generation == generation {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();

        tracing::debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout_ms,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `operation` if the circuit admits it
    ///
    /// A rejected call returns a `CircuitOpen` error without invoking the
    /// operation. Failures of the operation are returned as-is after being
    /// counted.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> ServiceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
    {
        let permit = self.try_acquire()?;

        let result = operation().await;

        match result {
            Ok(value) => {
                self.on_success(&permit);
                drop(permit);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(&permit);
                drop(permit);
                Err(error.into())
            }
        }
    }

    /// Same as [`execute`](Self::execute), answering with `fallback()` when the
    /// call is rejected or fails
    pub async fn execute_with_fallback<T, E, F, Fut, B, BFut>(
        &self,
        operation: F,
        fallback: B,
    ) -> ServiceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
        B: FnOnce() -> BFut,
        BFut: Future<Output = ServiceResult<T>>,
    {
        match self.execute(operation).await {
            Ok(value) => Ok(value),
            Err(error) => {
                tracing::debug!(
                    breaker = %self.name,
                    code = error.code(),
                    "Serving fallback"
                );
                fallback().await
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let open_remaining_ms = match (inner.state, inner.next_attempt_at) {
            (CircuitState::Open, Some(next)) => Some(
                next.saturating_duration_since(Instant::now())
                    .as_millis() as u64,
            ),
            _ => None,
        };

        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            open_remaining_ms,
        }
    }

    /// Forces the circuit back to closed and clears all counters
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
    }

    /// Opens the circuit for one recovery timeout regardless of failures
    pub fn force_open(&self) {
        let mut inner = self.lock();
        self.open(&mut inner, Instant::now());
    }

    fn try_acquire(&self) -> ServiceResult<Permit<'_>> {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                trial: None,
            }),
            CircuitState::Open => {
                let ready = inner.next_attempt_at.is_none_or(|next| now >= next);
                if ready {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    Ok(self.trial_permit(&mut inner))
                } else {
                    Err(self.rejection())
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.success_threshold.max(1) {
                    Ok(self.trial_permit(&mut inner))
                } else {
                    Err(self.rejection())
                }
            }
        }
    }

    fn trial_permit(&self, inner: &mut BreakerState) -> Permit<'_> {
        inner.half_open_in_flight += 1;
        Permit {
            breaker: self,
            trial: Some(inner.generation),
        }
    }

    fn rejection(&self) -> ServiceError {
        ServiceError::circuit_open(format!("Circuit breaker '{}' is open", self.name))
            .with_service(self.name.clone())
    }

    fn on_success(&self, permit: &Permit<'_>) {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            // Only trials of the current half-open period count
            CircuitState::HalfOpen if permit.trial != Some(inner.generation) => {}
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.last_failure_at = None;
                }
            }
            // A call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, permit: &Permit<'_>) {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                let stale = inner
                    .last_failure_at
                    .is_some_and(|last| now.duration_since(last) > self.config.monitoring_period());
                if stale {
                    inner.consecutive_failures = 0;
                }

                inner.consecutive_failures += 1;
                inner.last_failure_at = Some(now);

                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen if permit.trial != Some(inner.generation) => {
                inner.last_failure_at = Some(now);
            }
            CircuitState::HalfOpen => {
                inner.last_failure_at = Some(now);
                self.open(&mut inner, now);
            }
            CircuitState::Open => {
                inner.last_failure_at = Some(now);
            }
        }
    }

    fn open(&self, inner: &mut BreakerState, now: Instant) {
        self.transition(inner, CircuitState::Open);
        inner.next_attempt_at = Some(now + self.config.recovery_timeout());
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;

        inner.state = to;
        inner.generation += 1;
        inner.half_open_in_flight = 0;
        inner.consecutive_successes = 0;
        if to != CircuitState::Open {
            inner.next_attempt_at = None;
        }

        if from == to {
            return;
        }

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %from,
                failures = inner.consecutive_failures,
                recovery_timeout_ms = self.config.recovery_timeout_ms,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                breaker = %self.name,
                "Circuit breaker half-open, admitting trial calls"
            ),
            CircuitState::Closed => tracing::info!(
                breaker = %self.name,
                from = %from,
                "Circuit breaker closed"
            ),
        }

        metrics::record_circuit_transition(&self.name, to.as_str());
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
