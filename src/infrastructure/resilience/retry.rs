//! Retry executor - bounded exponential back-off for transient failures

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::{ServiceError, ServiceResult};
use crate::infrastructure::error::{ErrorContext, ErrorHandler};
use crate::infrastructure::observability::metrics;

/// Retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiply each delay by a random factor in `[0, 1)`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    pub fn with_max_delay(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// `min(max_delay, base_delay * 2^(attempt - 1))` for a 1-based attempt, without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);

        Duration::from_millis(delay_ms)
    }
}

/// Per-call state, dropped when the call resolves
#[derive(Debug, Default)]
pub struct RetryContext {
    pub attempt: u32,
    pub last_error: Option<ServiceError>,
}

/// Runs an operation, retrying transient failures
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
    handler: Option<Arc<ErrorHandler>>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            handler: None,
        }
    }

    /// Routes every failed attempt through the given handler for counting and logging
    pub fn with_error_handler(mut self, handler: Arc<ErrorHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Attempts `operation` up to `max_retries + 1` times
    ///
    /// Non-retryable kinds fail on first occurrence. Rate limit errors wait for
    /// the server-supplied `retry_after` when present. After the budget is spent
    /// the last classified error is returned.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
        context: Option<&str>,
        service: Option<&str>,
    ) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
    {
        self.run(operation, context, service, None).await
    }

    /// Like [`execute`](Self::execute), aborting the back-off wait when `token` is cancelled
    pub async fn execute_with_cancel<T, E, F, Fut>(
        &self,
        operation: F,
        token: &CancellationToken,
        service: Option<&str>,
    ) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
    {
        self.run(operation, None, service, Some(token)).await
    }

    async fn run<T, E, F, Fut>(
        &self,
        mut operation: F,
        context: Option<&str>,
        service: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
    {
        let mut retry = RetryContext::default();
        let service_label = service.unwrap_or("unknown");

        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(self.cancelled(service, &retry));
                }
            }

            retry.attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    if retry.attempt > 1 {
                        tracing::debug!(
                            service = service_label,
                            attempt = retry.attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => self.classify(e, context, service),
            };

            if !error.is_retryable() {
                return Err(error);
            }

            if retry.attempt > self.config.max_retries {
                tracing::warn!(
                    service = service_label,
                    attempts = retry.attempt,
                    code = error.code(),
                    "Retries exhausted"
                );
                return Err(error);
            }

            let delay = self.backoff(retry.attempt, &error);
            tracing::warn!(
                service = service_label,
                operation = context.unwrap_or("-"),
                attempt = retry.attempt,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                code = error.code(),
                "Retrying after transient failure"
            );
            metrics::record_retry_attempt(service_label);
            retry.last_error = Some(error);

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(self.cancelled(service, &retry));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    fn classify<E: Into<ServiceError>>(
        &self,
        error: E,
        context: Option<&str>,
        service: Option<&str>,
    ) -> ServiceError {
        match &self.handler {
            Some(handler) => {
                let mut ctx = ErrorContext::new();
                ctx.service = service.map(str::to_string);
                ctx.operation = context.map(str::to_string);
                handler.handle(error, &ctx)
            }
            None => {
                let error = error.into();
                match (error.service(), service) {
                    (None, Some(service)) => error.with_service(service),
                    _ => error,
                }
            }
        }
    }

    fn backoff(&self, attempt: u32, error: &ServiceError) -> Duration {
        if let Some(retry_after) = error.retry_after() {
            return retry_after;
        }

        let delay = self.config.delay_for_attempt(attempt);

        if self.config.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
        } else {
            delay
        }
    }

    fn cancelled(&self, service: Option<&str>, retry: &RetryContext) -> ServiceError {
        let mut error =
            ServiceError::cancelled(format!("Retry cancelled after {} attempt(s)", retry.attempt));
        if let Some(last) = &retry.last_error {
            error = error.with_details(serde_json::json!({
                "attempts": retry.attempt,
                "lastError": last.to_json(),
            }));
        }
        match service {
            Some(service) => error.with_service(service),
            None => error,
        }
    }
}
