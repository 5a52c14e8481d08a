use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};

use super::Command;
use crate::config::AppConfig;
use crate::domain::ServiceResult;
use crate::infrastructure::cache::{CacheManager, WarmUpEntry};
use crate::infrastructure::error::ErrorHandler;
use crate::infrastructure::resilience::{CircuitBreaker, RetryExecutor};

/// Runs CLI commands against a cache manager
///
/// Single-key operations go through the retry executor and a circuit
/// breaker named after the provider.
pub struct Runner {
    manager: CacheManager,
    retry: RetryExecutor,
    breaker: CircuitBreaker,
    errors: Arc<ErrorHandler>,
}

impl Runner {
    pub fn new(manager: CacheManager, config: &AppConfig) -> Self {
        let errors = Arc::new(ErrorHandler::new());
        let retry = RetryExecutor::new(config.retry.clone()).with_error_handler(Arc::clone(&errors));
        let breaker = CircuitBreaker::new(
            format!("{}-cache", manager.provider_name()),
            config.circuit_breaker.clone(),
        );

        Self {
            manager,
            retry,
            breaker,
            errors,
        }
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    pub async fn run(&self, command: Command) -> anyhow::Result<Value> {
        match command {
            Command::Get { key } => {
                let value = self
                    .guarded("get", || self.manager.get::<Value>(&key))
                    .await?;
                Ok(json!({ "key": key, "found": value.is_some(), "value": value }))
            }
            Command::Set { key, value, ttl } => {
                let value = parse_value(&value);
                let ttl = ttl.map(Duration::from_secs);
                self.guarded("set", || self.manager.set(&key, &value, ttl))
                    .await?;
                Ok(json!({ "key": key, "stored": true }))
            }
            Command::Delete { key } => {
                let deleted = self.guarded("delete", || self.manager.delete(&key)).await?;
                Ok(json!({ "key": key, "deleted": deleted }))
            }
            Command::Invalidate { pattern } => {
                let removed = self
                    .guarded("invalidate", || self.manager.invalidate_pattern(&pattern))
                    .await?;
                Ok(json!({ "pattern": pattern, "removed": removed }))
            }
            Command::WarmUp { file } => {
                let content = tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let entries: Vec<WarmUpEntry> = serde_json::from_str(&content)
                    .with_context(|| format!("{} is not a JSON array of entries", file.display()))?;

                let report = self.manager.warm_up(&entries).await;
                Ok(json!({
                    "succeeded": report.succeeded(),
                    "failed": report.failed(),
                    "outcomes": report.outcomes,
                }))
            }
            Command::Key {
                service,
                method,
                params,
            } => {
                let params: Value =
                    serde_json::from_str(&params).context("params must be valid JSON")?;
                let key = self.manager.generate_key(&service, &method, &params)?;
                Ok(json!({ "key": key }))
            }
            Command::Stats => {
                let stats = self.guarded("stats", || self.manager.stats()).await?;
                Ok(json!({
                    "provider": self.manager.provider_name(),
                    "cache": stats,
                    "circuit": self.breaker.snapshot(),
                    "errors": self.errors.error_stats(),
                }))
            }
        }
    }

    async fn guarded<T, F, Fut>(&self, operation: &str, mut op: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        self.retry
            .execute(
                || {
                    let attempt = op();
                    self.breaker.execute(move || attempt)
                },
                Some(operation),
                Some(self.breaker.name()),
            )
            .await
    }
}

/// JSON when it parses, otherwise the raw text as a string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
