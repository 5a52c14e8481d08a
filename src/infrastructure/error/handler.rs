//! Error handler - classifies, counts and logs failures

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ErrorFactory;
use crate::domain::ServiceError;
use crate::infrastructure::observability::metrics;

const UNKNOWN_SERVICE: &str = "unknown";

/// Aggregated occurrences of one `(code, service)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub code: String,
    pub service: String,
    pub count: u64,
    pub last_occurred: DateTime<Utc>,
}

/// Where a failure happened
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub service: Option<String>,
    pub operation: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            operation: None,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// Process-lifetime error accounting
///
/// Construct one at startup and share it by reference (or `Arc`) with every
/// caller; tests create their own instance.
#[derive(Debug, Default)]
pub struct ErrorHandler {
    records: Mutex<HashMap<(String, String), ErrorRecord>>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `error`, counts it, logs it once and hands it back
    pub fn handle<E>(&self, error: E, context: &ErrorContext) -> ServiceError
    where
        E: Into<ServiceError>,
    {
        let mut error = error.into();

        if error.service().is_none() {
            if let Some(service) = &context.service {
                error = error.with_service(service.clone());
            }
        }

        let service = error.service().unwrap_or(UNKNOWN_SERVICE).to_string();
        self.record(error.code(), &service);
        metrics::record_service_error(error.code(), &service);

        let operation = context.operation.as_deref().unwrap_or("-");
        if error.is_retryable() {
            tracing::warn!(
                code = error.code(),
                service = %service,
                operation = %operation,
                status_code = ?error.status_code(),
                "{}",
                error
            );
        } else {
            tracing::error!(
                code = error.code(),
                service = %service,
                operation = %operation,
                status_code = ?error.status_code(),
                "{}",
                error
            );
        }

        error
    }

    /// Same as [`handle`](Self::handle) for an arbitrary error value
    pub fn handle_error(&self, error: &(dyn StdError + 'static), context: &ErrorContext) -> ServiceError {
        let classified = ErrorFactory::from_error(error, context.service.as_deref());
        self.handle(classified, context)
    }

    /// All records, ordered by service then code
    pub fn error_stats(&self) -> Vec<ErrorRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<ErrorRecord> = records.values().cloned().collect();
        stats.sort_by(|a, b| (&a.service, &a.code).cmp(&(&b.service, &b.code)));
        stats
    }

    pub fn count(&self, code: &str, service: &str) -> u64 {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .get(&(code.to_string(), service.to_string()))
            .map(|r| r.count)
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.values().map(|r| r.count).sum()
    }

    pub fn reset(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, code: &str, service: &str) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();

        records
            .entry((code.to_string(), service.to_string()))
            .and_modify(|r| {
                r.count += 1;
                r.last_occurred = now;
            })
            .or_insert_with(|| ErrorRecord {
                code: code.to_string(),
                service: service.to_string(),
                count: 1,
                last_occurred: now,
            });
    }
}
