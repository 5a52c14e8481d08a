//! Typed error taxonomy shared by every caller of the cache and resilience layer

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Result alias used across the crate
pub type ServiceResult<T> = Result<T, ServiceError>;

/// A single field-level validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Classification of a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    RateLimit { retry_after: Option<Duration> },
    NotFound,
    ServiceUnreachable,
    Validation { issues: Vec<ValidationIssue> },
    Configuration,
    Permission,
    QuotaExceeded,
    Timeout { timeout: Option<Duration> },
    Network,
    Conflict,
    /// Call rejected by an open circuit breaker
    CircuitOpen,
    /// A caller-supplied cancellation aborted the operation
    Cancelled,
    /// Anything that does not map to a more specific kind
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::RateLimit { .. } => "RATE_LIMIT_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::ServiceUnreachable => "SERVICE_UNAVAILABLE",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Permission => "PERMISSION_ERROR",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Conflict => "CONFLICT_ERROR",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "API_ERROR",
        }
    }

    /// Human-readable error name used in the JSON shape
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authentication => "AuthenticationError",
            Self::RateLimit { .. } => "RateLimitError",
            Self::NotFound => "NotFoundError",
            Self::ServiceUnreachable => "ServiceUnavailableError",
            Self::Validation { .. } => "ValidationError",
            Self::Configuration => "ConfigurationError",
            Self::Permission => "PermissionError",
            Self::QuotaExceeded => "QuotaExceededError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Network => "NetworkError",
            Self::Conflict => "ConflictError",
            Self::CircuitOpen => "CircuitOpenError",
            Self::Cancelled => "CancelledError",
            Self::Internal => "ApiError",
        }
    }

    /// Transient kinds that are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout { .. } | Self::ServiceUnreachable | Self::RateLimit { .. }
        )
    }
}

/// Error carried by every fallible operation of the layer
#[derive(Debug, Clone, Error)]
#[error("{}: {}", .kind.name(), .message)]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
    status_code: Option<u16>,
    details: Option<Value>,
    timestamp: DateTime<Utc>,
    service: Option<String>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            details: None,
            timestamp: Utc::now(),
            service: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::new(ErrorKind::RateLimit { retry_after }, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn service_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnreachable, message)
    }

    pub fn validation(message: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Self::new(ErrorKind::Validation { issues }, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    pub fn timeout(message: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self::new(ErrorKind::Timeout { timeout }, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircuitOpen, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Server-supplied back-off hint, only present on rate limit errors
    pub fn retry_after(&self) -> Option<Duration> {
        match &self.kind {
            ErrorKind::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Field-level issues, only present on validation errors
    pub fn issues(&self) -> &[ValidationIssue] {
        match &self.kind {
            ErrorKind::Validation { issues } => issues,
            _ => &[],
        }
    }

    /// Serialized form shared with API consumers
    pub fn to_json(&self) -> ErrorJson {
        ErrorJson {
            name: self.name().to_string(),
            message: self.message.clone(),
            code: self.code().to_string(),
            status_code: self.status_code,
            details: self.merged_details(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            service: self.service.clone(),
            stack: None,
        }
    }

    /// Folds kind-specific payload (retry hint, issues, timeout) into `details`
    fn merged_details(&self) -> Option<Value> {
        let extra = match &self.kind {
            ErrorKind::RateLimit {
                retry_after: Some(retry_after),
            } => Some(("retryAfter", Value::from(retry_after.as_secs()))),
            ErrorKind::Validation { issues } if !issues.is_empty() => Some((
                "issues",
                serde_json::to_value(issues).unwrap_or(Value::Null),
            )),
            ErrorKind::Timeout {
                timeout: Some(timeout),
            } => Some(("timeoutMs", Value::from(timeout.as_millis() as u64))),
            _ => None,
        };

        match (self.details.clone(), extra) {
            (details, None) => details,
            (None, Some((key, value))) => {
                let mut map = Map::new();
                map.insert(key.to_string(), value);
                Some(Value::Object(map))
            }
            (Some(Value::Object(mut map)), Some((key, value))) => {
                map.insert(key.to_string(), value);
                Some(Value::Object(map))
            }
            (Some(other), Some((key, value))) => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map.insert(key.to_string(), value);
                Some(Value::Object(map))
            }
        }
    }
}

impl Serialize for ServiceError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// JSON shape of any taxonomy error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorJson {
    pub name: String,
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}
