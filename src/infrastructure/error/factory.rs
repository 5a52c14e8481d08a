//! Maps transport and status-code failures onto the error taxonomy

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use serde_json::{json, Map, Value};

use crate::domain::{ErrorKind, ServiceError};

/// Stateless classifier for foreign errors
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorFactory;

impl ErrorFactory {
    /// Deterministic status code mapping
    ///
    /// A `retryAfter` (or `retry_after`) number in `details` becomes the rate
    /// limit hint, in seconds.
    pub fn from_http_status(
        status: u16,
        message: impl Into<String>,
        service: Option<&str>,
        details: Option<Value>,
    ) -> ServiceError {
        let kind = match status {
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Permission,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimit {
                retry_after: details.as_ref().and_then(retry_after_from_details),
            },
            500..=599 => ErrorKind::ServiceUnreachable,
            _ => ErrorKind::Internal,
        };

        let mut error = ServiceError::new(kind, message).with_status_code(status);

        if let Some(details) = details {
            error = error.with_details(details);
        }

        attach_service(error, service)
    }

    /// Classifies an HTTP client failure
    pub fn from_reqwest_error(error: &reqwest::Error, service: Option<&str>) -> ServiceError {
        if error.is_timeout() {
            return attach_service(
                ServiceError::timeout(format!("Request timed out: {}", error), None),
                service,
            );
        }

        if error.is_connect() {
            return attach_service(
                ServiceError::network(format!("Connection failed: {}", error)),
                service,
            );
        }

        match error.status() {
            Some(status) => Self::from_http_status(status.as_u16(), error.to_string(), service, None),
            None if error.is_request() => attach_service(
                ServiceError::network(format!("Request failed: {}", error)),
                service,
            ),
            None => attach_service(ServiceError::internal(error.to_string()), service),
        }
    }

    /// Classifies a remote cache failure
    pub fn from_redis_error(error: &redis::RedisError, service: Option<&str>) -> ServiceError {
        let classified = if error.is_timeout() {
            ServiceError::timeout(format!("Remote cache timed out: {}", error), None)
        } else if error.is_connection_refusal() || error.is_connection_dropped() || error.is_io_error()
        {
            ServiceError::network(format!("Remote cache connection failed: {}", error))
        } else {
            ServiceError::service_unreachable(format!("Remote cache error: {}", error))
        };

        attach_service(classified, service)
    }

    pub fn from_io_error(error: &io::Error, service: Option<&str>) -> ServiceError {
        let classified = match error.kind() {
            io::ErrorKind::TimedOut => ServiceError::timeout(error.to_string(), None),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable => ServiceError::network(error.to_string()),
            _ => ServiceError::internal(error.to_string()),
        };

        attach_service(classified, service)
    }

    /// Unwraps an arbitrary error, walking its source chain for a known type
    pub fn from_error(error: &(dyn StdError + 'static), service: Option<&str>) -> ServiceError {
        let mut current: Option<&(dyn StdError + 'static)> = Some(error);

        while let Some(err) = current {
            if let Some(service_error) = err.downcast_ref::<ServiceError>() {
                return fill_service(service_error.clone(), service);
            }
            if let Some(e) = err.downcast_ref::<reqwest::Error>() {
                return Self::from_reqwest_error(e, service);
            }
            if let Some(e) = err.downcast_ref::<redis::RedisError>() {
                return Self::from_redis_error(e, service);
            }
            if let Some(e) = err.downcast_ref::<io::Error>() {
                return Self::from_io_error(e, service);
            }
            if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
                return attach_service(ServiceError::timeout(error.to_string(), None), service);
            }
            current = err.source();
        }

        attach_service(ServiceError::internal(error.to_string()), service)
    }

    /// Turns a non-success HTTP response into a classified error
    ///
    /// Reads the `Retry-After` header (seconds) and the body, which becomes
    /// `details` when it is JSON.
    pub async fn from_response(response: reqwest::Response, service: Option<&str>) -> ServiceError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        let message = parsed
            .as_ref()
            .and_then(message_from_body)
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty() && parsed.is_none()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| format!("HTTP {}", status));

        let mut details = match parsed {
            Some(Value::Object(map)) => Some(Value::Object(map)),
            Some(other) => Some(json!({ "body": other })),
            None if !body.trim().is_empty() => Some(json!({ "body": body })),
            None => None,
        };

        if let Some(seconds) = retry_after {
            if let Value::Object(map) = details.get_or_insert_with(|| Value::Object(Map::new())) {
                map.insert("retryAfter".to_string(), Value::from(seconds));
            }
        }

        Self::from_http_status(status.as_u16(), message, service, details)
    }
}

fn attach_service(error: ServiceError, service: Option<&str>) -> ServiceError {
    match service {
        Some(service) => error.with_service(service),
        None => error,
    }
}

fn fill_service(error: ServiceError, service: Option<&str>) -> ServiceError {
    if error.service().is_some() {
        error
    } else {
        attach_service(error, service)
    }
}

fn retry_after_from_details(details: &Value) -> Option<Duration> {
    let value = details.get("retryAfter").or_else(|| details.get("retry_after"))?;

    let seconds = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}

fn message_from_body(body: &Value) -> Option<String> {
    let candidates = [
        body.get("message"),
        body.get("error").and_then(|e| e.get("message")),
        body.get("error"),
        body.get("error_description"),
        body.get("detail"),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
}

impl From<reqwest::Error> for ServiceError {
    fn from(error: reqwest::Error) -> Self {
        ErrorFactory::from_reqwest_error(&error, None)
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(error: redis::RedisError) -> Self {
        ErrorFactory::from_redis_error(&error, None)
    }
}

impl From<io::Error> for ServiceError {
    fn from(error: io::Error) -> Self {
        ErrorFactory::from_io_error(&error, None)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(error: serde_json::Error) -> Self {
        ServiceError::internal(format!("serialization failed: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (401, "AUTHENTICATION_ERROR"),
            (403, "PERMISSION_ERROR"),
            (404, "NOT_FOUND"),
            (409, "CONFLICT_ERROR"),
            (429, "RATE_LIMIT_ERROR"),
            (500, "SERVICE_UNAVAILABLE"),
            (502, "SERVICE_UNAVAILABLE"),
            (503, "SERVICE_UNAVAILABLE"),
            (599, "SERVICE_UNAVAILABLE"),
            (400, "API_ERROR"),
            (418, "API_ERROR"),
        ];

        for (status, code) in cases {
            let error = ErrorFactory::from_http_status(status, "failed", Some("github"), None);
            assert_eq!(error.code(), code, "status {}", status);
            assert_eq!(error.status_code(), Some(status));
            assert_eq!(error.service(), Some("github"));
        }
    }

    #[test]
    fn test_rate_limit_reads_retry_after_from_details() {
        let error = ErrorFactory::from_http_status(
            429,
            "slow down",
            None,
            Some(json!({"retryAfter": 12})),
        );
        assert_eq!(error.retry_after(), Some(Duration::from_secs(12)));

        let snake = ErrorFactory::from_http_status(429, "slow down", None, Some(json!({"retry_after": "3"})));
        assert_eq!(snake.retry_after(), Some(Duration::from_secs(3)));

        let missing = ErrorFactory::from_http_status(429, "slow down", None, None);
        assert_eq!(missing.retry_after(), None);
    }

    #[test]
    fn test_io_error_classification() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(ErrorFactory::from_io_error(&refused, None).code(), "NETWORK_ERROR");

        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(ErrorFactory::from_io_error(&timed_out, None).code(), "TIMEOUT_ERROR");

        let other = io::Error::new(io::ErrorKind::InvalidData, "garbage");
        assert_eq!(ErrorFactory::from_io_error(&other, None).code(), "API_ERROR");
    }

    #[test]
    fn test_from_error_walks_source_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("wrapper")]
        struct Wrapper(#[source] io::Error);

        let wrapped = Wrapper(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        let error = ErrorFactory::from_error(&wrapped, Some("slack"));

        assert_eq!(error.code(), "NETWORK_ERROR");
        assert_eq!(error.service(), Some("slack"));
    }

    #[test]
    fn test_from_error_keeps_existing_service_error() {
        let original = ServiceError::conflict("exists").with_service("jira");
        let error = ErrorFactory::from_error(&original, Some("other"));

        assert_eq!(error.code(), "CONFLICT_ERROR");
        assert_eq!(error.service(), Some("jira"));
    }

    #[test]
    fn test_from_error_unknown_is_generic() {
        let error = ErrorFactory::from_error(&std::fmt::Error, None);
        assert_eq!(error.code(), "API_ERROR");
    }

    #[test]
    fn test_redis_connection_refusal_is_network() {
        let error = redis::RedisError::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        let classified = ErrorFactory::from_redis_error(&error, Some("cache"));

        assert_eq!(classified.code(), "NETWORK_ERROR");
        assert!(classified.is_retryable());
    }

    #[test]
    fn test_message_from_body_variants() {
        assert_eq!(message_from_body(&json!({"message": "a"})), Some("a".to_string()));
        assert_eq!(
            message_from_body(&json!({"error": {"message": "b"}})),
            Some("b".to_string())
        );
        assert_eq!(message_from_body(&json!({"error": "c"})), Some("c".to_string()));
        assert_eq!(message_from_body(&json!({"other": 1})), None);
    }
}
