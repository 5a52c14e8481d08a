//! Counters emitted through the `metrics` facade
//!
//! Nothing is exported unless the host process installs a recorder.

use metrics::counter;

/// Record a cache operation outcome (`hit`, `miss`, `ok`, `error`)
pub fn record_cache_operation(provider: &'static str, operation: &'static str, result: &'static str) {
    counter!(
        "cache_operations_total",
        "provider" => provider,
        "operation" => operation,
        "result" => result
    )
    .increment(1);
}

/// Record a retry scheduled by the retry executor
pub fn record_retry_attempt(service: &str) {
    counter!("retry_attempts_total", "service" => service.to_string()).increment(1);
}

/// Record a circuit breaker state change
pub fn record_circuit_transition(breaker: &str, to: &'static str) {
    counter!(
        "circuit_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => to
    )
    .increment(1);
}

/// Record an error that went through the error handler
pub fn record_service_error(code: &'static str, service: &str) {
    counter!(
        "service_errors_total",
        "code" => code,
        "service" => service.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_cache_operation("local", "get", "hit");
        record_retry_attempt("github");
        record_circuit_transition("github", "OPEN");
        record_service_error("NETWORK_ERROR", "github");
    }
}
