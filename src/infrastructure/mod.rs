//! Infrastructure layer - providers, error classification and resilience

pub mod cache;
pub mod error;
pub mod logging;
pub mod observability;
pub mod resilience;
