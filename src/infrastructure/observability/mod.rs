//! Observability infrastructure - metrics facade helpers

pub mod metrics;
