//! Error classification and process-wide error accounting

mod factory;
mod handler;

pub use factory::ErrorFactory;
pub use handler::{ErrorContext, ErrorHandler, ErrorRecord};
