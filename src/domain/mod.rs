//! Domain layer - cache contract and error taxonomy

pub mod cache;
pub mod error;

pub use error::{ErrorJson, ErrorKind, ServiceError, ServiceResult, ValidationIssue};
