//! Common error types shared across crates.

use thiserror::Error;

/// Top-level service error type.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ServiceError::BadRequest`] → 400
/// - [`ServiceError::NotFound`] → 404
/// - [`ServiceError::Database`] → 500
/// - [`ServiceError::Internal`] → 500
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was malformed (e.g. a non-numeric record id).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The data store rejected or failed the operation.
    #[error("database error: {0}")]
    Database(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Database(_) => 500,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in [`crate::protocol::ErrorResponse`].
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Database(_) | ServiceError::Internal(_) => "internal_error",
        }
    }
}
