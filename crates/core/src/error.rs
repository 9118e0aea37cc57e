//! Core Error Types
//!
//! Errors raised below the application layer: tool argument decoding,
//! tool lookup and annotation validation. The application crate wraps
//! these together with provider and storage errors in `AppError`.

use thiserror::Error;

/// Core error type for the Marginalia workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Tool arguments could not be decoded
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create an invalid-arguments error
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
