//! Error types for inventory reconciliation.

use thiserror::Error;

/// Result type alias using the reconciliation Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for reconciliation operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing server profile, mapping table, or setting.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request input is invalid; `field` names what the operator must fix.
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// Network failure or timeout against the monitoring source. Safe to retry.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Ambiguous duplicate across target kinds.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bulk import finished with mixed outcomes.
    #[error("Partial batch failure: {succeeded} succeeded, {failed} failed")]
    PartialBatchFailure { succeeded: usize, failed: usize },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller lacks the capability for this operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Asset-database constraint violation
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// HTTP request failed in a way retrying will not fix
    #[error("Request error: {0}")]
    Request(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a field-level validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            return Error::Transient(e.to_string());
        }
        match e.status() {
            Some(status) if status.is_server_error() => Error::Transient(e.to_string()),
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Error::Forbidden(e.to_string())
            }
            Some(status) if status.as_u16() == 404 => Error::NotFound(e.to_string()),
            _ => Error::Request(e.to_string()),
        }
    }
}
