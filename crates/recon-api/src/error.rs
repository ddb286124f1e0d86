//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        field: Option<String>,
    },
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// The monitoring source is unreachable or timed out.
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<recon_core::Error> for ApiError {
    fn from(err: recon_core::Error) -> Self {
        use recon_core::Error;
        match err {
            Error::Validation { field, message } => ApiError::BadRequest {
                message: format!("{}: {}", field, message),
                field: Some(field),
            },
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::Forbidden(msg) => ApiError::Forbidden(msg),
            Error::Conflict(msg) | Error::Constraint(msg) => ApiError::Conflict(msg),
            Error::Transient(msg) => ApiError::Unavailable(msg),
            Error::Serialization(msg) => ApiError::BadRequest {
                message: msg,
                field: None,
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, field) = match self {
            ApiError::BadRequest { message, field } => (StatusCode::BAD_REQUEST, message, field),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            ApiError::Internal(msg) => {
                error!(subsystem = "api", error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let mut body = serde_json::json!({ "error": message });
        if let Some(field) = field {
            body["field"] = serde_json::Value::String(field);
        }
        (status, Json(body)).into_response()
    }
}
