//! Axum-specific error types and mappings.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use modelpull_core::PullError;
use serde::Serialize;
use thiserror::Error;

/// Control-plane error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (invalid input).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = ErrorBody {
            error: message,
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<PullError> for HttpError {
    fn from(err: PullError) -> Self {
        match err {
            PullError::TaskNotFound { id } => Self::NotFound(format!("task {id} not found")),
            PullError::IllegalTransition { .. } | PullError::InvalidReference { .. } => {
                Self::BadRequest(err.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_not_found_maps_to_404() {
        let err: HttpError = PullError::TaskNotFound { id: 7 }.into();
        assert!(matches!(err, HttpError::NotFound(_)));
    }

    #[test]
    fn illegal_transition_maps_to_400() {
        let err: HttpError = PullError::IllegalTransition {
            action: "pause".to_string(),
            state: "done".to_string(),
        }
        .into();
        assert!(matches!(err, HttpError::BadRequest(_)));
    }
}
