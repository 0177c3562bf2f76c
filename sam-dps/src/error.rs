//! Error types for sam-dps
//!
//! Every error leaving the HTTP surface carries a short reason code as its
//! message (`ScopeValidationError`, `DBError`, ...). Underlying database and
//! I/O details are logged, never returned to the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Caller lacks role or scope (403)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Rejected because of current scope state (409)
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// sam-common error
    #[error("Common error: {0}")]
    Common(#[from] sam_common::Error),
}

impl ApiError {
    /// Wire reason code for a common error
    fn common_parts(err: &sam_common::Error) -> (StatusCode, &'static str, String) {
        use sam_common::Error;
        match err {
            Error::Database(_) | Error::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "DBError".to_string(),
            ),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            Error::PermissionDenied(msg) => {
                (StatusCode::FORBIDDEN, "PERMISSION_DENIED", msg.clone())
            }
            Error::FailedPrecondition(msg) => {
                (StatusCode::CONFLICT, "FAILED_PRECONDITION", msg.clone())
            }
            Error::Io(_) | Error::Config(_) | Error::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "InternalError".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::PermissionDenied(msg) => (StatusCode::FORBIDDEN, "PERMISSION_DENIED", msg),
            ApiError::FailedPrecondition(msg) => {
                (StatusCode::CONFLICT, "FAILED_PRECONDITION", msg)
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => {
                tracing::error!(error = %err, "Request failed");
                Self::common_parts(err)
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_errors_are_reported_as_db_error() {
        let err = ApiError::from(sam_common::Error::Database(sqlx::Error::RowNotFound));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn precondition_maps_to_conflict() {
        let response = ApiError::FailedPrecondition("DeletionInProgress".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
