//! Relay error taxonomy and HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("duplicate action")]
    DuplicateAction,

    #[error("rate limited")]
    RateLimited,

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::InvalidShape(_) => "invalid_shape",
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::PolicyViolation(_) => "policy_violation",
            ApiError::DuplicateAction => "duplicate_action",
            ApiError::RateLimited => "rate_limited",
            ApiError::NotFound => "not_found",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InvalidShape(_)
            | ApiError::InvalidInput(_)
            | ApiError::PolicyViolation(_) => StatusCode::BAD_REQUEST,
            ApiError::DuplicateAction => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Internal(detail) => {
                // Full detail goes to the log; the caller gets an opaque
                // reference to quote at support.
                let reference = uuid::Uuid::new_v4().to_string();
                tracing::error!(%reference, detail, "internal error");
                json!({
                    "error": self.kind(),
                    "message": "an unexpected error occurred",
                    "reference": reference,
                })
            }
            other => json!({
                "error": other.kind(),
                "message": other.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<crate::storage::StorageError> for ApiError {
    fn from(err: crate::storage::StorageError) -> Self {
        match err {
            crate::storage::StorageError::DuplicateNullifier => ApiError::DuplicateAction,
            crate::storage::StorageError::NotFound => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}
