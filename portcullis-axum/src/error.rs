use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::types::LoginResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Sent for locked accounts and blocked addresses alike, with no timing hint.
    #[error("Too many failed attempts")]
    TooManyAttempts,

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<portcullis_core::Error> for ApiError {
    fn from(err: portcullis_core::Error) -> Self {
        match err {
            portcullis_core::Error::Validation(e) => ApiError::BadRequest(e.to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(ref detail) => {
                tracing::debug!(detail = %detail, "Rejecting malformed login request");
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "Invalid request" })),
                )
                    .into_response()
            }
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                Json(LoginResponse::invalid_credentials()),
            )
                .into_response(),
            ApiError::TooManyAttempts => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(LoginResponse::too_many_attempts()),
            )
                .into_response(),
            ApiError::InternalError(ref detail) => {
                tracing::error!(detail = %detail, "Login request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
