//! Mapping of engine errors onto HTTP responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::client::ClientErrorKind;
use crate::error::EngineError;

/// Error response with body `{"errors": ["message"]}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::Validation(_) | EngineError::MissingMetadata(_) => {
                Self::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            EngineError::NotFound(_) => Self::not_found(err.to_string()),
            _ if err
                .client_error()
                .is_some_and(|e| e.kind == ClientErrorKind::Cancelled) =>
            {
                tracing::warn!("Request cancelled: {}", err);
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "request cancelled")
            }
            _ => {
                tracing::error!("Request failed: {}", err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error, see server logs for details",
                )
            }
        }
    }
}

/// Malformed or mistyped request bodies are client errors.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "errors": [self.message] }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
