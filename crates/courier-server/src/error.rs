use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use courier_core::error::{AppError, FetchError};

use crate::dto::ErrorResponse;

/// Errors a handler can return; each maps to one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::App(err) => match err {
                AppError::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
                AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
                AppError::Resolver { .. } => (StatusCode::BAD_GATEWAY, "resolver_error"),
                AppError::Exhausted { .. } => (StatusCode::BAD_GATEWAY, "fetch_exhausted"),
                AppError::Fetch(FetchError::Timeout(_)) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                AppError::Fetch(_) => (StatusCode::BAD_GATEWAY, "fetch_error"),
                AppError::Generic(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
