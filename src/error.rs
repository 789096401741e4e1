//! Error types shared across the service.
//!
//! [`ConfigError`] and [`ModelError`] are library errors. [`ApiError`] is what
//! handlers return; it renders as `{"detail": "..."}` with a matching status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("rate limit capacity must be a positive finite number, got {0}")]
    InvalidCapacity(f64),
    #[error("rate limit refill rate must be a non-negative finite number, got {0}")]
    InvalidRefillRate(f64),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("malformed model: {0}")]
    Malformed(String),
    #[error("unsupported value for feature '{0}'")]
    InvalidFeature(String),
    #[error("query must be a JSON object")]
    InvalidQuery,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),
    /// 429
    RateLimited,
    /// 500
    Internal(String),
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self { ApiError::Internal(e.to_string()) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
