// crates/server/src/error.rs
//! API error taxonomy.
//!
//! Validation failures answer 400 with a short reason and change no state;
//! missing/bad auth answers 401. Everything else in the pipeline is handled
//! in place (transient I/O is swallowed with a warning, parse errors skip a
//! line) and never surfaces through HTTP.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl ApiError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
