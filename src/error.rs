//! # Error Handling
//!
//! HTTP-facing error type and its conversion into JSON error responses.
//! Lobby requests arriving over the WebSocket use [`crate::lobby::LobbyError`]
//! instead; this type only covers the REST endpoints.
//!
//! ## Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "Sweep must satisfy 0 < start_hz < end_hz < 24000 Hz",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use crate::analysis::AnalysisError;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Error categories of the REST API.
///
/// - **Internal** / **ConfigError**: 500
/// - **BadRequest** / **ValidationError**: 400
/// - **NotFound**: 404
#[derive(Debug)]
pub enum AppError {
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    NotFound(String),

    ConfigError(String),

    /// Input parsed but failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (actix_web::http::StatusCode, &'static str, &str) {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed request bodies are the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Signal problems the caller can fix map to 400; the rest to 500.
impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Decode(_)
            | AnalysisError::EmptySignal
            | AnalysisError::SampleRateMismatch { .. }
            | AnalysisError::InvalidInput(_) => AppError::ValidationError(err.to_string()),
            AnalysisError::Encode(_) | AnalysisError::Fft(_) | AnalysisError::FilterDesign(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
