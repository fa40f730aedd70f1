//! # Error Handling
//!
//! This module defines the HTTP-facing error type and how it's converted to a response.
//! Errors that happen inside a running voice session never reach HTTP (the
//! connection is already a WebSocket by then); those live in `session::error`.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of failure
//! - **Data**: Each variant carries a human-readable message
//!
//! ### Traits for Error Conversion
//! - **Display trait**: How errors are formatted as strings
//! - **ResponseError trait**: How errors become HTTP responses
//! - **From trait**: Lets `?` convert other errors automatically

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: The WebSocket handshake was invalid (400)
/// - **ServiceUnavailable**: All session slots are taken (503)
#[derive(Debug)]
pub enum AppError {
    /// Server-side failures
    Internal(String),

    /// Client sent an invalid request
    BadRequest(String),

    /// The server is at its session limit
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "Session limit reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Anything unexpected becomes a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// A rejected WebSocket upgrade is the client's fault.
impl From<actix_web::Error> for AppError {
    fn from(err: actix_web::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use serde_json::Value;

    #[actix_web::test]
    async fn test_error_response_body() {
        let err = AppError::ServiceUnavailable("Session limit reached".to_string());
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body()).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "service_unavailable");
        assert_eq!(json["error"]["message"], "Session limit reached");
        assert!(json["error"]["timestamp"].is_string());
    }

    #[test]
    fn test_display_and_status() {
        let err = AppError::BadRequest("missing upgrade header".to_string());
        assert_eq!(err.to_string(), "Bad request: missing upgrade header");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
