// SPDX-License-Identifier: MIT

//! Application error types with consistent API responses,
//! plus the retry categorization used by the queue worker.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Fitbit API error: {0}")]
    FitbitApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Marker message for Fitbit 429 responses.
    pub const FITBIT_RATE_LIMIT: &'static str = "Rate limit exceeded";
    /// Marker message for Fitbit 401 responses.
    pub const FITBIT_TOKEN_ERROR: &'static str = "Token expired or invalid";

    /// True if this error indicates an expired or revoked Fitbit credential.
    pub fn is_token_error(&self) -> bool {
        match self {
            AppError::FitbitApi(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("token")
                    || msg.contains("unauthorized")
                    || msg.contains("authentication")
            }
            _ => false,
        }
    }
}

/// Failure categories that decide whether a queued job is retried.
///
/// Validation and not-found failures can never succeed on retry; everything
/// else is assumed transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    TokenError,
    ApiError,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Validation | ErrorKind::NotFound)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TokenError => "token_error",
            ErrorKind::ApiError => "api_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorize an error for the queue worker's retry decision.
pub fn categorize(err: &AppError) -> ErrorKind {
    match err {
        AppError::BadRequest(_) | AppError::Unauthorized => ErrorKind::Validation,
        AppError::NotFound(_) => ErrorKind::NotFound,
        AppError::FitbitApi(_) if err.is_token_error() => ErrorKind::TokenError,
        AppError::FitbitApi(_) => ErrorKind::ApiError,
        AppError::Database(_) | AppError::Internal(_) => ErrorKind::Unknown,
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::FitbitApi(msg) => {
                (StatusCode::BAD_GATEWAY, "fitbit_error", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_and_not_found_are_terminal() {
        assert!(!categorize(&AppError::BadRequest("bad payload".into())).is_retryable());
        assert!(!categorize(&AppError::NotFound("account 42".into())).is_retryable());
    }

    #[test]
    fn test_token_and_api_errors_are_retryable() {
        let token = AppError::FitbitApi(AppError::FITBIT_TOKEN_ERROR.to_string());
        assert_eq!(categorize(&token), ErrorKind::TokenError);
        assert!(categorize(&token).is_retryable());

        let rate = AppError::FitbitApi(AppError::FITBIT_RATE_LIMIT.to_string());
        assert_eq!(categorize(&rate), ErrorKind::ApiError);
        assert!(categorize(&rate).is_retryable());
    }

    #[test]
    fn test_unexpected_errors_default_to_retryable() {
        let db = AppError::Database("connection reset".into());
        assert_eq!(categorize(&db), ErrorKind::Unknown);
        assert!(categorize(&db).is_retryable());
    }
}
