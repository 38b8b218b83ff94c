//! Error handling for the toll pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capture failure (retryable, bounded)
    #[error("Capture error: {0}")]
    Capture(String),

    /// Transcode failure (fatal for the run, no retry)
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// Recognition service failure (retryable per frame)
    #[error("Recognition error: {0}")]
    Recognition(String),

    /// Settlement failure (recorded as a non-success outcome, never retried)
    #[error("Settlement error: {0}")]
    Settlement(String),

    /// Barrier actuation failure (logged, fails safe closed)
    #[error("Actuation error: {0}")]
    Actuation(String),

    /// Run watchdog expired (fatal, forces cleanup)
    #[error("Watchdog timeout: {0}")]
    Watchdog(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl Error {
    /// Whether the bounded-retry helper may re-attempt after this error.
    ///
    /// Only capture and per-frame recognition failures (including their
    /// transport layer) are retryable; everything else unwinds to the
    /// stage boundary.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Capture(_) | Error::Recognition(_) | Error::Http(_) | Error::Io(_)
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Capture(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CAPTURE_ERROR",
                msg.clone(),
            ),
            Error::Transcode(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "TRANSCODE_ERROR",
                msg.clone(),
            ),
            Error::Recognition(msg) => (
                StatusCode::BAD_GATEWAY,
                "RECOGNITION_ERROR",
                msg.clone(),
            ),
            Error::Settlement(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SETTLEMENT_ERROR",
                msg.clone(),
            ),
            Error::Actuation(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ACTUATION_ERROR",
                msg.clone(),
            ),
            Error::Watchdog(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "WATCHDOG_TIMEOUT",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(Error::Capture("lens cap on".into()).is_retryable());
        assert!(Error::Recognition("503".into()).is_retryable());
        assert!(!Error::Transcode("exit 1".into()).is_retryable());
        assert!(!Error::Settlement("gateway down".into()).is_retryable());
        assert!(!Error::Watchdog("run overran".into()).is_retryable());
    }
}
