//! Error types module
//!
//! All errors surfaced by the ingest core are unified under [`AppError`].
//! The variant decides everything downstream: HTTP status at the API
//! boundary, and retry-vs-dead-letter at the worker boundary. Only
//! `Transient` is ever retried; `Fatal` marks a detected invariant
//! violation and goes straight to the dead-letter queue.

use std::io;

/// Coarse classification used by workers and the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    Transient,
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Transient failure: {message}")]
    TransientWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invariant violation: {0}")]
    Fatal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Transient(_) | AppError::TransientWithSource { .. } => ErrorKind::Transient,
            AppError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether a queue consumer may retry the operation that produced this error.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// HTTP status code for client-facing surfaces.
    pub fn http_status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidInput => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Transient => 503,
            ErrorKind::Fatal => 500,
        }
    }

    /// Machine-readable error code (e.g. "CONFLICT") for the JSON error body.
    pub fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::Fatal => "INTERNAL_ERROR",
        }
    }

    pub fn suggested_action(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::InvalidInput => Some("Check request parameters and try again"),
            ErrorKind::NotFound => Some("Verify the resource ID exists"),
            ErrorKind::Unauthorized => Some("Provide caller credentials"),
            ErrorKind::Forbidden => Some("Verify the session owner matches the caller"),
            ErrorKind::Conflict => Some("Fetch the current state before retrying"),
            ErrorKind::Transient => Some("Retry with exponential backoff"),
            ErrorKind::Fatal => None,
        }
    }

    /// Wrap an arbitrary error as a retriable transient failure.
    pub fn transient(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        AppError::TransientWithSource {
            message: context.into(),
            source: source.into(),
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::transient("IO error", err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_the_only_retriable_kind() {
        assert!(AppError::Transient("queue down".into()).is_transient());
        assert!(AppError::transient("db", anyhow::anyhow!("pool closed")).is_transient());
        assert!(!AppError::NotFound("session".into()).is_transient());
        assert!(!AppError::Conflict("terminal".into()).is_transient());
        assert!(!AppError::Fatal("bad invariant".into()).is_transient());
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::InvalidInput("x".into()).http_status_code(), 400);
        assert_eq!(AppError::Unauthorized("x".into()).http_status_code(), 401);
        assert_eq!(AppError::Forbidden("x".into()).http_status_code(), 403);
        assert_eq!(AppError::NotFound("x".into()).http_status_code(), 404);
        assert_eq!(AppError::Conflict("x".into()).http_status_code(), 409);
        assert_eq!(AppError::Transient("x".into()).http_status_code(), 503);
        assert_eq!(AppError::Fatal("x".into()).http_status_code(), 500);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(AppError::Conflict("x".into()).error_code(), "CONFLICT");
        assert_eq!(AppError::Transient("x".into()).error_code(), "TRANSIENT");
    }
}
