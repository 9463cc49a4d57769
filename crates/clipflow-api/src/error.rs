//! HTTP error response conversion
//!
//! Endpoints recover nothing: every `AppError` is translated to its status
//! code and a stable JSON body, and returned. The wrapper type exists
//! because of the orphan rule: `IntoResponse` cannot be implemented for
//! `AppError` directly from here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use clipflow_core::{AppError, ErrorKind};

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether this error is recoverable (can be retried)
    pub recoverable: bool,
    /// Suggested action for the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            recoverable: false,
            suggested_action: None,
        }
    }
}

#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let err = self.0;
        match err.kind() {
            ErrorKind::Transient | ErrorKind::Fatal => {
                tracing::error!(error = %err, "Request failed");
            }
            _ => {
                tracing::debug!(error = %err, "Request rejected");
            }
        }

        let status = StatusCode::from_u16(err.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Internal failures never leak their message to clients.
        let message = match err.kind() {
            ErrorKind::Transient => "Temporary failure, please retry".to_string(),
            ErrorKind::Fatal => "Internal server error".to_string(),
            _ => err.to_string(),
        };

        let body = ErrorResponse {
            error: message,
            code: err.error_code().to_string(),
            recoverable: err.is_transient(),
            suggested_action: err.suggested_action().map(String::from),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        let response = HttpAppError(AppError::Conflict("terminal session".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn transient_maps_to_503_without_detail() {
        let response =
            HttpAppError(AppError::Transient("pg pool exhausted".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let response = HttpAppError(AppError::Forbidden("owner mismatch".into())).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
