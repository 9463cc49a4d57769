pub mod stream;
pub mod upload;

use axum::{http::StatusCode, response::IntoResponse, Json};

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
