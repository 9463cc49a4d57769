//! Router setup.

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::chunk_rate_limit_middleware;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    // Part headers and field names ride along with the chunk body.
    let multipart_limit = state.config.max_chunk_part_bytes as usize + 64 * 1024;

    let chunk_route = Router::new()
        .route("/upload/chunk", post(handlers::upload::upload_chunk))
        .layer(DefaultBodyLimit::max(multipart_limit))
        .layer(axum_middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            chunk_rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/upload/initialize", post(handlers::upload::initialize_upload))
        .merge(chunk_route)
        .route("/upload/status/{session_id}", get(handlers::upload::upload_status))
        .route("/upload/resume/{session_id}", post(handlers::upload::resume_upload))
        .route("/upload/cancel/{session_id}", delete(handlers::upload::cancel_upload))
        .route("/upload/sessions", get(handlers::upload::list_sessions))
        .route("/stream/{filename}", get(handlers::stream::stream_video))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
