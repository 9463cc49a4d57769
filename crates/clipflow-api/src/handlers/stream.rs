//! Range reader
//!
//! Serves assembled originals under HTTP byte-range semantics. Bodies are
//! streamed straight from the blob store; the file is never buffered in
//! memory.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::sync::Arc;

use clipflow_core::AppError;
use clipflow_storage::keys;

use crate::error::HttpAppError;
use crate::state::AppState;

/// A validated range request against a resource of known length.
#[derive(Debug, PartialEq)]
pub enum RangeRequest {
    /// No (or unusable) Range header: serve the whole resource.
    Full,
    /// Inclusive byte bounds, both within the resource.
    Partial(u64, u64),
    /// The requested interval cannot be satisfied.
    Unsatisfiable,
}

/// Interpret a `Range` header against a resource of `len` bytes. A missing
/// start defaults to 0, a missing end to `len - 1`; an end past the
/// resource is clamped. Anything starting at or beyond `len` (or inverted)
/// is unsatisfiable.
pub fn parse_range(header: Option<&str>, len: u64) -> RangeRequest {
    let Some(raw) = header else {
        return RangeRequest::Full;
    };
    let Some(spec) = raw.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangeRequest::Full;
    };

    let start = if start_str.trim().is_empty() {
        0
    } else {
        match start_str.trim().parse::<u64>() {
            Ok(s) => s,
            Err(_) => return RangeRequest::Full,
        }
    };
    let end = if end_str.trim().is_empty() {
        len.saturating_sub(1)
    } else {
        match end_str.trim().parse::<u64>() {
            Ok(e) => e.min(len.saturating_sub(1)),
            Err(_) => return RangeRequest::Full,
        }
    };

    if len == 0 || start >= len || start > end {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Partial(start, end)
}

/// Stream an assembled original, honoring byte ranges
#[utoipa::path(
    get,
    path = "/stream/{filename}",
    tag = "stream",
    params(("filename" = String, Path, description = "Assembled file name under uploads/")),
    responses(
        (status = 200, description = "Whole file", content_type = "video/mp4"),
        (status = 206, description = "Requested byte range", content_type = "video/mp4"),
        (status = 404, description = "No such file"),
        (status = 416, description = "Range not satisfiable")
    )
)]
pub async fn stream_video(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(AppError::InvalidInput("invalid file name".into()).into());
    }

    let key = keys::upload(&filename);
    let len = state
        .storage
        .content_length(&key)
        .await
        .map_err(AppError::from)?;

    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    let (status, start, end) = match parse_range(range_header, len) {
        RangeRequest::Full => (StatusCode::OK, 0, len.saturating_sub(1)),
        RangeRequest::Partial(start, end) => (StatusCode::PARTIAL_CONTENT, start, end),
        RangeRequest::Unsatisfiable => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", len))
                .body(Body::empty())
                .map_err(|e| AppError::Fatal(format!("failed to build response: {}", e)).into());
        }
    };

    let body = if len == 0 {
        Body::empty()
    } else {
        let stream = state
            .storage
            .read_range(&key, start, end)
            .await
            .map_err(AppError::from)?
            .map(|item| item.map_err(|e| std::io::Error::other(format!("storage stream error: {}", e))));
        Body::from_stream(stream)
    };

    let content_length = if len == 0 { 0 } else { end - start + 1 };
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, content_length);
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, len),
        );
    }

    builder
        .body(body)
        .map_err(|e| AppError::Fatal(format!("failed to build response: {}", e)).into())
}
