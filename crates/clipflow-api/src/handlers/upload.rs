//! Upload session endpoints
//!
//! The chunk endpoint replies 200 once the chunk is spooled and queued.
//! Commit is asynchronous, so clients poll the status endpoint instead of
//! inferring receipt from the 200.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use clipflow_core::{constants, AppError, SessionMetadata, SessionState, UploadSession};

use crate::auth::Caller;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitializeUploadRequest {
    #[validate(length(min = 1, max = 512))]
    pub filename: String,
    /// Declared total size in bytes, at most 5 GiB.
    #[validate(range(min = 1, max = 5368709120u64))]
    pub file_size: u64,
    /// Bytes per chunk as the client will slice the file.
    #[validate(range(min = 1))]
    pub chunk_size: u64,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: SessionMetadata,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitializeUploadResponse {
    pub session_id: Uuid,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub uploaded_chunks: Vec<u32>,
}

/// Start a chunked upload session
#[utoipa::path(
    post,
    path = "/upload/initialize",
    tag = "upload",
    request_body = InitializeUploadRequest,
    responses(
        (status = 201, description = "Session created", body = InitializeUploadResponse),
        (status = 400, description = "Constraint violation", body = ErrorResponse),
        (status = 401, description = "Missing caller identity", body = ErrorResponse)
    )
)]
pub async fn initialize_upload(
    Caller(owner): Caller,
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitializeUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate().map_err(AppError::from)?;

    let session = state
        .manager
        .init(
            owner,
            request.filename,
            request.file_size,
            request.chunk_size,
            request.metadata,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitializeUploadResponse {
            session_id: session.id,
            total_chunks: session.total_chunks,
            chunk_size: session.chunk_size,
            uploaded_chunks: Vec::new(),
        }),
    ))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQueuedResponse {
    pub session_id: Uuid,
    pub chunk_index: u32,
    pub status: &'static str,
}

/// Accept one chunk as a multipart part
#[utoipa::path(
    post,
    path = "/upload/chunk",
    tag = "upload",
    responses(
        (status = 200, description = "Chunk queued for commit", body = ChunkQueuedResponse),
        (status = 400, description = "Bad chunk index or oversized part", body = ErrorResponse),
        (status = 403, description = "Owner mismatch", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session already terminal", body = ErrorResponse),
        (status = 429, description = "Throttled")
    )
)]
pub async fn upload_chunk(
    Caller(caller): Caller,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let mut session_id: Option<Uuid> = None;
    let mut chunk_index: Option<u32> = None;
    let mut chunk_body: Option<bytes::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("sessionId") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("bad sessionId field: {}", e)))?;
                session_id = Some(
                    text.parse()
                        .map_err(|_| AppError::InvalidInput("sessionId is not a UUID".into()))?,
                );
            }
            Some("chunkIndex") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("bad chunkIndex field: {}", e)))?;
                chunk_index = Some(
                    text.parse()
                        .map_err(|_| AppError::InvalidInput("chunkIndex is not an integer".into()))?,
                );
            }
            Some("chunk") => {
                if chunk_body.is_some() {
                    return Err(AppError::InvalidInput(
                        "exactly one chunk part per request".into(),
                    )
                    .into());
                }
                chunk_body = Some(field.bytes().await.map_err(|e| {
                    AppError::InvalidInput(format!("failed to read chunk part: {}", e))
                })?);
            }
            _ => {}
        }
    }

    let session_id =
        session_id.ok_or_else(|| AppError::InvalidInput("missing sessionId field".into()))?;
    let chunk_index =
        chunk_index.ok_or_else(|| AppError::InvalidInput("missing chunkIndex field".into()))?;
    let body =
        chunk_body.ok_or_else(|| AppError::InvalidInput("missing chunk part".into()))?;

    state
        .intake
        .accept_chunk(
            caller,
            session_id,
            chunk_index,
            Box::pin(std::io::Cursor::new(body)),
        )
        .await?;

    Ok(Json(ChunkQueuedResponse {
        session_id,
        chunk_index,
        status: "queued",
    }))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub status: SessionState,
    /// Integer percent of committed chunks.
    pub progress: u8,
}

/// Upload progress
#[utoipa::path(
    get,
    path = "/upload/status/{session_id}",
    tag = "upload",
    params(("session_id" = Uuid, Path, description = "Upload session ID")),
    responses(
        (status = 200, description = "Session status", body = UploadStatusResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn upload_status(
    Caller(caller): Caller,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session = owned_session(&state, caller, session_id).await?;
    Ok(Json(UploadStatusResponse {
        uploaded_chunks: session.received.len() as u32,
        total_chunks: session.total_chunks,
        status: session.state,
        progress: session.progress_percent(),
    }))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResumeUploadResponse {
    pub missing_chunks: Vec<u32>,
    pub status: SessionState,
}

/// Resume an interrupted upload
#[utoipa::path(
    post,
    path = "/upload/resume/{session_id}",
    tag = "upload",
    params(("session_id" = Uuid, Path, description = "Upload session ID")),
    responses(
        (status = 200, description = "Chunks still missing", body = ResumeUploadResponse),
        (status = 400, description = "Upload already complete", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn resume_upload(
    Caller(caller): Caller,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    owned_session(&state, caller, session_id).await?;
    let report = state.manager.resume(session_id).await.map_err(|err| {
        // A finished upload has nothing to resume; that is a client error,
        // not a state conflict.
        match err {
            AppError::Conflict(msg) => AppError::InvalidInput(msg),
            other => other,
        }
    })?;

    Ok(Json(ResumeUploadResponse {
        missing_chunks: report.missing_chunks,
        status: report.state,
    }))
}

/// Cancel an upload and discard its chunks
#[utoipa::path(
    delete,
    path = "/upload/cancel/{session_id}",
    tag = "upload",
    params(("session_id" = Uuid, Path, description = "Upload session ID")),
    responses(
        (status = 200, description = "Session cancelled"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn cancel_upload(
    Caller(caller): Caller,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    owned_session(&state, caller, session_id).await?;
    state.manager.delete(session_id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub original_filename: String,
    pub file_size: u64,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub status: SessionState,
    pub progress: u8,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<UploadSession> for SessionSummary {
    fn from(session: UploadSession) -> Self {
        SessionSummary {
            session_id: session.id,
            uploaded_chunks: session.received.len() as u32,
            progress: session.progress_percent(),
            original_filename: session.original_filename,
            file_size: session.file_size,
            total_chunks: session.total_chunks,
            status: session.state,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub page: u32,
    pub limit: u32,
}

/// The caller's upload sessions, newest first
#[utoipa::path(
    get,
    path = "/upload/sessions",
    tag = "upload",
    responses(
        (status = 200, description = "Sessions owned by the caller", body = ListSessionsResponse),
        (status = 401, description = "Missing caller identity", body = ErrorResponse)
    )
)]
pub async fn list_sessions(
    Caller(caller): Caller,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);
    let sessions = state.manager.list_by_owner(caller, page, limit).await?;

    Ok(Json(ListSessionsResponse {
        sessions: sessions.into_iter().map(SessionSummary::from).collect(),
        page,
        limit,
    }))
}

/// Fetch the session and verify the caller owns it.
async fn owned_session(
    state: &AppState,
    caller: Uuid,
    session_id: Uuid,
) -> Result<UploadSession, AppError> {
    let session = state
        .manager
        .get(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;
    if session.owner != caller {
        return Err(AppError::Forbidden(format!(
            "session {} belongs to another owner",
            session_id
        )));
    }
    Ok(session)
}

// The 5 GiB ceiling in the validator annotation must match the shared constant.
const _: () = assert!(constants::MAX_FILE_SIZE_BYTES == 5_368_709_120);
