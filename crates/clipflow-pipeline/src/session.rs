//! Upload session manager
//!
//! Owns the session state machine and is the only writer of chunk-received
//! facts. `record_chunk` is the hot path: the chunk index absorbs the
//! contention of parallel producers, and every index failure falls back to
//! a row-locked update in the session store, which is correct standalone.

use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use clipflow_core::{
    AppError, AppResult, SessionMetadata, SessionState, UploadSession,
};
use clipflow_db::SessionStore;
use clipflow_index::ChunkIndex;
use clipflow_storage::{keys, BlobStore};

pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    storage: Arc<dyn BlobStore>,
    /// Accelerator over `sessions.received`. `None` disables the fast path.
    index: Option<Arc<dyn ChunkIndex>>,
    ttl_hours: i64,
}

/// Outcome of a resume call: which chunks the client still has to send.
#[derive(Debug, Clone)]
pub struct ResumeReport {
    pub missing_chunks: Vec<u32>,
    pub state: SessionState,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        storage: Arc<dyn BlobStore>,
        index: Option<Arc<dyn ChunkIndex>>,
        ttl_hours: i64,
    ) -> Self {
        Self {
            sessions,
            storage,
            index,
            ttl_hours,
        }
    }

    fn index_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.ttl_hours.max(0) as u64 * 3600)
    }

    /// Create a session in `pending` with an empty received set.
    pub async fn init(
        &self,
        owner: Uuid,
        original_filename: String,
        file_size: u64,
        chunk_size: u64,
        metadata: SessionMetadata,
    ) -> AppResult<UploadSession> {
        let session = UploadSession::new(
            owner,
            original_filename,
            file_size,
            chunk_size,
            metadata,
            self.ttl_hours,
        )?;

        let session = self.sessions.create_session(session).await?;
        tracing::info!(
            session_id = %session.id,
            owner = %session.owner,
            total_chunks = session.total_chunks,
            file_size = session.file_size,
            "Upload session initialized"
        );
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Option<UploadSession>> {
        self.sessions.get_session(id).await
    }

    /// Record a committed chunk and return the post-image. Safe under
    /// parallel callers on the same session; re-delivery of the same index
    /// leaves the set and state unchanged.
    pub async fn record_chunk(&self, session_id: Uuid, chunk_index: u32) -> AppResult<UploadSession> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;

        // Terminal sessions take no further commits; return the current image.
        if session.is_terminal() {
            return Ok(session);
        }
        if chunk_index >= session.total_chunks {
            return Err(AppError::InvalidInput(format!(
                "chunk index {} out of range (0-{})",
                chunk_index,
                session.total_chunks - 1
            )));
        }

        if let Some(index) = &self.index {
            match self.record_via_index(index, &session, chunk_index).await {
                Ok(updated) => return Ok(updated),
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %err,
                        "Chunk index unavailable, falling back to serialized update"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        self.record_via_store(session_id, chunk_index).await
    }

    /// Fast path: the atomic `sadd` collapses duplicate deliveries, and the
    /// post-image set is derived from the index and persisted in one step.
    async fn record_via_index(
        &self,
        index: &Arc<dyn ChunkIndex>,
        session: &UploadSession,
        chunk_index: u32,
    ) -> AppResult<UploadSession> {
        let session_id = session.id;
        index.sadd(session_id, chunk_index).await?;
        index.expire(session_id, self.index_ttl()).await?;
        let members = index.smembers(session_id).await?;

        let total_chunks = session.total_chunks;
        let updated = self
            .sessions
            .update_session(
                session_id,
                Box::new(move |s| {
                    if s.state.is_terminal() {
                        return Ok(());
                    }
                    // Union with the persisted set: the index may have been
                    // rebuilt and lost entries the store already knows about.
                    s.received.extend(members.iter().copied());
                    s.state = if s.received.len() as u32 == total_chunks {
                        SessionState::Completed
                    } else {
                        SessionState::Uploading
                    };
                    Ok(())
                }),
            )
            .await?;

        if updated.state == SessionState::Completed {
            // Best effort; TTL reclaims the set if this fails.
            if let Err(err) = index.del(session_id).await {
                tracing::debug!(session_id = %session_id, error = %err, "Chunk index cleanup failed");
            }
        }
        Ok(updated)
    }

    /// Fallback: serialize on the session row and compute the new set
    /// in-memory. Correct standalone; the index is an accelerator only.
    async fn record_via_store(&self, session_id: Uuid, chunk_index: u32) -> AppResult<UploadSession> {
        self.sessions
            .update_session(
                session_id,
                Box::new(move |s| {
                    if s.state.is_terminal() {
                        return Ok(());
                    }
                    s.received.insert(chunk_index);
                    s.state = if s.is_complete() {
                        SessionState::Completed
                    } else {
                        SessionState::Uploading
                    };
                    Ok(())
                }),
            )
            .await
    }

    pub async fn mark_failed(&self, session_id: Uuid) -> AppResult<UploadSession> {
        self.sessions
            .update_session(
                session_id,
                Box::new(|s| {
                    s.state = SessionState::Failed;
                    Ok(())
                }),
            )
            .await
    }

    /// Return a session to `pending` so the client can continue uploading.
    pub async fn mark_pending(&self, session_id: Uuid) -> AppResult<UploadSession> {
        self.sessions
            .update_session(
                session_id,
                Box::new(|s| {
                    s.state = SessionState::Pending;
                    Ok(())
                }),
            )
            .await
    }

    /// Report the chunks still missing. A `failed` session is returned to
    /// `pending` so the client can continue; a `completed` session cannot
    /// be resumed.
    pub async fn resume(&self, session_id: Uuid) -> AppResult<ResumeReport> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;

        if session.state == SessionState::Completed {
            return Err(AppError::Conflict(format!(
                "session {} is already complete",
                session_id
            )));
        }

        let session = if session.state == SessionState::Failed {
            self.mark_pending(session_id).await?
        } else {
            session
        };

        Ok(ResumeReport {
            missing_chunks: session.missing_chunks(),
            state: session.state,
        })
    }

    /// Delete a session together with every chunk blob it owns.
    pub async fn delete(&self, session_id: Uuid) -> AppResult<()> {
        let prefix = keys::session_chunk_prefix(session_id);
        for key in self.storage.list_prefix(&prefix).await.map_err(AppError::from)? {
            self.storage.delete(&key).await.map_err(AppError::from)?;
        }
        self.sessions.delete_session(session_id).await?;
        tracing::info!(session_id = %session_id, "Upload session deleted");
        Ok(())
    }

    pub async fn list_by_owner(
        &self,
        owner: Uuid,
        page: u32,
        limit: u32,
    ) -> AppResult<Vec<UploadSession>> {
        self.sessions.list_by_owner(owner, page, limit).await
    }

    pub async fn find_expired(&self) -> AppResult<Vec<UploadSession>> {
        self.sessions.find_expired_sessions(Utc::now()).await
    }

    /// Lifetime left before a fresh session would expire; used by GC to
    /// judge stale temp blobs.
    pub fn ttl(&self) -> Duration {
        Duration::hours(self.ttl_hours)
    }
}
