//! Chunk intake
//!
//! Accepts one chunk body per call: authorize against the session, spool
//! the bytes to a scratch blob, and enqueue the commit. The 200 the caller
//! gets back means "queued", never "committed"; clients poll status.

use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use clipflow_core::{queues, AppError, AppResult, CommitChunk, JobEnvelope, JobPayload};
use clipflow_bus::WorkBus;
use clipflow_storage::{keys, BlobStore};

use crate::session::SessionManager;

pub struct ChunkIntake {
    manager: Arc<SessionManager>,
    storage: Arc<dyn BlobStore>,
    bus: Arc<dyn WorkBus>,
    max_part_bytes: u64,
}

impl ChunkIntake {
    pub fn new(
        manager: Arc<SessionManager>,
        storage: Arc<dyn BlobStore>,
        bus: Arc<dyn WorkBus>,
        max_part_bytes: u64,
    ) -> Self {
        Self {
            manager,
            storage,
            bus,
            max_part_bytes,
        }
    }

    /// Accept one chunk body. The reader is streamed to a temp blob; any
    /// failure after the spool deletes it again so nothing leaks.
    pub async fn accept_chunk(
        &self,
        caller: Uuid,
        session_id: Uuid,
        chunk_index: u32,
        body: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> AppResult<()> {
        let session = self
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
        if session.is_terminal() {
            return Err(AppError::Conflict(format!(
                "session {} is {}",
                session_id, session.state
            )));
        }
        if chunk_index >= session.total_chunks {
            return Err(AppError::InvalidInput(format!(
                "chunk index {} out of range (0-{})",
                chunk_index,
                session.total_chunks - 1
            )));
        }

        // Spool with a one-byte overshoot so a too-large body is detected
        // without ever writing more than the cap.
        let temp_key = keys::temp_chunk();
        let limited: Pin<Box<dyn AsyncRead + Send + Unpin>> =
            Box::pin(body.take(self.max_part_bytes + 1));
        let written = self
            .storage
            .put_stream(&temp_key, limited)
            .await
            .map_err(AppError::from)?;

        if written > self.max_part_bytes {
            let _ = self.storage.delete(&temp_key).await;
            return Err(AppError::InvalidInput(format!(
                "chunk body exceeds the {} byte limit",
                self.max_part_bytes
            )));
        }

        let envelope = JobEnvelope::new(CommitChunk {
            session_id,
            chunk_index,
            temp_key: temp_key.clone(),
            owner: caller,
        })
        .to_value()?;

        if let Err(err) = self
            .bus
            .publish(queues::CHUNK, envelope, CommitChunk::priority())
            .await
        {
            let _ = self.storage.delete(&temp_key).await;
            return Err(err);
        }

        tracing::debug!(
            session_id = %session_id,
            chunk_index = chunk_index,
            bytes = written,
            "Chunk accepted and queued for commit"
        );
        Ok(())
    }
}
