//! Chunk commit worker
//!
//! Renames the temp blob to its canonical chunk key, records the receipt,
//! and fans out to assembly when the session completes. Every step is
//! idempotent so redelivery after a crash at any point converges: an
//! existing canonical blob means a retry, a missing session means the
//! upload was cancelled and the message is dropped.

use async_trait::async_trait;
use std::sync::Arc;

use clipflow_bus::WorkBus;
use clipflow_core::{
    queues, AppError, AssembleFile, CommitChunk, JobEnvelope, JobPayload, SessionState,
};
use clipflow_storage::{keys, BlobStore, StorageError};

use crate::runner::JobHandler;
use crate::session::SessionManager;

pub struct CommitChunkWorker {
    manager: Arc<SessionManager>,
    storage: Arc<dyn BlobStore>,
    bus: Arc<dyn WorkBus>,
}

impl CommitChunkWorker {
    pub fn new(
        manager: Arc<SessionManager>,
        storage: Arc<dyn BlobStore>,
        bus: Arc<dyn WorkBus>,
    ) -> Self {
        Self {
            manager,
            storage,
            bus,
        }
    }
}

#[async_trait]
impl JobHandler<CommitChunk> for CommitChunkWorker {
    async fn handle(&self, payload: CommitChunk) -> Result<(), AppError> {
        let CommitChunk {
            session_id,
            chunk_index,
            temp_key,
            owner,
        } = payload;
        let canonical = keys::chunk(session_id, chunk_index);

        match self.storage.rename(&temp_key, &canonical).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists(_)) => {
                // Redelivery: an earlier attempt already moved a blob here.
                let _ = self.storage.delete(&temp_key).await;
            }
            Err(StorageError::NotFound(_)) => {
                // Temp blob gone. If the canonical key exists the previous
                // attempt crashed between rename and record; otherwise the
                // chunk bytes are unrecoverable.
                if !self.storage.exists(&canonical).await.map_err(AppError::from)? {
                    return Err(AppError::Fatal(format!(
                        "chunk blob for session {} index {} is missing",
                        session_id, chunk_index
                    )));
                }
            }
            Err(err) => return Err(err.into()),
        }

        let session = match self.manager.record_chunk(session_id, chunk_index).await {
            Ok(session) => session,
            Err(AppError::NotFound(_)) => {
                // Upload cancelled while this message was in flight; drop it
                // and clean up the stray blob.
                tracing::info!(
                    session_id = %session_id,
                    chunk_index = chunk_index,
                    "Session gone, dropping chunk commit"
                );
                let _ = self.storage.delete(&canonical).await;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if session.state == SessionState::Completed {
            // More than one completion observer is fine; assembly is
            // idempotent per session.
            let envelope = JobEnvelope::new(AssembleFile { session_id, owner }).to_value()?;
            self.bus
                .publish(queues::ASSEMBLY, envelope, AssembleFile::priority())
                .await?;
            tracing::info!(session_id = %session_id, "Session complete, assembly enqueued");
        }
        Ok(())
    }
}
