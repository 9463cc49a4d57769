//! Assembly worker
//!
//! Concatenates a completed session's chunks, in strict ascending index
//! order, into the final blob; creates the video row; fans out to
//! post-processing; deletes the session. Idempotent per session: the video
//! id is derived from the session id and the output key is checked before
//! any rework, so redeliveries converge without duplicating anything.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use clipflow_bus::WorkBus;
use clipflow_core::{
    queues, AppError, AssembleFile, JobEnvelope, JobPayload, ProcessVideo, SessionState,
    UploadSession, Video,
};
use clipflow_db::VideoStore;
use clipflow_storage::{keys, BlobStore};

use crate::runner::JobHandler;
use crate::session::SessionManager;

pub struct AssemblyWorker {
    manager: Arc<SessionManager>,
    storage: Arc<dyn BlobStore>,
    videos: Arc<dyn VideoStore>,
    bus: Arc<dyn WorkBus>,
}

impl AssemblyWorker {
    pub fn new(
        manager: Arc<SessionManager>,
        storage: Arc<dyn BlobStore>,
        videos: Arc<dyn VideoStore>,
        bus: Arc<dyn WorkBus>,
    ) -> Self {
        Self {
            manager,
            storage,
            videos,
            bus,
        }
    }

    /// Stream chunks 0..total_chunks into the output key. The feeder task
    /// reads each chunk in full and pushes it through a duplex pipe so the
    /// store writes one continuous stream without buffering the file.
    async fn concatenate(&self, session: &UploadSession, upload_key: &str) -> Result<(), AppError> {
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let storage = self.storage.clone();
        let session_id = session.id;
        let total_chunks = session.total_chunks;

        let feeder = tokio::spawn(async move {
            let mut fed = 0u64;
            for index in 0..total_chunks {
                let data = storage
                    .read(&keys::chunk(session_id, index))
                    .await
                    .map_err(AppError::from)?;
                fed += data.len() as u64;
                writer.write_all(&data).await.map_err(AppError::from)?;
            }
            writer.shutdown().await.ok();
            Ok::<u64, AppError>(fed)
        });

        let put_result = self.storage.put_stream(upload_key, Box::pin(reader)).await;
        let feed_result = feeder
            .await
            .map_err(|e| AppError::transient("assembly feeder task failed", e))?;

        match (put_result, feed_result) {
            (Ok(written), Ok(fed)) if written == fed => {
                if written != session.file_size {
                    tracing::warn!(
                        session_id = %session_id,
                        declared = session.file_size,
                        assembled = written,
                        "Assembled size differs from the declared file size"
                    );
                }
                Ok(())
            }
            (put_result, feed_result) => {
                // A short or failed stream must not leave a partial output.
                let _ = self.storage.delete(upload_key).await;
                feed_result?;
                put_result.map_err(AppError::from)?;
                Err(AppError::Transient(format!(
                    "assembly stream for session {} was truncated",
                    session_id
                )))
            }
        }
    }
}

#[async_trait]
impl JobHandler<AssembleFile> for AssemblyWorker {
    async fn handle(&self, payload: AssembleFile) -> Result<(), AppError> {
        let session_id = payload.session_id;
        let Some(session) = self.manager.get(session_id).await? else {
            // Redelivery after the session row was already deleted (or the
            // upload was cancelled). Nothing left to do.
            tracing::info!(session_id = %session_id, "Session gone, dropping assembly message");
            return Ok(());
        };

        // Assembly on a non-completed session is an invariant violation.
        if session.state != SessionState::Completed || !session.is_complete() {
            return Err(AppError::Fatal(format!(
                "assembly requested for session {} in state {} with {}/{} chunks",
                session_id,
                session.state,
                session.received.len(),
                session.total_chunks
            )));
        }

        let upload_key = keys::upload(&session.target_filename);
        if !self.storage.exists(&upload_key).await.map_err(AppError::from)? {
            self.concatenate(&session, &upload_key).await?;
            tracing::info!(
                session_id = %session_id,
                upload_key = %upload_key,
                total_chunks = session.total_chunks,
                "File assembled"
            );
        } else {
            // The output already exists but the session row survived: a
            // previous attempt died after assembly. Resume from the video
            // record onward.
            tracing::info!(
                session_id = %session_id,
                upload_key = %upload_key,
                "Assembled file already present, resuming publication"
            );
        }

        let video = self
            .videos
            .create_video(Video::from_session(&session, upload_key.clone()))
            .await?;

        let envelope = JobEnvelope::new(ProcessVideo {
            video_id: video.id,
            storage_key: upload_key,
            owner: session.owner,
        })
        .to_value()?;
        self.bus
            .publish(queues::PROCESS, envelope, ProcessVideo::priority())
            .await?;

        // Removes the session row together with any remaining chunk blobs.
        self.manager.delete(session_id).await?;

        tracing::info!(session_id = %session_id, video_id = %video.id, "Video published for processing");
        Ok(())
    }
}
