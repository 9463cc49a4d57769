//! Post-processing worker
//!
//! Probes the assembled blob, generates the thumbnail, and flips the video
//! to `ready`. Probe failures mark the video `failed` and ack, since a
//! broken file does not get better on retry. Large blobs take the fixed-offset
//! thumbnail path first and fall back to the midpoint strategy when the
//! optimised path times out.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use clipflow_core::constants::{
    THUMBNAIL_HEIGHT, THUMBNAIL_LARGE_BLOB_BYTES, THUMBNAIL_LARGE_BLOB_SEEK_SECS, THUMBNAIL_WIDTH,
};
use clipflow_core::{AppError, ProcessVideo, VideoState, VideoUpdate};
use clipflow_db::VideoStore;
use clipflow_processing::{MediaInfo, MediaProbe};
use clipflow_storage::{keys, BlobStore};

use crate::runner::JobHandler;

pub struct PostProcessWorker {
    videos: Arc<dyn VideoStore>,
    storage: Arc<dyn BlobStore>,
    probe: Arc<dyn MediaProbe>,
    probe_timeout: Duration,
}

impl PostProcessWorker {
    pub fn new(
        videos: Arc<dyn VideoStore>,
        storage: Arc<dyn BlobStore>,
        probe: Arc<dyn MediaProbe>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            videos,
            storage,
            probe,
            probe_timeout,
        }
    }

    /// Spool the blob into a scratch file so the decoding tool can seek it.
    async fn download_to(&self, key: &str, path: &Path) -> Result<u64, AppError> {
        let len = self.storage.content_length(key).await.map_err(AppError::from)?;
        let mut file = tokio::fs::File::create(path).await?;
        if len > 0 {
            let mut stream = self
                .storage
                .read_range(key, 0, len - 1)
                .await
                .map_err(AppError::from)?;
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk.map_err(AppError::from)?).await?;
            }
        }
        file.flush().await?;
        Ok(len)
    }

    /// Thumbnail with the blob-size strategy: large blobs seek to a fixed
    /// offset, everything else samples the midpoint. A timed-out or failed
    /// optimised attempt falls back to the midpoint once.
    async fn generate_thumbnail(
        &self,
        input: &Path,
        out: &Path,
        blob_len: u64,
        info: &MediaInfo,
    ) -> Result<(), AppError> {
        let midpoint = info.duration_s / 2.0;
        let optimised = blob_len > THUMBNAIL_LARGE_BLOB_BYTES;
        let first_seek = if optimised {
            THUMBNAIL_LARGE_BLOB_SEEK_SECS.min(info.duration_s)
        } else {
            midpoint
        };

        let first = tokio::time::timeout(
            self.probe_timeout,
            self.probe
                .thumbnail(input, first_seek, out, THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT),
        )
        .await;

        match first {
            Ok(Ok(())) => return Ok(()),
            outcome if optimised => {
                tracing::warn!(
                    seek_secs = first_seek,
                    timed_out = outcome.is_err(),
                    "Optimised thumbnail path failed, falling back to midpoint"
                );
            }
            Ok(Err(err)) => {
                return Err(AppError::Transient(format!("thumbnail failed: {}", err)))
            }
            Err(_) => {
                return Err(AppError::Transient("thumbnail generation timed out".into()))
            }
        }

        match tokio::time::timeout(
            self.probe_timeout,
            self.probe
                .thumbnail(input, midpoint, out, THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AppError::Transient(format!("thumbnail failed: {}", err))),
            Err(_) => Err(AppError::Transient("thumbnail generation timed out".into())),
        }
    }
}

#[async_trait]
impl JobHandler<ProcessVideo> for PostProcessWorker {
    async fn handle(&self, payload: ProcessVideo) -> Result<(), AppError> {
        let ProcessVideo {
            video_id,
            storage_key,
            ..
        } = payload;

        let Some(video) = self.videos.get_video(video_id).await? else {
            tracing::info!(video_id = %video_id, "Video gone, dropping processing message");
            return Ok(());
        };
        if video.state == VideoState::Ready {
            // Redelivery after full success.
            return Ok(());
        }

        let temp_dir = tempfile::tempdir()
            .map_err(|e| AppError::transient("failed to create temp directory", e))?;
        let input = temp_dir.path().join("input.bin");
        let blob_len = self.download_to(&storage_key, &input).await?;

        let probe_result =
            tokio::time::timeout(self.probe_timeout, self.probe.probe(&input)).await;
        let info = match probe_result {
            Ok(Ok(info)) => info,
            Ok(Err(err)) => {
                tracing::error!(video_id = %video_id, error = %err, "Probe failed, marking video failed");
                self.videos
                    .update_video(video_id, VideoUpdate::failed())
                    .await?;
                return Ok(());
            }
            Err(_) => {
                tracing::error!(video_id = %video_id, "Probe timed out, marking video failed");
                self.videos
                    .update_video(video_id, VideoUpdate::failed())
                    .await?;
                return Ok(());
            }
        };

        let thumb_path = temp_dir.path().join("thumbnail.jpg");
        self.generate_thumbnail(&input, &thumb_path, blob_len, &info)
            .await?;

        let thumbnail_key = keys::thumbnail(video_id);
        let thumb_bytes = tokio::fs::read(&thumb_path).await?;
        self.storage
            .put(&thumbnail_key, thumb_bytes)
            .await
            .map_err(AppError::from)?;

        self.videos
            .update_video(
                video_id,
                VideoUpdate {
                    state: Some(VideoState::Ready),
                    thumbnail_key: Some(thumbnail_key),
                    duration_s: Some(info.duration_s),
                    resolution: Some(info.resolution()),
                    codec: Some(info.codec.clone()),
                    bitrate: info.bitrate,
                    file_size: Some(blob_len),
                },
            )
            .await?;

        tracing::info!(
            video_id = %video_id,
            duration_s = info.duration_s,
            resolution = %info.resolution(),
            "Video ready"
        );
        Ok(())
    }
}
