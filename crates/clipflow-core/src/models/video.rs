//! Video model
//!
//! A [`Video`] is the product of a completed upload session: the assembled
//! original plus the metadata the post-processing worker derives from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::constants;
use crate::models::session::UploadSession;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VideoState {
    Processing,
    Ready,
    Failed,
}

impl Display for VideoState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VideoState::Processing => write!(f, "processing"),
            VideoState::Ready => write!(f, "ready"),
            VideoState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for VideoState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(VideoState::Processing),
            "ready" => Ok(VideoState::Ready),
            "failed" => Ok(VideoState::Failed),
            _ => Err(anyhow::anyhow!("Invalid video state: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub owner: Uuid,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: String,
    pub mime_type: String,
    /// Blob-store key of the assembled original (`uploads/...`).
    pub storage_key: String,
    /// Blob-store key of the JPEG; set once post-processing succeeds.
    pub thumbnail_key: Option<String>,
    pub duration_s: Option<f64>,
    pub resolution: Option<String>,
    pub codec: Option<String>,
    pub file_size: u64,
    pub bitrate: Option<u64>,
    pub state: VideoState,
    pub views: u64,
    pub likes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// Build the `processing` row for a just-assembled session, applying the
    /// metadata defaults: title falls back to the original filename, category
    /// to "general", mime type to "video/mp4".
    pub fn from_session(session: &UploadSession, storage_key: String) -> Self {
        let meta = &session.metadata;
        let now = Utc::now();
        Video {
            id: deterministic_video_id(session.id),
            owner: session.owner,
            title: meta
                .title
                .clone()
                .unwrap_or_else(|| session.original_filename.clone()),
            description: meta.description.clone().unwrap_or_default(),
            tags: meta.tags.clone(),
            category: meta
                .category
                .clone()
                .unwrap_or_else(|| constants::DEFAULT_CATEGORY.to_string()),
            mime_type: meta
                .mime_type
                .clone()
                .unwrap_or_else(|| constants::DEFAULT_MIME_TYPE.to_string()),
            storage_key,
            thumbnail_key: None,
            duration_s: None,
            resolution: None,
            codec: None,
            file_size: session.file_size,
            bitrate: None,
            state: VideoState::Processing,
            views: 0,
            likes: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by the post-processing worker (and failure paths).
#[derive(Debug, Clone, Default)]
pub struct VideoUpdate {
    pub state: Option<VideoState>,
    pub thumbnail_key: Option<String>,
    pub duration_s: Option<f64>,
    pub resolution: Option<String>,
    pub codec: Option<String>,
    pub bitrate: Option<u64>,
    pub file_size: Option<u64>,
}

impl VideoUpdate {
    pub fn failed() -> Self {
        VideoUpdate {
            state: Some(VideoState::Failed),
            ..Default::default()
        }
    }

    pub fn apply(&self, video: &mut Video) {
        if let Some(state) = self.state {
            video.state = state;
        }
        if let Some(ref key) = self.thumbnail_key {
            video.thumbnail_key = Some(key.clone());
        }
        if let Some(duration) = self.duration_s {
            video.duration_s = Some(duration);
        }
        if let Some(ref resolution) = self.resolution {
            video.resolution = Some(resolution.clone());
        }
        if let Some(ref codec) = self.codec {
            video.codec = Some(codec.clone());
        }
        if let Some(bitrate) = self.bitrate {
            video.bitrate = Some(bitrate);
        }
        if let Some(file_size) = self.file_size {
            video.file_size = file_size;
        }
        video.updated_at = Utc::now();
    }
}

/// Video id derived from the session id, so that assembly redelivery cannot
/// create a second video row for the same session.
pub fn deterministic_video_id(session_id: Uuid) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, session_id.as_bytes())
}
