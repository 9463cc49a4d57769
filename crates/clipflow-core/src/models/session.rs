//! Upload session model
//!
//! An [`UploadSession`] tracks one client's attempt to upload one file in
//! parts. The `received` set is the authoritative record of committed chunk
//! indices; the chunk index in Redis is only an accelerator over it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::constants;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl SessionState {
    /// Terminal states refuse further chunk commits.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Uploading => write!(f, "uploading"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SessionState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionState::Pending),
            "uploading" => Ok(SessionState::Uploading),
            "completed" => Ok(SessionState::Completed),
            "failed" => Ok(SessionState::Failed),
            _ => Err(anyhow::anyhow!("Invalid session state: {}", s)),
        }
    }
}

/// Client-supplied descriptive metadata carried by the session and copied
/// onto the video record at assembly time. Unknown keys are preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub owner: Uuid,
    /// Server-chosen storage name: a fresh uuid plus the client extension.
    pub target_filename: String,
    /// Client filename, preserved verbatim.
    pub original_filename: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Committed chunk indices, always a subset of `[0, total_chunks)`.
    pub received: BTreeSet<u32>,
    pub state: SessionState,
    pub metadata: SessionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    /// Build a fresh session in `pending`. Validates the declared sizes.
    pub fn new(
        owner: Uuid,
        original_filename: String,
        file_size: u64,
        chunk_size: u64,
        metadata: SessionMetadata,
        ttl_hours: i64,
    ) -> Result<Self, AppError> {
        if file_size == 0 {
            return Err(AppError::InvalidInput("fileSize must be at least 1".into()));
        }
        if file_size > constants::MAX_FILE_SIZE_BYTES {
            return Err(AppError::InvalidInput(format!(
                "fileSize {} exceeds the {} byte limit",
                file_size,
                constants::MAX_FILE_SIZE_BYTES
            )));
        }
        if chunk_size == 0 {
            return Err(AppError::InvalidInput("chunkSize must be at least 1".into()));
        }

        let id = Uuid::new_v4();
        let target_filename = format!("{}{}", id, file_extension(&original_filename));
        let now = Utc::now();

        Ok(UploadSession {
            id,
            owner,
            target_filename,
            original_filename,
            file_size,
            chunk_size,
            total_chunks: total_chunks_for(file_size, chunk_size),
            received: BTreeSet::new(),
            state: SessionState::Pending,
            metadata,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::hours(ttl_hours),
        })
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.total_chunks
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Indices not yet committed, ascending. Always disjoint from `received`.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    /// Upload progress in percent, rounded to the nearest integer.
    pub fn progress_percent(&self) -> u8 {
        if self.total_chunks == 0 {
            return 100;
        }
        let total = self.total_chunks as u64;
        ((self.received.len() as u64 * 100 + total / 2) / total) as u8
    }

    pub fn contains_chunk(&self, index: u32) -> bool {
        self.received.contains(&index)
    }
}

/// `⌈file_size / chunk_size⌉`, computed once at init.
pub fn total_chunks_for(file_size: u64, chunk_size: u64) -> u32 {
    file_size.div_ceil(chunk_size) as u32
}

/// Extension of the client filename including the dot, or empty when absent.
pub fn file_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!(".{}", ext),
        _ => String::new(),
    }
}
