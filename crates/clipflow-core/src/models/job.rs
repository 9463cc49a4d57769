//! Job envelopes for the work bus
//!
//! Each pipeline is a `{main, retry, dlq}` queue triple; the envelope
//! carries the retry count so no state lives outside the message. Payload
//! types know their own queue and priority, mirroring how workers are
//! dispatched per queue.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable queue names. Retry and dead-letter queues are derived suffixes.
pub mod queues {
    pub const CHUNK: &str = "chunk_processing";
    pub const ASSEMBLY: &str = "file_assembly";
    pub const PROCESS: &str = "video_processing";

    pub fn retry(main: &str) -> String {
        format!("{}_retry", main)
    }

    pub fn dlq(main: &str) -> String {
        format!("{}_dlq", main)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 3,
    #[default]
    Normal = 5,
    High = 8,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Typed payload bound to a pipeline.
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync {
    fn queue() -> &'static str;

    fn priority() -> Priority {
        Priority::Normal
    }
}

/// Wire envelope: `{payload, retry_count}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope<P> {
    pub payload: P,
    #[serde(default)]
    pub retry_count: u32,
}

impl<P: JobPayload> JobEnvelope<P> {
    pub fn new(payload: P) -> Self {
        JobEnvelope {
            payload,
            retry_count: 0,
        }
    }

    /// Envelope for the next retry attempt.
    pub fn retried(self) -> Self {
        JobEnvelope {
            payload: self.payload,
            retry_count: self.retry_count + 1,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Move one committed temp blob to its canonical chunk key and record it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitChunk {
    pub session_id: Uuid,
    pub chunk_index: u32,
    pub temp_key: String,
    pub owner: Uuid,
}

impl JobPayload for CommitChunk {
    fn queue() -> &'static str {
        queues::CHUNK
    }

    fn priority() -> Priority {
        Priority::High
    }
}

/// Concatenate all chunks of a completed session into the final blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembleFile {
    pub session_id: Uuid,
    pub owner: Uuid,
}

impl JobPayload for AssembleFile {
    fn queue() -> &'static str {
        queues::ASSEMBLY
    }
}

/// Probe the assembled blob and generate its thumbnail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessVideo {
    pub video_id: Uuid,
    pub storage_key: String,
    pub owner: Uuid,
}

impl JobPayload for ProcessVideo {
    fn queue() -> &'static str {
        queues::PROCESS
    }
}
