//! Clipflow Core Library
//!
//! This crate provides the domain models, error types, configuration, and
//! shared constants used by every Clipflow component: the upload session and
//! video records, the job envelopes that travel on the work bus, and the
//! error taxonomy that drives retry and HTTP mapping decisions.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, AppResult, ErrorKind};
pub use models::job::{queues, AssembleFile, CommitChunk, JobEnvelope, JobPayload, Priority, ProcessVideo};
pub use models::session::{SessionMetadata, SessionState, UploadSession};
pub use models::video::{deterministic_video_id, Video, VideoState, VideoUpdate};
