//! Application state shared by all handlers.

use std::sync::Arc;

use clipflow_core::Config;
use clipflow_db::VideoStore;
use clipflow_pipeline::{ChunkIntake, SessionManager};
use clipflow_storage::BlobStore;

use crate::middleware::ChunkRateLimiter;

pub struct AppState {
    pub config: Config,
    pub manager: Arc<SessionManager>,
    pub intake: Arc<ChunkIntake>,
    pub storage: Arc<dyn BlobStore>,
    pub videos: Arc<dyn VideoStore>,
    pub rate_limiter: Arc<ChunkRateLimiter>,
}
