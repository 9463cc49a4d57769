//! Chunk index trait.

use async_trait::async_trait;
use clipflow_core::AppResult;
use std::time::Duration;
use uuid::Uuid;

/// Atomic set operations over one session's received-chunk indices.
///
/// All operations are atomic with respect to other index operations on the
/// same session. Every error a backend surfaces is `Transient`: callers
/// treat the index as unavailable and fall back, never fail the primary path.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Add `value` to the session's set. Returns whether it was newly added.
    async fn sadd(&self, session_id: Uuid, value: u32) -> AppResult<bool>;

    /// Cardinality of the session's set.
    async fn scard(&self, session_id: Uuid) -> AppResult<u64>;

    /// Members of the session's set, sorted numerically.
    async fn smembers(&self, session_id: Uuid) -> AppResult<Vec<u32>>;

    /// Drop the session's set entirely.
    async fn del(&self, session_id: Uuid) -> AppResult<()>;

    /// Refresh the set's time-to-live.
    async fn expire(&self, session_id: Uuid, ttl: Duration) -> AppResult<()>;
}

/// Redis key for a session's chunk set.
pub fn chunk_set_key(session_id: Uuid) -> String {
    format!("upload:chunks:{}", session_id)
}
