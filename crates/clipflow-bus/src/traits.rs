//! Work bus trait.

use async_trait::async_trait;
use clipflow_core::models::job::Priority;
use clipflow_core::AppResult;
use uuid::Uuid;

/// One claimed message. Stays invisible to other consumers until acked
/// (dropped) or nacked (returned to its queue).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub queue: String,
    pub envelope: serde_json::Value,
}

#[async_trait]
pub trait WorkBus: Send + Sync {
    /// Durably enqueue a message on the named queue.
    async fn publish(
        &self,
        queue: &str,
        envelope: serde_json::Value,
        priority: Priority,
    ) -> AppResult<()>;

    /// Claim the next message from any of `queues`, highest priority first,
    /// oldest first within a priority. Returns `None` when all are empty.
    async fn claim(&self, queues: &[&str]) -> AppResult<Option<Delivery>>;

    /// Acknowledge a delivery: the message is done and removed.
    async fn ack(&self, delivery_id: Uuid) -> AppResult<()>;

    /// Return an unacked delivery to its queue for redelivery.
    async fn nack(&self, delivery_id: Uuid) -> AppResult<()>;

    /// Number of messages waiting on the named queue (excludes in-flight).
    async fn depth(&self, queue: &str) -> AppResult<u64>;
}
