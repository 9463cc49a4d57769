//! In-memory work bus.
//!
//! Priority-then-FIFO per queue, with an in-flight table so ack/nack behave
//! like the durable backend. Backs tests and single-process development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use clipflow_core::models::job::Priority;
use clipflow_core::{AppError, AppResult};

use crate::traits::{Delivery, WorkBus};

struct Message {
    id: Uuid,
    envelope: serde_json::Value,
    priority: i32,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, Vec<Message>>,
    inflight: HashMap<Uuid, (String, serde_json::Value, i32, u64)>,
    next_seq: u64,
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently claimed but not yet acked or nacked.
    pub fn inflight_count(&self) -> usize {
        self.inner.lock().unwrap().inflight.len()
    }
}

#[async_trait]
impl WorkBus for MemoryBus {
    async fn publish(
        &self,
        queue: &str,
        envelope: serde_json::Value,
        priority: Priority,
    ) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queues.entry(queue.to_string()).or_default().push(Message {
            id: Uuid::new_v4(),
            envelope,
            priority: priority.as_i32(),
            seq,
        });
        Ok(())
    }

    async fn claim(&self, queues: &[&str]) -> AppResult<Option<Delivery>> {
        let mut inner = self.inner.lock().unwrap();

        // Best (priority DESC, seq ASC) across the requested queues.
        let mut best: Option<(String, usize, i32, u64)> = None;
        for queue in queues {
            if let Some(messages) = inner.queues.get(*queue) {
                for (idx, msg) in messages.iter().enumerate() {
                    let better = match &best {
                        None => true,
                        Some((_, _, p, s)) => {
                            msg.priority > *p || (msg.priority == *p && msg.seq < *s)
                        }
                    };
                    if better {
                        best = Some((queue.to_string(), idx, msg.priority, msg.seq));
                    }
                }
            }
        }

        let Some((queue, idx, _, _)) = best else {
            return Ok(None);
        };
        let msg = inner.queues.get_mut(&queue).unwrap().remove(idx);
        inner.inflight.insert(
            msg.id,
            (queue.clone(), msg.envelope.clone(), msg.priority, msg.seq),
        );
        Ok(Some(Delivery {
            id: msg.id,
            queue,
            envelope: msg.envelope,
        }))
    }

    async fn ack(&self, delivery_id: Uuid) -> AppResult<()> {
        self.inner.lock().unwrap().inflight.remove(&delivery_id);
        Ok(())
    }

    async fn nack(&self, delivery_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let (queue, envelope, priority, seq) = inner
            .inflight
            .remove(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {}", delivery_id)))?;
        inner.queues.entry(queue).or_default().push(Message {
            id: delivery_id,
            envelope,
            priority,
            seq,
        });
        Ok(())
    }

    async fn depth(&self, queue: &str) -> AppResult<u64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.len() as u64)
            .unwrap_or(0))
    }
}
