//! In-memory chunk index with lazy TTL expiry.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use clipflow_core::AppResult;

use crate::traits::ChunkIndex;

struct Entry {
    members: BTreeSet<u32>,
    deadline: Option<Instant>,
}

#[derive(Clone, Default)]
pub struct MemoryChunkIndex {
    sets: Arc<Mutex<HashMap<Uuid, Entry>>>,
}

impl MemoryChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live_entry<T>(&self, session_id: Uuid, f: impl FnOnce(Option<&Entry>) -> T) -> T {
        let mut sets = self.sets.lock().unwrap();
        let expired = sets
            .get(&session_id)
            .and_then(|e| e.deadline)
            .is_some_and(|d| d <= Instant::now());
        if expired {
            sets.remove(&session_id);
        }
        f(sets.get(&session_id))
    }
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            members: BTreeSet::new(),
            deadline: None,
        }
    }
}

#[async_trait]
impl ChunkIndex for MemoryChunkIndex {
    async fn sadd(&self, session_id: Uuid, value: u32) -> AppResult<bool> {
        let mut sets = self.sets.lock().unwrap();
        let expired = sets
            .get(&session_id)
            .and_then(|e| e.deadline)
            .is_some_and(|d| d <= Instant::now());
        if expired {
            sets.remove(&session_id);
        }
        let entry = sets.entry(session_id).or_default();
        Ok(entry.members.insert(value))
    }

    async fn scard(&self, session_id: Uuid) -> AppResult<u64> {
        Ok(self.with_live_entry(session_id, |e| {
            e.map(|e| e.members.len() as u64).unwrap_or(0)
        }))
    }

    async fn smembers(&self, session_id: Uuid) -> AppResult<Vec<u32>> {
        Ok(self.with_live_entry(session_id, |e| {
            e.map(|e| e.members.iter().copied().collect())
                .unwrap_or_default()
        }))
    }

    async fn del(&self, session_id: Uuid) -> AppResult<()> {
        self.sets.lock().unwrap().remove(&session_id);
        Ok(())
    }

    async fn expire(&self, session_id: Uuid, ttl: Duration) -> AppResult<()> {
        let mut sets = self.sets.lock().unwrap();
        if let Some(entry) = sets.get_mut(&session_id) {
            entry.deadline = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
