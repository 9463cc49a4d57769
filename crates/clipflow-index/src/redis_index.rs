//! Redis-backed chunk index.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use clipflow_core::{AppError, AppResult};

use crate::traits::{chunk_set_key, ChunkIndex};

#[derive(Clone)]
pub struct RedisChunkIndex {
    redis: ConnectionManager,
}

impl RedisChunkIndex {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::transient("failed to construct Redis client", e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::transient("failed to connect to Redis", e))?;
        Ok(Self::new(manager))
    }
}

fn index_err(err: redis::RedisError) -> AppError {
    AppError::transient("chunk index unavailable", err)
}

#[async_trait]
impl ChunkIndex for RedisChunkIndex {
    async fn sadd(&self, session_id: Uuid, value: u32) -> AppResult<bool> {
        let mut conn = self.redis.clone();
        let added: i64 = conn
            .sadd(chunk_set_key(session_id), value)
            .await
            .map_err(index_err)?;
        Ok(added == 1)
    }

    async fn scard(&self, session_id: Uuid) -> AppResult<u64> {
        let mut conn = self.redis.clone();
        let count: u64 = conn
            .scard(chunk_set_key(session_id))
            .await
            .map_err(index_err)?;
        Ok(count)
    }

    async fn smembers(&self, session_id: Uuid) -> AppResult<Vec<u32>> {
        let mut conn = self.redis.clone();
        let mut members: Vec<u32> = conn
            .smembers(chunk_set_key(session_id))
            .await
            .map_err(index_err)?;
        members.sort_unstable();
        Ok(members)
    }

    async fn del(&self, session_id: Uuid) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .del(chunk_set_key(session_id))
            .await
            .map_err(index_err)?;
        Ok(())
    }

    async fn expire(&self, session_id: Uuid, ttl: Duration) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .expire(chunk_set_key(session_id), ttl.as_secs() as i64)
            .await
            .map_err(index_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Uses REDIS_TEST_URL or defaults to localhost. Tests skip gracefully
    /// when no Redis is reachable.
    async fn setup_test_index() -> Option<RedisChunkIndex> {
        let redis_url = std::env::var("REDIS_TEST_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        match RedisChunkIndex::connect(&redis_url).await {
            Ok(index) => Some(index),
            Err(e) => {
                eprintln!("Skipping test - Redis not available: {}", e);
                None
            }
        }
    }

    #[tokio::test]
    async fn set_operations_round_trip() {
        let Some(index) = setup_test_index().await else {
            eprintln!("Test skipped: Redis not available");
            return;
        };

        let sid = Uuid::new_v4();
        assert!(index.sadd(sid, 2).await.unwrap());
        assert!(!index.sadd(sid, 2).await.unwrap());
        assert!(index.sadd(sid, 0).await.unwrap());
        assert!(index.sadd(sid, 7).await.unwrap());

        assert_eq!(index.scard(sid).await.unwrap(), 3);
        assert_eq!(index.smembers(sid).await.unwrap(), vec![0, 2, 7]);

        // Another session's set is untouched.
        assert_eq!(index.scard(Uuid::new_v4()).await.unwrap(), 0);

        index.del(sid).await.unwrap();
        assert_eq!(index.scard(sid).await.unwrap(), 0);
        assert!(index.smembers(sid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expire_sets_a_ttl_on_the_set() {
        let Some(index) = setup_test_index().await else {
            eprintln!("Test skipped: Redis not available");
            return;
        };

        let sid = Uuid::new_v4();
        index.sadd(sid, 1).await.unwrap();
        index.expire(sid, Duration::from_secs(60)).await.unwrap();

        // Check the TTL on the key directly.
        let mut conn = index.redis.clone();
        let ttl: i64 = conn.ttl(chunk_set_key(sid)).await.unwrap();
        assert!(ttl > 0 && ttl <= 60, "unexpected ttl {}", ttl);

        index.del(sid).await.unwrap();
    }
}
