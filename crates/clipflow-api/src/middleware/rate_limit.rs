//! Chunk-intake rate limiting
//!
//! Sharded in-memory limiter applied to the chunk endpoint only. Keys are
//! client IPs; the cap and window come from configuration. A tripped limit
//! answers 429 with `Retry-After` so clients back off exponentially.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct RateLimitBucket {
    count: u32,
    reset_at: Instant,
}

impl RateLimitBucket {
    fn new(window: Duration) -> Self {
        Self {
            count: 0,
            reset_at: Instant::now() + window,
        }
    }

    fn check_and_increment(&mut self, limit: u32, window: Duration) -> (bool, u32) {
        let now = Instant::now();
        if now >= self.reset_at {
            self.count = 0;
            self.reset_at = now + window;
        }
        if self.count < limit {
            self.count += 1;
            (true, limit.saturating_sub(self.count))
        } else {
            (false, 0)
        }
    }

    fn reset_in(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }
}

/// Sharded limiter to keep lock contention off the hot path.
pub struct ChunkRateLimiter {
    shards: Vec<Mutex<HashMap<String, RateLimitBucket>>>,
    limit: u32,
    window: Duration,
    /// Maximum number of buckets per shard before cleanup
    max_buckets: usize,
}

impl ChunkRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_shards(limit, window, 16)
    }

    pub fn with_shards(limit: u32, window: Duration, shard_count: usize) -> Self {
        Self {
            shards: (0..shard_count.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            limit,
            window,
            max_buckets: 10_000,
        }
    }

    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Ok(remaining) when the request is admitted, Err(reset_in) when the
    /// window is exhausted.
    pub async fn check(&self, key: &str) -> Result<u32, Duration> {
        let shard_index = self.shard_index(key);
        let mut buckets = self.shards[shard_index].lock().await;
        let window = self.window;

        // Shard at capacity: drop expired buckets first, then the oldest.
        if buckets.len() >= self.max_buckets {
            let now = Instant::now();
            let grace_period = window;
            buckets.retain(|_key, bucket| {
                bucket.reset_at > now || (now - bucket.reset_at) < grace_period
            });

            if buckets.len() >= self.max_buckets {
                let oldest_key = buckets
                    .iter()
                    .min_by_key(|(_, bucket)| bucket.reset_at)
                    .map(|(k, _)| k.clone());
                if let Some(key_to_remove) = oldest_key {
                    buckets.remove(&key_to_remove);
                    tracing::debug!(
                        removed_key = %key_to_remove,
                        shard_index = shard_index,
                        remaining_buckets = buckets.len(),
                        "Evicted oldest rate limit bucket due to capacity limit"
                    );
                }
            }
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimitBucket::new(window));
        let (allowed, remaining) = bucket.check_and_increment(self.limit, window);
        if allowed {
            Ok(remaining)
        } else {
            Err(bucket.reset_in())
        }
    }

    /// Drop buckets that expired past a grace period, across all shards.
    /// Run periodically so idle client entries do not accumulate.
    pub async fn cleanup_expired_buckets(&self) {
        let now = Instant::now();
        let grace_period = self.window;
        let mut total_cleaned = 0;

        for shard in &self.shards {
            let mut buckets = shard.lock().await;
            let before_count = buckets.len();
            buckets.retain(|_key, bucket| {
                bucket.reset_at > now || (now - bucket.reset_at) < grace_period
            });
            total_cleaned += before_count - buckets.len();
        }

        if total_cleaned > 0 {
            tracing::debug!(
                buckets_cleaned = total_cleaned,
                "Cleaned up expired rate limit buckets across all shards"
            );
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

fn client_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            request
                .extensions()
                .get::<axum::extract::ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn chunk_rate_limit_middleware(
    State(limiter): State<Arc<ChunkRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = format!("ip:{}", client_ip(&request));

    match limiter.check(&key).await {
        Ok(remaining) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&limiter.limit().to_string()) {
                headers.insert("X-RateLimit-Limit", value);
            }
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                headers.insert("X-RateLimit-Remaining", value);
            }
            response
        }
        Err(reset_in) => {
            tracing::warn!(key = %key, "Chunk upload rate limit exceeded");
            let reset_secs = reset_in.as_secs().max(1);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(serde_json::json!({
                    "error": "Too many chunk uploads. Please slow down.",
                    "code": "THROTTLED",
                })),
            )
                .into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&limiter.limit().to_string()) {
                headers.insert("X-RateLimit-Limit", value);
            }
            headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
            if let Ok(value) = HeaderValue::from_str(&reset_secs.to_string()) {
                headers.insert("Retry-After", value);
            }
            response
        }
    }
}
