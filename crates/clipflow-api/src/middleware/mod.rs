pub mod rate_limit;

pub use rate_limit::{chunk_rate_limit_middleware, ChunkRateLimiter};
