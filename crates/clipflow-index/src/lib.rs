//! Clipflow Index Library
//!
//! Fast ephemeral set of received chunk indices, keyed per session. The
//! index is a performance shortcut over the authoritative `received` column
//! in the session store: durability is not required, every index update is
//! followed by a persistent write in the same logical step, and any index
//! failure makes the session manager fall back to the serialized database
//! path. The index knows nothing about sessions beyond the key; it is a
//! dumb set service.
//!
//! **Key format**: `upload:chunks:{session_id}`, TTL 24 h refreshed on
//! every write.

pub mod memory;
pub mod redis_index;
pub mod traits;

// Re-export commonly used types
pub use memory::MemoryChunkIndex;
pub use redis_index::RedisChunkIndex;
pub use traits::ChunkIndex;
