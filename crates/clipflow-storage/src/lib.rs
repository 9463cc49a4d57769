//! Clipflow Storage Library
//!
//! Blob store abstraction for the ingest core. The namespace has three
//! logical prefixes: `chunks/` for in-flight chunk blobs, `uploads/` for
//! assembled originals, `thumbnails/` for generated JPEGs. Every backend
//! promises durability of written bytes before reporting success, plus
//! atomic `rename` with respect to concurrent readers.
//!
//! Keys must not contain `..` or a leading `/`. Key generation is
//! centralized in the `keys` module so all components stay consistent.

pub mod keys;
pub mod local;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use traits::{BlobStore, ByteStream, StorageError, StorageResult};
