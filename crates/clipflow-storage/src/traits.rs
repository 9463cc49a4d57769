//! Storage abstraction trait
//!
//! This module defines the [`BlobStore`] trait that all storage backends
//! must implement, and the error type they surface.

use async_trait::async_trait;
use bytes::Bytes;
use clipflow_core::AppError;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of body chunks yielded by a range read.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("blob {}", key)),
            StorageError::AlreadyExists(key) => AppError::Conflict(format!("blob {} exists", key)),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            StorageError::Io(e) => AppError::transient("storage IO failure", e),
            StorageError::Backend(msg) => AppError::Transient(msg),
        }
    }
}

/// Blob store abstraction
///
/// Backends guarantee that bytes are durable before a write reports success
/// and that `rename` is atomic with respect to concurrent readers: either
/// the old key resolves or the new one does, never a torn state.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a complete blob.
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()>;

    /// Stream a blob into place without holding it in memory. Returns the
    /// number of bytes written.
    async fn put_stream(
        &self,
        key: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64>;

    /// Read a complete blob.
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Stream the byte range `[start, end]` (inclusive bounds) of a blob.
    /// The range must already be validated against [`BlobStore::content_length`].
    async fn read_range(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream>;

    /// Size in bytes of a stored blob.
    async fn content_length(&self, key: &str) -> StorageResult<u64>;

    /// Atomically move `src` to `dst`. Fails with `AlreadyExists` when the
    /// destination is already present (callers treat that as a retry).
    async fn rename(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// Delete a blob. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Keys beginning with `prefix`, unordered. Used by GC scans of
    /// `chunks/`; never on the hot path.
    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
