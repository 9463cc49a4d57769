//! In-memory blob store.
//!
//! Backs tests and single-process development runs; the trait semantics
//! (durable-before-success, atomic rename, conflict on existing target)
//! match the filesystem backend exactly.

use crate::traits::{BlobStore, ByteStream, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_key(key: &str) -> StorageResult<()> {
        if key.contains("..") || key.starts_with('/') || key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Number of stored blobs, for test assertions.
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        Self::validate_key(key)?;
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::from(data));
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        Self::validate_key(key)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let len = data.len() as u64;
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::from(data));
        Ok(len)
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        Self::validate_key(key)?;
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .map(|b| b.to_vec())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream> {
        Self::validate_key(key)?;
        let blob = {
            let blobs = self.blobs.lock().unwrap();
            blobs
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?
        };
        if end < start || end >= blob.len() as u64 {
            return Err(StorageError::Backend(format!(
                "invalid range {}-{} for {}",
                start, end, key
            )));
        }
        let slice = blob.slice(start as usize..=end as usize);
        Ok(Box::pin(futures::stream::once(async move { Ok(slice) })))
    }

    async fn content_length(&self, key: &str) -> StorageResult<u64> {
        Self::validate_key(key)?;
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .map(|b| b.len() as u64)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn rename(&self, src: &str, dst: &str) -> StorageResult<()> {
        Self::validate_key(src)?;
        Self::validate_key(dst)?;
        let mut blobs = self.blobs.lock().unwrap();
        if blobs.contains_key(dst) {
            return Err(StorageError::AlreadyExists(dst.to_string()));
        }
        let blob = blobs
            .remove(src)
            .ok_or_else(|| StorageError::NotFound(src.to_string()))?;
        blobs.insert(dst.to_string(), blob);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        Self::validate_key(key)?;
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Self::validate_key(key)?;
        Ok(self.blobs.lock().unwrap().contains_key(key))
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
