use crate::traits::{BlobStore, ByteStream, StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// # Arguments
    /// * `base_path` - Root directory for blob storage (e.g. "/var/lib/clipflow/data")
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        for prefix in [
            crate::keys::CHUNKS_PREFIX,
            crate::keys::UPLOADS_PREFIX,
            crate::keys::THUMBNAILS_PREFIX,
        ] {
            fs::create_dir_all(base_path.join(prefix.trim_end_matches('/'))).await?;
        }
        Ok(LocalStorage { base_path })
    }

    /// Converts a storage key to a filesystem path. Rejects path traversal.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.contains("..") || key.starts_with('/') || key.is_empty() {
            return Err(StorageError::InvalidKey(format!(
                "storage key contains invalid characters: {}",
                key
            )));
        }
        Ok(self.base_path.join(key))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        self.ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "Local storage put create failed");
            StorageError::Io(e)
        })?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        tracing::debug!(key = %key, size_bytes = data.len(), "Local storage put successful");
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        self.ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "Local storage stream put create failed");
            StorageError::Io(e)
        })?;
        let bytes_copied = match tokio::io::copy(&mut reader, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                // Destroy the partial output before surfacing the error.
                drop(file);
                let _ = fs::remove_file(&path).await;
                tracing::error!(path = %path.display(), key = %key, error = %e, "Local storage stream put write failed");
                return Err(StorageError::Io(e));
            }
        };
        file.sync_all().await?;

        tracing::debug!(key = %key, size_bytes = bytes_copied, "Local storage stream put successful");
        Ok(bytes_copied)
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(fs::read(&path).await?)
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if end < start {
            return Err(StorageError::Backend(format!(
                "invalid range {}-{} for {}",
                start, end, key
            )));
        }

        let mut file = fs::File::open(&path).await?;
        file.seek(std::io::SeekFrom::Start(start)).await?;
        let limited = file.take(end - start + 1);

        let key = key.to_string();
        let stream = tokio_util::io::ReaderStream::new(limited).map(move |item| {
            item.map_err(|e| {
                tracing::error!(key = %key, error = %e, "Local storage range read error");
                StorageError::Io(e)
            })
        });
        Ok(Box::pin(stream))
    }

    async fn content_length(&self, key: &str) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|_| StorageError::NotFound(key.to_string()))?;
        if !meta.is_file() {
            return Err(StorageError::Backend(format!(
                "storage key is not a file: {}",
                key
            )));
        }
        Ok(meta.len())
    }

    async fn rename(&self, src: &str, dst: &str) -> StorageResult<()> {
        let src_path = self.key_to_path(src)?;
        let dst_path = self.key_to_path(dst)?;

        if fs::try_exists(&dst_path).await.unwrap_or(false) {
            return Err(StorageError::AlreadyExists(dst.to_string()));
        }
        if !fs::try_exists(&src_path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(src.to_string()));
        }
        self.ensure_parent_dir(&dst_path).await?;
        fs::rename(&src_path, &dst_path).await.map_err(|e| {
            tracing::error!(src = %src, dst = %dst, error = %e, "Local storage rename failed");
            StorageError::Io(e)
        })?;

        tracing::debug!(src = %src, dst = %dst, "Local storage rename successful");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        fs::remove_file(&path).await.map_err(|e| {
            tracing::error!(key = %key, error = %e, "Local storage delete failed");
            StorageError::Io(e)
        })?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Keys never nest below one directory level, so a prefix always
        // splits into a directory part and a filename prefix.
        if prefix.contains("..") || prefix.starts_with('/') {
            return Err(StorageError::InvalidKey(prefix.to_string()));
        }
        let (dir, name_prefix) = match prefix.rsplit_once('/') {
            Some((dir, name)) => (dir.to_string(), name.to_string()),
            None => (String::new(), prefix.to_string()),
        };

        let dir_path = self.base_path.join(&dir);
        if !fs::try_exists(&dir_path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&dir_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&name_prefix) && entry.file_type().await?.is_file() {
                if dir.is_empty() {
                    keys.push(name);
                } else {
                    keys.push(format!("{}/{}", dir, name));
                }
            }
        }
        Ok(keys)
    }
}
