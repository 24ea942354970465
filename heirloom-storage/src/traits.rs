//! Core storage trait definitions.
//!
//! The `AssetStorage` trait is the single interface the backup engine uses to
//! read person photos and to persist rollback snapshots.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::error::Result;
use crate::path::StoragePath;

/// A fallible stream of byte chunks fed into [`AssetStorage::write_stream`].
pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'a>>;

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Full path to the object
    pub path: StoragePath,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds)
    pub last_modified: Option<i64>,
}

/// Unified storage trait for photos and snapshots.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` to allow concurrent access
/// from multiple async tasks.
///
/// # Path safety
///
/// Implementations must call [`StoragePath::validate`] before touching the
/// underlying medium, so a crafted owner or name can never escape the root.
#[async_trait]
pub trait AssetStorage: Send + Sync {
    /// Write data to the specified path.
    ///
    /// Creates parent directories/prefixes as needed.
    /// Overwrites existing data at the path.
    async fn write(&self, path: &StoragePath, data: Bytes) -> Result<()>;

    /// Write a stream of chunks to the specified path, returning the number
    /// of bytes written.
    ///
    /// The default implementation buffers the stream; backends that can
    /// append incrementally should override it. A stream error aborts the
    /// write and leaves nothing at `path`.
    async fn write_stream(&self, path: &StoragePath, mut chunks: ByteStream<'_>) -> Result<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = chunks.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let len = buf.len() as u64;
        self.write(path, buf.freeze()).await?;
        Ok(len)
    }

    /// Read data from the specified path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the path does not exist.
    async fn read(&self, path: &StoragePath) -> Result<Bytes>;

    /// Check if a path exists.
    async fn exists(&self, path: &StoragePath) -> Result<bool>;

    /// Delete data at the specified path.
    ///
    /// No-op if the path does not exist (idempotent).
    async fn delete(&self, path: &StoragePath) -> Result<()>;

    /// List objects below the given prefix.
    async fn list(&self, prefix: &StoragePath) -> Result<Vec<ObjectMeta>>;

    /// Get metadata for an object without reading its contents.
    async fn head(&self, path: &StoragePath) -> Result<ObjectMeta>;

    /// Get a human-readable name for this storage backend.
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::LocalStorage;
    use tempfile::TempDir;

    #[test]
    fn test_object_meta_debug() {
        let meta = ObjectMeta {
            path: StoragePath::photo("p1", "portrait.jpg"),
            size: 1024,
            last_modified: Some(1234567890),
        };
        let debug = format!("{:?}", meta);
        assert!(debug.contains("portrait.jpg"));
        assert!(debug.contains("1024"));
    }

    /// Storage that only implements the required methods, so the default
    /// `write_stream` is exercised.
    struct Minimal(LocalStorage);

    #[async_trait]
    impl AssetStorage for Minimal {
        async fn write(&self, path: &StoragePath, data: Bytes) -> Result<()> {
            self.0.write(path, data).await
        }
        async fn read(&self, path: &StoragePath) -> Result<Bytes> {
            self.0.read(path).await
        }
        async fn exists(&self, path: &StoragePath) -> Result<bool> {
            self.0.exists(path).await
        }
        async fn delete(&self, path: &StoragePath) -> Result<()> {
            self.0.delete(path).await
        }
        async fn list(&self, prefix: &StoragePath) -> Result<Vec<ObjectMeta>> {
            self.0.list(prefix).await
        }
        async fn head(&self, path: &StoragePath) -> Result<ObjectMeta> {
            self.0.head(path).await
        }
        fn backend_name(&self) -> &'static str {
            "minimal"
        }
    }

    #[tokio::test]
    async fn test_default_write_stream_collects_chunks() {
        let dir = TempDir::new().unwrap();
        let storage = Minimal(LocalStorage::new(dir.path()));
        let path = StoragePath::snapshot("s.tar.zst");

        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        let written = storage.write_stream(&path, Box::pin(chunks)).await.unwrap();

        assert_eq!(written, 11);
        assert_eq!(storage.read(&path).await.unwrap(), Bytes::from("hello world"));
    }

    #[tokio::test]
    async fn test_default_write_stream_error_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = Minimal(LocalStorage::new(dir.path()));
        let path = StoragePath::snapshot("broken.tar.zst");

        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::Backend("producer failed".to_string())),
        ]);
        let result = storage.write_stream(&path, Box::pin(chunks)).await;

        assert!(result.is_err());
        assert!(!storage.exists(&path).await.unwrap());
    }
}
