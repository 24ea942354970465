//! Local filesystem storage implementation.
//!
//! This is the default storage backend for single-node deployments.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::error::{Result, StorageError};
use crate::path::StoragePath;
use crate::traits::{AssetStorage, ByteStream, ObjectMeta};

/// Suffix for files being written by `write_stream`.
const PARTIAL_SUFFIX: &str = ".partial";

/// Local filesystem storage backend.
///
/// Stores data in a hierarchical directory structure matching the `StoragePath` format:
/// `base_path/area/[owner/]name`
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend.
    ///
    /// Directories below the base path are created lazily on write.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Get the base path for this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert a storage path to a filesystem path, refusing unsafe components.
    fn to_fs_path(&self, path: &StoragePath) -> Result<PathBuf> {
        path.validate()?;
        Ok(path.to_path_buf(&self.base_path))
    }

    /// Ensure parent directories exist for a path.
    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn object_meta(path: StoragePath, metadata: &std::fs::Metadata) -> ObjectMeta {
        ObjectMeta {
            path,
            size: metadata.len(),
            last_modified: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
        }
    }

    async fn list_recursive(&self, dir: &Path, results: &mut Vec<ObjectMeta>) -> Result<()> {
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;

            if metadata.is_dir() {
                // Use Box::pin for recursive async call
                Box::pin(self.list_recursive(&path, results)).await?;
            } else if metadata.is_file() {
                let relative = path
                    .strip_prefix(&self.base_path)
                    .map_err(|_| StorageError::InvalidPath(path.display().to_string()))?;
                let path_str = relative.to_string_lossy().replace('\\', "/");

                // Leftovers of interrupted stream writes and foreign files are not objects
                if path_str.ends_with(PARTIAL_SUFFIX) {
                    continue;
                }
                if let Some(storage_path) = StoragePath::parse(&path_str) {
                    results.push(Self::object_meta(storage_path, &metadata));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl AssetStorage for LocalStorage {
    #[instrument(skip(self, data), fields(path = %path, size = data.len()))]
    async fn write(&self, path: &StoragePath, data: Bytes) -> Result<()> {
        let fs_path = self.to_fs_path(path)?;
        self.ensure_parent(&fs_path).await?;

        debug!("Writing {} bytes to {:?}", data.len(), fs_path);
        fs::write(&fs_path, &data).await?;
        Ok(())
    }

    #[instrument(skip(self, chunks), fields(path = %path))]
    async fn write_stream(&self, path: &StoragePath, mut chunks: ByteStream<'_>) -> Result<u64> {
        let fs_path = self.to_fs_path(path)?;
        self.ensure_parent(&fs_path).await?;

        let mut partial = fs_path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        let mut file = fs::File::create(&partial).await?;
        let mut written = 0u64;

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    if let Err(cleanup) = fs::remove_file(&partial).await {
                        warn!("Failed to remove partial file {:?}: {}", partial, cleanup);
                    }
                    return Err(e);
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&partial, &fs_path).await?;
        debug!("Streamed {} bytes to {:?}", written, fs_path);
        Ok(written)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn read(&self, path: &StoragePath) -> Result<Bytes> {
        let fs_path = self.to_fs_path(path)?;
        debug!("Reading from {:?}", fs_path);

        match fs::read(&fs_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        let fs_path = self.to_fs_path(path)?;
        Ok(fs::try_exists(&fs_path).await?)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &StoragePath) -> Result<()> {
        let fs_path = self.to_fs_path(path)?;
        debug!("Deleting {:?}", fs_path);

        match fs::remove_file(&fs_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(prefix = %prefix))]
    async fn list(&self, prefix: &StoragePath) -> Result<Vec<ObjectMeta>> {
        let fs_prefix = self.to_fs_path(prefix)?;
        let mut results = Vec::new();

        if !prefix.is_prefix() {
            if let Ok(metadata) = fs::metadata(&fs_prefix).await {
                if metadata.is_file() {
                    results.push(Self::object_meta(prefix.clone(), &metadata));
                }
            }
            return Ok(results);
        }

        if !fs::try_exists(&fs_prefix).await? {
            return Ok(results);
        }

        self.list_recursive(&fs_prefix, &mut results).await?;
        results.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(results)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn head(&self, path: &StoragePath) -> Result<ObjectMeta> {
        let fs_path = self.to_fs_path(path)?;

        let metadata = match fs::metadata(&fs_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::object_meta(path.clone(), &metadata))
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
