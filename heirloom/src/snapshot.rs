//! Persisted rollback snapshots.
//!
//! Snapshots are ordinary archives stored under the `snapshots/` area of
//! asset storage as `<id>.tar.zst`.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::StreamExt;
use heirloom_storage::{sanitize_component, AssetStorage, StorageArea, StorageError, StoragePath};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::archive::FILE_EXTENSION;
use crate::error::{Error, Result};
use crate::export::ExportStream;

const ID_PREFIX: &str = "rollback-";
const ID_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub id: String,
    pub size: u64,
    /// Taken from the id.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SnapshotRepository {
    assets: Arc<dyn AssetStorage>,
}

impl SnapshotRepository {
    pub fn new(assets: Arc<dyn AssetStorage>) -> Self {
        Self { assets }
    }

    /// `rollback-<UTC timestamp>-<8 hex chars>`
    pub fn new_id(now: DateTime<Utc>) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}-{}", ID_PREFIX, now.format(ID_TIME_FORMAT), &suffix[..8])
    }

    fn path(id: &str) -> Result<StoragePath> {
        sanitize_component(id)?;
        Ok(StoragePath::snapshot(format!("{}.{}", id, FILE_EXTENSION)))
    }

    /// Stream an export into storage and return the new snapshot id.
    ///
    /// Nothing is left behind if the export fails part way.
    #[instrument(skip_all)]
    pub async fn save(&self, export: ExportStream) -> Result<String> {
        let id = Self::new_id(Utc::now());
        let path = Self::path(&id)?;
        let chunks = export.map(|chunk| chunk.map_err(|e| StorageError::Backend(e.to_string())));
        let size = self.assets.write_stream(&path, Box::pin(chunks)).await?;
        info!(snapshot_id = %id, bytes = size, "Rollback snapshot saved");
        Ok(id)
    }

    /// Archive bytes of a snapshot.
    pub async fn open(&self, id: &str) -> Result<Bytes> {
        let path = Self::path(id)?;
        match self.assets.read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.is_not_found() => Err(Error::SnapshotNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// All snapshots, newest first.
    pub async fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let objects = self
            .assets
            .list(&StoragePath::new(StorageArea::Snapshots))
            .await?;
        let suffix = format!(".{}", FILE_EXTENSION);

        let mut snapshots: Vec<SnapshotInfo> = objects
            .into_iter()
            .filter_map(|meta| {
                let id = meta.path.name.strip_suffix(&suffix)?.to_string();
                Some(SnapshotInfo {
                    created_at: created_at_from_id(&id),
                    id,
                    size: meta.size,
                })
            })
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(snapshots)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = Self::path(id)?;
        if !self.assets.exists(&path).await? {
            return Err(Error::SnapshotNotFound(id.to_string()));
        }
        self.assets.delete(&path).await?;
        info!(snapshot_id = %id, "Snapshot deleted");
        Ok(())
    }
}

fn created_at_from_id(id: &str) -> Option<DateTime<Utc>> {
    let stamp = id.strip_prefix(ID_PREFIX)?.split('-').next()?;
    NaiveDateTime::parse_from_str(stamp, ID_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
