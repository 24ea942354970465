//! Streaming export of the live dataset and its photos.
//!
//! The export is a lazy stream of compressed archive chunks. Nothing is read
//! from the store until the stream is first polled, and the producer only
//! advances when the consumer asks for the next chunk.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use futures::{Stream, StreamExt};
use heirloom_storage::{sanitize_component, AssetStorage, StorageError, StoragePath};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveWriter, DATA_LAYOUT};
use crate::config::ExportConfig;
use crate::error::{Error, Result};
use crate::model::{sha256_hex, Collection, Dataset, Includes, Manifest, Person};
use crate::store::{AuditEvent, AuditSink, DataStore, SnapshotQuery};

/// What an export includes.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub include_photos: bool,
    pub include_audit_logs: bool,
    /// Only audit entries from the last N days. `None` includes all.
    pub audit_log_days: Option<u32>,
    /// Recorded as the user of the audit entry.
    pub actor: Option<String>,
    /// Append a `backup.export` audit entry when the archive is complete.
    pub record_audit: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for ExportOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            include_photos: config.include_photos,
            include_audit_logs: config.include_audit_logs,
            audit_log_days: config.audit_log_days,
            actor: None,
            record_audit: true,
        }
    }
}

impl ExportOptions {
    /// Everything, including the full audit history. Used for rollback
    /// snapshots, which do not record an audit entry of their own.
    pub fn full_snapshot() -> Self {
        Self {
            include_photos: true,
            include_audit_logs: true,
            audit_log_days: None,
            actor: None,
            record_audit: false,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    fn snapshot_query(&self, now: DateTime<Utc>) -> SnapshotQuery {
        SnapshotQuery {
            include_audit_logs: self.include_audit_logs,
            audit_logs_since: self
                .audit_log_days
                .map(|days| now - Duration::days(i64::from(days))),
        }
    }
}

/// Outcome of a finished export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub exported_at: Option<DateTime<Utc>>,
    pub counts: BTreeMap<Collection, u64>,
    pub photos_written: u64,
    /// Referenced photos that were missing or unreadable.
    pub photos_skipped: u64,
    pub bytes_written: u64,
}

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Archive bytes produced on demand.
///
/// The [`ExportSummary`] becomes available once the last chunk has been
/// produced.
pub struct ExportStream {
    inner: ChunkStream,
    summary: Arc<Mutex<Option<ExportSummary>>>,
}

impl ExportStream {
    pub fn summary(&self) -> Option<ExportSummary> {
        self.summary.lock().clone()
    }

    /// Drain the stream into memory.
    pub async fn read_to_end(mut self) -> Result<(Bytes, ExportSummary)> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let summary = self
            .summary()
            .ok_or_else(|| Error::Format("Export ended without a summary".to_string()))?;
        Ok((buf.freeze(), summary))
    }
}

impl Stream for ExportStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Reads the store and asset storage and encodes them as an archive.
#[derive(Clone)]
pub struct Exporter {
    store: Arc<dyn DataStore>,
    assets: Arc<dyn AssetStorage>,
    audit: Arc<dyn AuditSink>,
    compression_level: i32,
}

impl Exporter {
    pub fn new(
        store: Arc<dyn DataStore>,
        assets: Arc<dyn AssetStorage>,
        audit: Arc<dyn AuditSink>,
        compression_level: i32,
    ) -> Self {
        Self {
            store,
            assets,
            audit,
            compression_level,
        }
    }

    /// One consistent read of the collections `options` asks for.
    pub async fn gather(&self, options: &ExportOptions) -> Result<Dataset> {
        self.gather_at(options, Utc::now()).await
    }

    async fn gather_at(&self, options: &ExportOptions, now: DateTime<Utc>) -> Result<Dataset> {
        self.store.snapshot(&options.snapshot_query(now)).await
    }

    /// Start a lazy export.
    pub fn export(&self, options: ExportOptions) -> ExportStream {
        let summary = Arc::new(Mutex::new(None));
        let inner = produce(self.clone(), options, summary.clone());
        ExportStream { inner, summary }
    }
}

fn produce(
    exporter: Exporter,
    options: ExportOptions,
    summary_slot: Arc<Mutex<Option<ExportSummary>>>,
) -> ChunkStream {
    Box::pin(async_stream::try_stream! {
        let exported_at = Utc::now();
        let dataset = exporter.gather_at(&options, exported_at).await?;

        let mut manifest = Manifest::new(exporter.store.instance_id(), exported_at);
        manifest.counts = dataset.counts();
        manifest.includes = Includes {
            photos: options.include_photos,
            audit_logs: dataset.audit_logs.is_some(),
        };

        // Checksums go into the manifest, so data files are serialized first
        let mut data_files = Vec::new();
        for collection in DATA_LAYOUT {
            if let Some(bytes) = dataset.collection_json(collection)? {
                manifest
                    .checksums
                    .insert(collection.data_path(), sha256_hex(&bytes));
                data_files.push((collection, bytes));
            }
        }

        let mut summary = ExportSummary {
            exported_at: Some(exported_at),
            counts: manifest.counts.clone(),
            ..Default::default()
        };

        let mut writer = ArchiveWriter::new(exporter.compression_level, exported_at)?;
        writer.append_manifest(&manifest)?;
        for (collection, bytes) in data_files {
            writer.append(&collection.data_path(), &bytes)?;
            let chunk = writer.take_chunk();
            if !chunk.is_empty() {
                summary.bytes_written += chunk.len() as u64;
                yield chunk;
            }
        }

        if options.include_photos {
            for person in &dataset.people {
                let path = match photo_path(person) {
                    None => continue,
                    Some(Ok(path)) => path,
                    Some(Err(e)) => {
                        warn!(person_id = %person.id, error = %e, "Photo reference is not a safe path, skipping");
                        summary.photos_skipped += 1;
                        continue;
                    }
                };
                match exporter.assets.read(&path).await {
                    Ok(data) => {
                        writer.append(&path.to_string(), &data)?;
                        summary.photos_written += 1;
                        let chunk = writer.take_chunk();
                        if !chunk.is_empty() {
                            summary.bytes_written += chunk.len() as u64;
                            yield chunk;
                        }
                    }
                    Err(e) => {
                        warn!(person_id = %person.id, photo = %path, error = %e, "Skipping unreadable photo");
                        summary.photos_skipped += 1;
                    }
                }
            }
        }

        let tail = writer.finish()?;
        summary.bytes_written += tail.len() as u64;

        info!(
            people = dataset.people.len(),
            photos_written = summary.photos_written,
            photos_skipped = summary.photos_skipped,
            bytes = summary.bytes_written,
            "Export complete"
        );

        if options.record_audit {
            let event = AuditEvent::new(
                "backup.export",
                options.actor.clone(),
                json!({
                    "counts": summary.counts,
                    "photosWritten": summary.photos_written,
                    "photosSkipped": summary.photos_skipped,
                    "bytes": summary.bytes_written,
                }),
            );
            if let Err(e) = exporter.audit.append(event).await {
                warn!(error = %e, "Failed to record export audit entry");
            }
        }

        *summary_slot.lock() = Some(summary);
        yield tail;
    })
}

/// Storage path of a person's photo. `None` when they reference none,
/// an error when the reference is not a safe path.
fn photo_path(person: &Person) -> Option<std::result::Result<StoragePath, StorageError>> {
    let filename = person.photo.as_deref()?.trim();
    if filename.is_empty() {
        return None;
    }
    debug!(person_id = %person.id, photo = %filename, "Resolving photo");
    Some(
        sanitize_component(&person.id)
            .and_then(|_| sanitize_component(filename))
            .map(|_| StoragePath::photo(person.id.clone(), filename.to_string())),
    )
}
