//! Applies a validated archive to the live store.
//!
//! An import runs through `Idle → RollbackSnapshotting (optional) →
//! Applying → Completed | Partial | Failed`. One import at a time per
//! store, enforced by [`DataStore::acquire_import_lock`]; a second caller,
//! through any importer or process, gets [`Error::Concurrency`] immediately.
//!
//! Collections are applied in [`Collection`] order, each as one atomic
//! batch. A failed batch stops the import, and the report lists which
//! collections were committed so the caller can decide whether to restore
//! the rollback snapshot.

mod apply;
mod report;

pub use apply::{resolve, Resolution};
pub use report::{ApplyCounts, ImportOptions, ImportReport, ImportState, Strategy};

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use heirloom_storage::AssetStorage;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::archive::{decode, DecodeLimits, ParsedArchive};
use crate::error::{Error, Result};
use crate::export::{ExportOptions, Exporter};
use crate::model::{Collection, Dataset};
use crate::snapshot::SnapshotRepository;
use crate::store::{AuditEvent, AuditSink, DataStore, SnapshotQuery, WriteBatch};
use crate::validate::Validator;

/// Single-flight importer for one store.
pub struct Importer {
    store: Arc<dyn DataStore>,
    assets: Arc<dyn AssetStorage>,
    audit: Arc<dyn AuditSink>,
    exporter: Exporter,
    validator: Validator,
    snapshots: SnapshotRepository,
    limits: DecodeLimits,
    state: Mutex<ImportState>,
}

impl Importer {
    pub fn new(
        store: Arc<dyn DataStore>,
        assets: Arc<dyn AssetStorage>,
        audit: Arc<dyn AuditSink>,
        exporter: Exporter,
        limits: DecodeLimits,
    ) -> Self {
        Self {
            validator: Validator::new(store.clone(), assets.clone(), limits),
            snapshots: SnapshotRepository::new(assets.clone()),
            store,
            assets,
            audit,
            exporter,
            limits,
            state: Mutex::new(ImportState::Idle),
        }
    }

    pub fn state(&self) -> ImportState {
        *self.state.lock()
    }

    fn set_state(&self, state: ImportState) {
        *self.state.lock() = state;
    }

    /// Decode, validate and apply an archive.
    ///
    /// Format, version and rollback-snapshot failures are errors and leave
    /// the store untouched. Failures after mutation began are reported in
    /// the returned [`ImportReport`].
    pub async fn import<S, E>(&self, stream: S, options: ImportOptions) -> Result<ImportReport>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send,
        E: Into<Error>,
    {
        let _lock = self.store.acquire_import_lock().await?;
        self.set_state(ImportState::Idle);

        let archive = match decode(stream, self.limits).await {
            Ok(archive) => archive,
            Err(e) => {
                self.set_state(ImportState::Failed);
                return Err(e);
            }
        };

        match self.run(&archive, &options).await {
            Ok(report) => {
                self.set_state(report.status);
                Ok(report)
            }
            Err(e) => {
                self.set_state(ImportState::Failed);
                Err(e)
            }
        }
    }

    #[instrument(skip_all, fields(strategy = %options.strategy, source = %archive.manifest.source_instance))]
    async fn run(&self, archive: &ParsedArchive, options: &ImportOptions) -> Result<ImportReport> {
        let mut report = ImportReport::new(options.strategy, Utc::now());

        let preview = self.validator.preview(archive).await?;
        if !preview.valid {
            return Err(Error::Format(format!(
                "Archive failed validation: {}",
                preview.errors.join("; ")
            )));
        }

        if options.create_backup_before_import {
            self.set_state(ImportState::RollbackSnapshotting);
            let export = self.exporter.export(ExportOptions::full_snapshot());
            let id = self
                .snapshots
                .save(export)
                .await
                .map_err(|e| Error::RollbackSnapshot(e.to_string()))?;
            report.rollback_snapshot_id = Some(id);
        }

        self.set_state(ImportState::Applying);
        let incoming = &archive.dataset;
        let plan: Vec<Collection> = Collection::ALL
            .into_iter()
            .filter(|c| options.selects(*c))
            .filter(|c| match c {
                Collection::AuditLogs => options.import_audit_logs && incoming.audit_logs.is_some(),
                _ => true,
            })
            .collect();

        let live = self
            .store
            .snapshot(&SnapshotQuery {
                include_audit_logs: plan.contains(&Collection::AuditLogs),
                audit_logs_since: None,
            })
            .await?;

        let mut known_people: BTreeSet<String> =
            live.people.iter().map(|p| p.id.clone()).collect();

        for &collection in &plan {
            if options.is_cancelled() {
                info!(collection = %collection, "Import cancelled");
                report.cancelled = true;
                break;
            }

            let (batch, mut counts) = self.plan_batch(
                collection,
                &live,
                incoming,
                options.strategy,
                &known_people,
                &mut report.warnings,
            );
            let attempted = batch.len() as u64;
            let result = if batch.is_empty() {
                Ok(())
            } else {
                self.store.write_batch(batch).await
            };

            match result {
                Ok(()) => {
                    if collection == Collection::People {
                        known_people.extend(incoming.people.iter().map(|p| p.id.clone()));
                    }
                    info!(
                        collection = %collection,
                        created = counts.created,
                        updated = counts.updated,
                        skipped = counts.skipped,
                        "Collection applied"
                    );
                    report.collections.insert(collection, counts);
                    report.applied_collections.push(collection);
                }
                Err(e) => {
                    error!(collection = %collection, error = %e, "Batch write failed, stopping import");
                    counts.created = 0;
                    counts.updated = 0;
                    counts.failed = attempted;
                    report.collections.insert(collection, counts);
                    report.error = Some(format!("{}: {}", collection, e));
                    break;
                }
            }
        }

        report.pending_collections = plan
            .iter()
            .filter(|c| !report.applied_collections.contains(*c))
            .copied()
            .collect();

        let stopped = report.error.is_some() || report.cancelled;
        if options.import_photos && !archive.photos.is_empty() && !stopped {
            if options.is_cancelled() {
                report.cancelled = true;
            } else {
                report.photos = self
                    .apply_photos(archive, options.strategy, &known_people, &mut report.warnings)
                    .await;
            }
        }

        report.status = if report.error.is_some() || report.cancelled {
            if report.applied_collections.is_empty() {
                ImportState::Failed
            } else {
                ImportState::Partial
            }
        } else {
            ImportState::Completed
        };
        report.finished_at = Some(Utc::now());

        self.record_audit(&report, options).await;
        info!(
            status = %report.status,
            applied = report.applied_collections.len(),
            pending = report.pending_collections.len(),
            "Import finished"
        );
        Ok(report)
    }

    /// Resolve one collection into the batch to write.
    fn plan_batch(
        &self,
        collection: Collection,
        live: &Dataset,
        incoming: &Dataset,
        strategy: Strategy,
        known_people: &BTreeSet<String>,
        warnings: &mut Vec<String>,
    ) -> (WriteBatch, ApplyCounts) {
        match collection {
            Collection::People => {
                let r = resolve(&live.people, &incoming.people, strategy);
                (WriteBatch::People(r.writes), r.counts)
            }
            Collection::Users => {
                let r = resolve(&live.users, &incoming.users, strategy);
                (WriteBatch::Users(r.writes), r.counts)
            }
            Collection::Relationships => {
                let (resolvable, dropped): (Vec<_>, Vec<_>) = incoming
                    .relationships
                    .iter()
                    .cloned()
                    .partition(|rel| {
                        rel.endpoints()
                            .iter()
                            .all(|(_, id)| known_people.contains(*id))
                    });
                for rel in &dropped {
                    warn!(relationship = %rel.id, "Dropping relationship with unresolved endpoint");
                    warnings.push(format!(
                        "relationship {} dropped: endpoint {} or {} does not resolve to a person",
                        rel.id, rel.person_id, rel.related_person_id
                    ));
                }
                let mut r = resolve(&live.relationships, &resolvable, strategy);
                r.counts.skipped += dropped.len() as u64;
                (WriteBatch::Relationships(r.writes), r.counts)
            }
            Collection::Suggestions => {
                let r = resolve(&live.suggestions, &incoming.suggestions, strategy);
                (WriteBatch::Suggestions(r.writes), r.counts)
            }
            Collection::Settings => {
                let r = resolve(&live.settings, &incoming.settings, strategy);
                (WriteBatch::Settings(r.writes), r.counts)
            }
            Collection::AuditLogs => {
                let live_logs = live.audit_logs.as_deref().unwrap_or(&[]);
                let incoming_logs = incoming.audit_logs.as_deref().unwrap_or(&[]);
                let r = resolve(live_logs, incoming_logs, strategy);
                (WriteBatch::AuditLogs(r.writes), r.counts)
            }
        }
    }

    /// Write archived photos. Individual failures are counted, never fatal.
    async fn apply_photos(
        &self,
        archive: &ParsedArchive,
        strategy: Strategy,
        known_people: &BTreeSet<String>,
        warnings: &mut Vec<String>,
    ) -> ApplyCounts {
        let mut counts = ApplyCounts::default();

        for photo in &archive.photos {
            let path = photo.storage_path();
            if !known_people.contains(&photo.person_id) {
                warn!(photo = %path, "Skipping photo of unknown person");
                warnings.push(format!(
                    "photo {} skipped: person {} does not exist",
                    path, photo.person_id
                ));
                counts.skipped += 1;
                continue;
            }

            let exists = match self.assets.exists(&path).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!(photo = %path, error = %e, "Cannot check photo");
                    counts.failed += 1;
                    continue;
                }
            };

            if exists {
                if strategy != Strategy::Replace {
                    counts.skipped += 1;
                    continue;
                }
                let live = match self.assets.read(&path).await {
                    Ok(live) => live,
                    Err(e) => {
                        warn!(photo = %path, error = %e, "Cannot read live photo");
                        warnings.push(format!("photo {} not replaced: {}", path, e));
                        counts.failed += 1;
                        continue;
                    }
                };
                if live == photo.data {
                    counts.skipped += 1;
                    continue;
                }
            }

            match self.assets.write(&path, photo.data.clone()).await {
                Ok(()) if exists => counts.updated += 1,
                Ok(()) => counts.created += 1,
                Err(e) => {
                    warn!(photo = %path, error = %e, "Photo write failed");
                    counts.failed += 1;
                }
            }
        }

        counts
    }

    async fn record_audit(&self, report: &ImportReport, options: &ImportOptions) {
        let event = AuditEvent::new(
            "backup.import",
            options.actor.clone(),
            json!({
                "strategy": report.strategy,
                "status": report.status,
                "collections": report.collections,
                "photos": report.photos,
                "appliedCollections": report.applied_collections,
                "rollbackSnapshotId": report.rollback_snapshot_id,
                "cancelled": report.cancelled,
            }),
        );
        if let Err(e) = self.audit.append(event).await {
            warn!(error = %e, "Failed to record import audit entry");
        }
    }
}
