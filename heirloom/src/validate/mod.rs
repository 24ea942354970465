//! Read-only preview of an archive against live state.

mod classify;
mod report;

pub use classify::{classify_collection, classify_record, index_by_id, Classification};
pub use report::{ClassCounts, CollectionPreview, Conflict, PreviewReport, ReferentialWarning};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use heirloom_storage::AssetStorage;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::archive::{decode, DecodeLimits, ParsedArchive};
use crate::error::{Error, Result};
use crate::model::{sha256_hex, Collection, Dataset, FieldDiff};
use crate::store::{DataStore, SnapshotQuery};

/// What sits in asset storage at an archived photo's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivePhoto {
    Absent,
    Stored { sha256: String },
    /// The file could not be checked or read; the error text is kept.
    Unreadable(String),
}

/// Classifies archives without mutating anything.
#[derive(Clone)]
pub struct Validator {
    store: Arc<dyn DataStore>,
    assets: Arc<dyn AssetStorage>,
    limits: DecodeLimits,
}

impl Validator {
    pub fn new(store: Arc<dyn DataStore>, assets: Arc<dyn AssetStorage>, limits: DecodeLimits) -> Self {
        Self {
            store,
            assets,
            limits,
        }
    }

    /// Decode `stream` and preview it. Format and version problems are
    /// errors; everything else is reported.
    pub async fn validate<S, E>(&self, stream: S) -> Result<PreviewReport>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send,
        E: Into<Error>,
    {
        let archive = decode(stream, self.limits).await?;
        self.preview(&archive).await
    }

    /// Preview an already decoded archive.
    #[instrument(skip_all, fields(source = %archive.manifest.source_instance))]
    pub async fn preview(&self, archive: &ParsedArchive) -> Result<PreviewReport> {
        let live = self
            .store
            .snapshot(&SnapshotQuery {
                include_audit_logs: archive.dataset.audit_logs.is_some(),
                audit_logs_since: None,
            })
            .await?;

        let mut live_photos = BTreeMap::new();
        for photo in &archive.photos {
            let path = photo.storage_path();
            let live_photo = match self.assets.exists(&path).await {
                Ok(false) => LivePhoto::Absent,
                Ok(true) => match self.assets.read(&path).await {
                    Ok(data) => LivePhoto::Stored {
                        sha256: sha256_hex(&data),
                    },
                    Err(e) => {
                        warn!(photo = %path, error = %e, "Cannot read live photo");
                        LivePhoto::Unreadable(e.to_string())
                    }
                },
                Err(e) => {
                    warn!(photo = %path, error = %e, "Cannot check live photo");
                    LivePhoto::Unreadable(e.to_string())
                }
            };
            live_photos.insert(photo.archive_path(), live_photo);
        }

        let report = build_report(archive, &live, &live_photos);
        info!(
            valid = report.valid,
            warnings = report.warnings.len(),
            errors = report.errors.len(),
            "Preview complete"
        );
        Ok(report)
    }
}

/// Build the report from decoded inputs.
///
/// `live_photos` maps each archived photo path to the live file at the same
/// path. Paths missing from the map count as [`LivePhoto::Absent`]. An
/// unreadable live file is a conflict whose `unreadable` diff carries the
/// error.
pub fn build_report(
    archive: &ParsedArchive,
    live: &Dataset,
    live_photos: &BTreeMap<String, LivePhoto>,
) -> PreviewReport {
    let incoming = &archive.dataset;
    let mut collections = BTreeMap::new();
    let mut errors = Vec::new();

    let mut record = |collection: Collection, (preview, errs): (CollectionPreview, Vec<String>)| {
        collections.insert(collection, preview);
        errors.extend(errs);
    };
    record(
        Collection::People,
        classify_collection(&live.people, &incoming.people),
    );
    record(
        Collection::Users,
        classify_collection(&live.users, &incoming.users),
    );
    record(
        Collection::Relationships,
        classify_collection(&live.relationships, &incoming.relationships),
    );
    record(
        Collection::Suggestions,
        classify_collection(&live.suggestions, &incoming.suggestions),
    );
    record(
        Collection::Settings,
        classify_collection(&live.settings, &incoming.settings),
    );
    if let Some(ref logs) = incoming.audit_logs {
        let live_logs = live.audit_logs.as_deref().unwrap_or(&[]);
        record(Collection::AuditLogs, classify_collection(live_logs, logs));
    }

    errors.extend(count_mismatches(archive));

    let known_people: BTreeSet<&str> = incoming
        .people
        .iter()
        .chain(live.people.iter())
        .map(|p| p.id.as_str())
        .collect();

    let mut warnings = Vec::new();
    for rel in &incoming.relationships {
        for (field, person_id) in rel.endpoints() {
            if person_id.trim().is_empty() {
                errors.push(format!(
                    "relationships: {} has an empty {}",
                    rel.id, field
                ));
            } else if !known_people.contains(person_id) {
                warnings.push(ReferentialWarning {
                    section: Collection::Relationships.to_string(),
                    record_id: rel.id.clone(),
                    field: field.to_string(),
                    missing_id: person_id.to_string(),
                });
            }
        }
    }

    let mut photos = CollectionPreview::default();
    for photo in &archive.photos {
        let path = photo.archive_path();
        if !known_people.contains(photo.person_id.as_str()) {
            warnings.push(ReferentialWarning {
                section: "photos".to_string(),
                record_id: path.clone(),
                field: "personId".to_string(),
                missing_id: photo.person_id.clone(),
            });
        }
        let incoming_hash = photo.sha256();
        let diff = match live_photos.get(&path) {
            None | Some(LivePhoto::Absent) => {
                photos.counts.new += 1;
                continue;
            }
            Some(LivePhoto::Stored { sha256 }) if *sha256 == incoming_hash => {
                photos.counts.identical += 1;
                continue;
            }
            Some(LivePhoto::Stored { sha256 }) => FieldDiff {
                field: "sha256".to_string(),
                live: Value::String(sha256.clone()),
                incoming: Value::String(incoming_hash),
            },
            Some(LivePhoto::Unreadable(reason)) => FieldDiff {
                field: "unreadable".to_string(),
                live: Value::String(reason.clone()),
                incoming: Value::String(incoming_hash),
            },
        };
        photos.counts.conflicting += 1;
        photos.conflicts.push(Conflict {
            id: path,
            fields: vec![diff],
        });
    }
    photos.conflicts.sort_by(|a, b| a.id.cmp(&b.id));

    warnings.sort();
    errors.sort();

    PreviewReport {
        valid: errors.is_empty(),
        manifest: archive.manifest.clone(),
        collections,
        photos,
        warnings,
        errors,
    }
}

/// Manifest counts must describe the data files exactly.
fn count_mismatches(archive: &ParsedArchive) -> Vec<String> {
    let actual = archive.dataset.counts();
    let declared = &archive.manifest.counts;
    let keys: BTreeSet<&Collection> = actual.keys().chain(declared.keys()).collect();
    keys.into_iter()
        .filter_map(|collection| {
            let have = actual.get(collection).copied();
            let want = declared.get(collection).copied();
            (have != want).then(|| {
                format!(
                    "{}: manifest declares {} records but the archive holds {}",
                    collection,
                    want.map_or("no".to_string(), |n| n.to_string()),
                    have.map_or("none".to_string(), |n| n.to_string())
                )
            })
        })
        .collect()
}
