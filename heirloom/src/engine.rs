//! `BackupEngine` wires the exporter, validator, importer and snapshot
//! repository to one store and one asset storage.

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use heirloom_storage::AssetStorage;
use tracing::info;

use crate::archive::DecodeLimits;
use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::export::{ExportOptions, ExportStream, Exporter};
use crate::import::{ImportOptions, ImportReport, ImportState, Importer, Strategy};
use crate::snapshot::SnapshotRepository;
use crate::store::{AuditSink, DataStore};
use crate::validate::{PreviewReport, Validator};

pub struct BackupEngine {
    exporter: Exporter,
    validator: Validator,
    importer: Importer,
    snapshots: SnapshotRepository,
}

impl BackupEngine {
    pub fn new(
        store: Arc<dyn DataStore>,
        assets: Arc<dyn AssetStorage>,
        audit: Arc<dyn AuditSink>,
        config: &ArchiveConfig,
    ) -> Self {
        let limits = DecodeLimits::from(config);
        let exporter = Exporter::new(
            store.clone(),
            assets.clone(),
            audit.clone(),
            config.compression_level,
        );
        Self {
            validator: Validator::new(store.clone(), assets.clone(), limits),
            importer: Importer::new(store, assets.clone(), audit, exporter.clone(), limits),
            snapshots: SnapshotRepository::new(assets),
            exporter,
        }
    }

    /// Lazy archive of live state.
    pub fn export(&self, options: ExportOptions) -> ExportStream {
        self.exporter.export(options)
    }

    /// Preview an archive without touching live state.
    pub async fn validate<S, E>(&self, stream: S) -> Result<PreviewReport>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send,
        E: Into<Error>,
    {
        self.validator.validate(stream).await
    }

    pub async fn import<S, E>(&self, stream: S, options: ImportOptions) -> Result<ImportReport>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send,
        E: Into<Error>,
    {
        self.importer.import(stream, options).await
    }

    pub fn import_state(&self) -> ImportState {
        self.importer.state()
    }

    pub fn snapshots(&self) -> &SnapshotRepository {
        &self.snapshots
    }

    /// Import a stored snapshot with the `replace` strategy.
    ///
    /// Records created after the snapshot was taken are left in place.
    pub async fn restore(&self, snapshot_id: &str, options: ImportOptions) -> Result<ImportReport> {
        let data = self.snapshots.open(snapshot_id).await?;
        info!(snapshot_id = %snapshot_id, bytes = data.len(), "Restoring snapshot");
        let options = ImportOptions {
            strategy: Strategy::Replace,
            import_audit_logs: true,
            ..options
        };
        self.import(futures::stream::once(async move { Ok::<_, Error>(data) }), options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dataset, Person};
    use crate::store::MemoryStore;
    use heirloom_storage::LocalStorage;
    use tempfile::TempDir;

    fn engine(store: Arc<MemoryStore>, dir: &TempDir) -> BackupEngine {
        BackupEngine::new(
            store.clone(),
            Arc::new(LocalStorage::new(dir.path())),
            store,
            &ArchiveConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_restore_reverts_changed_records() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::with_dataset(
            "home",
            Dataset {
                people: vec![Person {
                    id: "p1".into(),
                    name: "Jane".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ));
        let engine = engine(store.clone(), &dir);

        let (archive, _) = engine
            .export(ExportOptions::full_snapshot())
            .read_to_end()
            .await
            .unwrap();
        let report = engine
            .import(
                futures::stream::once(async move { Ok::<_, Error>(archive) }),
                ImportOptions {
                    create_backup_before_import: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let snapshot_id = report.rollback_snapshot_id.unwrap();

        store.seed(Dataset {
            people: vec![Person {
                id: "p1".into(),
                name: "Changed".into(),
                ..Default::default()
            }],
            ..Default::default()
        });

        let restored = engine
            .restore(&snapshot_id, ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(restored.status, ImportState::Completed);
        assert_eq!(restored.strategy, Strategy::Replace);
        assert_eq!(store.person("p1").unwrap().name, "Jane");
        assert_eq!(engine.import_state(), ImportState::Completed);
    }

    #[tokio::test]
    async fn test_restore_unknown_snapshot() {
        let dir = TempDir::new().unwrap();
        let engine = engine(Arc::new(MemoryStore::default()), &dir);
        assert!(matches!(
            engine.restore("rollback-missing", ImportOptions::default()).await,
            Err(Error::SnapshotNotFound(_))
        ));
    }
}
