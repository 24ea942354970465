//! Rollback snapshots taken before an import mutates anything.

mod common;

use common::{chunked, family, person, TestEnv};
use heirloom::archive::{decode_bytes, DecodeLimits};
use heirloom::model::{Collection, Dataset, Person};
use heirloom::{Error, ExportOptions, ImportOptions, ImportState, Strategy};
use heirloom_storage::StorageArea;

fn backup_first(strategy: Strategy) -> ImportOptions {
    ImportOptions {
        create_backup_before_import: true,
        ..ImportOptions::with_strategy(strategy)
    }
}

async fn renamed_family_archive() -> bytes::Bytes {
    let mut dataset = family();
    dataset.people[0].name = "Janet".into();
    dataset.people.push(person("p3", "Jim"));
    TestEnv::new("source", dataset)
        .export(ExportOptions::default())
        .await
}

#[tokio::test]
async fn test_snapshot_survives_failed_apply() {
    let archive = renamed_family_archive().await;
    let env = TestEnv::new("live", family());
    env.store.fail_writes_to(Collection::Relationships);

    let report = env
        .engine
        .import(chunked(archive), backup_first(Strategy::Replace))
        .await
        .unwrap();

    assert_eq!(report.status, ImportState::Partial);
    assert_eq!(
        report.applied_collections,
        vec![Collection::People, Collection::Users]
    );
    let snapshot_id = report.rollback_snapshot_id.clone().unwrap();

    let listed = env.engine.snapshots().list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, snapshot_id);

    // The snapshot holds live state from before the import
    let bytes = env.engine.snapshots().open(&snapshot_id).await.unwrap();
    let snapshot = decode_bytes(&bytes, DecodeLimits::default()).unwrap();
    assert_eq!(snapshot.manifest.source_instance, "live");
    assert_eq!(snapshot.dataset.people.len(), 2);
    assert_eq!(snapshot.dataset.person("p1").unwrap().name, "Jane");
    assert!(snapshot.dataset.audit_logs.is_some());
    assert_eq!(env.store.person("p1").unwrap().name, "Janet");

    // Restoring puts the old values back
    env.store.clear_failures();
    let restored = env
        .engine
        .restore(&snapshot_id, ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(restored.status, ImportState::Completed);
    assert_eq!(env.store.person("p1").unwrap().name, "Jane");
    // Records created after the snapshot stay
    assert!(env.store.person("p3").is_some());
}

#[tokio::test]
async fn test_snapshot_failure_aborts_before_mutation() {
    let archive = renamed_family_archive().await;
    let env = TestEnv::new("live", family());
    env.assets.make_read_only(StorageArea::Snapshots);

    let result = env
        .engine
        .import(chunked(archive), backup_first(Strategy::Replace))
        .await;

    match result {
        Err(Error::RollbackSnapshot(_)) => {}
        other => panic!("expected rollback snapshot error, got {:?}", other),
    }
    assert_eq!(env.store.batches_written(), 0);
    assert_eq!(env.store.person("p1").unwrap().name, "Jane");
    assert!(env.store.person("p3").is_none());
    assert_eq!(env.engine.import_state(), ImportState::Failed);
    assert!(env.engine.snapshots().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_snapshot_does_not_record_export_audit() {
    let archive = renamed_family_archive().await;
    let env = TestEnv::new("live", family());

    env.engine
        .import(chunked(archive), backup_first(Strategy::Skip))
        .await
        .unwrap();

    assert!(env.store.audit_entries_for("backup.export").is_empty());
    assert_eq!(env.store.audit_entries_for("backup.import").len(), 1);
}

#[tokio::test]
async fn test_snapshot_can_be_deleted() {
    let archive = renamed_family_archive().await;
    let env = TestEnv::new(
        "live",
        Dataset {
            people: vec![Person {
                profession: Some("Pilot".into()),
                ..person("p1", "Jane")
            }],
            ..Default::default()
        },
    );
    let report = env
        .engine
        .import(chunked(archive), backup_first(Strategy::Merge))
        .await
        .unwrap();
    let snapshot_id = report.rollback_snapshot_id.unwrap();

    env.engine.snapshots().delete(&snapshot_id).await.unwrap();
    assert!(env.engine.snapshots().list().await.unwrap().is_empty());
    assert!(matches!(
        env.engine.restore(&snapshot_id, ImportOptions::default()).await,
        Err(Error::SnapshotNotFound(_))
    ));
}
