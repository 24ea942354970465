//! Import strategies, referential integrity and resumable imports.

mod common;

use bytes::Bytes;
use common::{chunked, person, relationship, TestEnv};
use heirloom::model::{Collection, Dataset, Person};
use heirloom::{ExportOptions, ImportOptions, ImportState, Strategy};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn archive_of(dataset: Dataset) -> Bytes {
    TestEnv::new("source", dataset)
        .export(ExportOptions::default())
        .await
}

fn janet_teacher() -> Dataset {
    Dataset {
        people: vec![Person {
            profession: Some("Teacher".into()),
            ..person("p1", "Janet")
        }],
        ..Default::default()
    }
}

fn live_jane() -> TestEnv {
    TestEnv::new(
        "live",
        Dataset {
            people: vec![person("p1", "Jane")],
            ..Default::default()
        },
    )
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_skip_keeps_live_record() {
    let archive = archive_of(janet_teacher()).await;
    let env = live_jane();

    let report = env
        .engine
        .import(chunked(archive), ImportOptions::with_strategy(Strategy::Skip))
        .await
        .unwrap();

    assert_eq!(report.status, ImportState::Completed);
    assert_eq!(report.counts(Collection::People).updated, 0);
    assert_eq!(report.counts(Collection::People).skipped, 1);
    let p1 = env.store.person("p1").unwrap();
    assert_eq!(p1.name, "Jane");
    assert_eq!(p1.profession, None);
}

#[tokio::test]
async fn test_replace_overwrites_live_record() {
    let archive = archive_of(janet_teacher()).await;
    let env = live_jane();

    let report = env
        .engine
        .import(chunked(archive), ImportOptions::with_strategy(Strategy::Replace))
        .await
        .unwrap();

    assert_eq!(report.counts(Collection::People).updated, 1);
    let p1 = env.store.person("p1").unwrap();
    assert_eq!(p1.name, "Janet");
    assert_eq!(p1.profession.as_deref(), Some("Teacher"));
}

#[tokio::test]
async fn test_merge_fills_blanks_and_keeps_live_values() {
    let archive = archive_of(janet_teacher()).await;
    let env = live_jane();

    let report = env
        .engine
        .import(chunked(archive), ImportOptions::with_strategy(Strategy::Merge))
        .await
        .unwrap();

    assert_eq!(report.counts(Collection::People).updated, 1);
    let p1 = env.store.person("p1").unwrap();
    assert_eq!(p1.name, "Jane");
    assert_eq!(p1.profession.as_deref(), Some("Teacher"));
}

#[tokio::test]
async fn test_preview_lists_field_conflicts() {
    let archive = archive_of(janet_teacher()).await;
    let env = live_jane();

    let preview = env.engine.validate(chunked(archive)).await.unwrap();
    let people = preview.collection(Collection::People).unwrap();
    assert_eq!(people.counts.conflicting, 1);

    let fields: Vec<&str> = people.conflicts[0]
        .fields
        .iter()
        .map(|d| d.field.as_str())
        .collect();
    assert_eq!(fields, vec!["name", "profession"]);
    assert_eq!(people.conflicts[0].fields[0].live, "Jane");
    assert_eq!(people.conflicts[0].fields[0].incoming, "Janet");
}

// ---------------------------------------------------------------------------
// Referential integrity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dangling_relationship_dropped_with_warning() {
    let archive = archive_of(Dataset {
        people: vec![person("p1", "Jane")],
        relationships: vec![relationship("r1", "p1", "p9"), relationship("r2", "p1", "p2")],
        ..Default::default()
    })
    .await;
    let env = TestEnv::new(
        "live",
        Dataset {
            people: vec![person("p2", "John")],
            ..Default::default()
        },
    );

    let preview = env.engine.validate(chunked(archive.clone())).await.unwrap();
    assert!(preview.valid);
    assert_eq!(preview.warnings.len(), 1);
    assert_eq!(preview.warnings[0].record_id, "r1");
    assert_eq!(preview.warnings[0].missing_id, "p9");

    let report = env
        .engine
        .import(chunked(archive), ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.status, ImportState::Completed);
    let rels = report.counts(Collection::Relationships);
    assert_eq!(rels.created, 1);
    assert_eq!(rels.skipped, 1);
    assert!(report.warnings.iter().any(|w| w.contains("r1")));
    assert!(env.store.relationship("r1").is_none());
    assert!(env.store.relationship("r2").is_some());
}

#[tokio::test]
async fn test_relationship_to_unimported_people_is_dropped() {
    let archive = archive_of(Dataset {
        people: vec![person("p1", "Jane"), person("p2", "John")],
        relationships: vec![relationship("r1", "p1", "p2")],
        ..Default::default()
    })
    .await;
    let env = TestEnv::new("live", Dataset::default());

    let report = env
        .engine
        .import(
            chunked(archive),
            ImportOptions {
                collections: Some([Collection::Relationships].into_iter().collect()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.applied_collections, vec![Collection::Relationships]);
    assert_eq!(report.counts(Collection::Relationships).skipped, 1);
    assert!(env.store.relationship("r1").is_none());
}

// ---------------------------------------------------------------------------
// Partial failure and resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_batch_failure_is_partial_and_resumable() {
    let archive = archive_of(common::family()).await;
    let env = TestEnv::new("live", Dataset::default());
    env.store.fail_writes_to(Collection::Suggestions);

    let report = env
        .engine
        .import(chunked(archive.clone()), ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.status, ImportState::Partial);
    assert_eq!(
        report.applied_collections,
        vec![Collection::People, Collection::Users, Collection::Relationships]
    );
    assert_eq!(
        report.pending_collections,
        vec![Collection::Suggestions, Collection::Settings]
    );
    assert_eq!(report.counts(Collection::Suggestions).failed, 1);
    assert!(report.error.as_deref().unwrap().contains("suggestions"));
    assert!(env.store.setting("site.title").is_none());
    assert_eq!(env.engine.import_state(), ImportState::Partial);

    env.store.clear_failures();
    let resumed = env
        .engine
        .import(chunked(archive), ImportOptions::default().resume(&report))
        .await
        .unwrap();
    assert_eq!(resumed.status, ImportState::Completed);
    assert_eq!(
        resumed.applied_collections,
        vec![Collection::Suggestions, Collection::Settings]
    );
    assert!(env.store.setting("site.title").is_some());
}

#[tokio::test]
async fn test_first_batch_failure_is_failed() {
    let archive = archive_of(common::family()).await;
    let env = TestEnv::new("live", Dataset::default());
    env.store.fail_writes_to(Collection::People);

    let report = env
        .engine
        .import(chunked(archive), ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.status, ImportState::Failed);
    assert!(report.applied_collections.is_empty());
    assert_eq!(report.pending_collections.len(), 5);
    assert_eq!(env.store.batches_written(), 0);
    assert!(env.store.person("p1").is_none());
}
