//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use heirloom::config::ArchiveConfig;
use heirloom::model::{Dataset, Person, Relationship, Setting, Suggestion, User};
use heirloom::store::{
    AuditEvent, AuditSink, DataStore, ImportLock, MemoryStore, SnapshotQuery, WriteBatch,
};
use heirloom::{BackupEngine, Error, ExportOptions};
use heirloom_storage::{
    AssetStorage, LocalStorage, ObjectMeta, StorageArea, StorageError, StoragePath,
};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

pub fn person(id: &str, name: &str) -> Person {
    Person {
        id: id.into(),
        name: name.into(),
        ..Default::default()
    }
}

pub fn relationship(id: &str, a: &str, b: &str) -> Relationship {
    Relationship {
        id: id.into(),
        person_id: a.into(),
        related_person_id: b.into(),
        kind: "spouse".into(),
        ..Default::default()
    }
}

/// Two people, married, with one user, a suggestion and a setting.
pub fn family() -> Dataset {
    Dataset {
        people: vec![
            Person {
                surname: Some("Doe".into()),
                birth_date: Some("1950-04-02".into()),
                ..person("p1", "Jane")
            },
            Person {
                surname: Some("Doe".into()),
                ..person("p2", "John")
            },
        ],
        relationships: vec![relationship("r1", "p1", "p2")],
        users: vec![User {
            id: "u1".into(),
            username: "jane".into(),
            email: Some("jane@example.org".into()),
            role: "admin".into(),
            person_id: Some("p1".into()),
            ..Default::default()
        }],
        suggestions: vec![Suggestion {
            id: "s1".into(),
            person_id: Some("p2".into()),
            submitted_by: Some("u1".into()),
            kind: "edit".into(),
            payload: json!({ "profession": "Carpenter" }),
            status: "pending".into(),
            ..Default::default()
        }],
        settings: vec![Setting {
            key: "site.title".into(),
            value: json!("The Doe Family"),
        }],
        audit_logs: None,
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// An engine over a `MemoryStore` and on-disk asset storage.
pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub assets: Arc<FlakyStorage>,
    pub engine: BackupEngine,
}

impl TestEnv {
    pub fn new(instance: &str, dataset: Dataset) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::with_dataset(instance, dataset));
        let assets = Arc::new(FlakyStorage::new(LocalStorage::new(dir.path())));
        let engine = BackupEngine::new(
            store.clone(),
            assets.clone(),
            store.clone(),
            &ArchiveConfig::default(),
        );
        Self {
            dir,
            store,
            assets,
            engine,
        }
    }

    pub async fn put_photo(&self, person_id: &str, filename: &str, data: &'static [u8]) {
        self.assets
            .write(
                &StoragePath::photo(person_id, filename),
                Bytes::from_static(data),
            )
            .await
            .unwrap();
    }

    pub async fn photo(&self, person_id: &str, filename: &str) -> Option<Vec<u8>> {
        self.assets
            .read(&StoragePath::photo(person_id, filename))
            .await
            .ok()
            .map(|data| data.to_vec())
    }

    pub async fn export(&self, options: ExportOptions) -> Bytes {
        let (bytes, _) = self.engine.export(options).read_to_end().await.unwrap();
        bytes
    }
}

/// Feed `bytes` as a stream in small chunks.
pub fn chunked(bytes: Bytes) -> impl Stream<Item = Result<Bytes, Error>> + Send {
    let chunks: Vec<Result<Bytes, Error>> = bytes
        .chunks(1024)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures::stream::iter(chunks)
}

// ---------------------------------------------------------------------------
// Failure injection
// ---------------------------------------------------------------------------

/// `LocalStorage` with injectable read and write failures.
pub struct FlakyStorage {
    inner: LocalStorage,
    unreadable: Mutex<BTreeSet<String>>,
    read_only: Mutex<BTreeSet<StorageArea>>,
}

impl FlakyStorage {
    pub fn new(inner: LocalStorage) -> Self {
        Self {
            inner,
            unreadable: Mutex::new(BTreeSet::new()),
            read_only: Mutex::new(BTreeSet::new()),
        }
    }

    /// Reads of `path` fail with a permission error.
    pub fn make_unreadable(&self, path: &StoragePath) {
        self.unreadable.lock().insert(path.to_string());
    }

    /// Writes anywhere in `area` fail.
    pub fn make_read_only(&self, area: StorageArea) {
        self.read_only.lock().insert(area);
    }
}

#[async_trait]
impl AssetStorage for FlakyStorage {
    async fn write(&self, path: &StoragePath, data: Bytes) -> heirloom_storage::Result<()> {
        if self.read_only.lock().contains(&path.area) {
            return Err(StorageError::PermissionDenied(path.to_string()));
        }
        self.inner.write(path, data).await
    }

    async fn read(&self, path: &StoragePath) -> heirloom_storage::Result<Bytes> {
        if self.unreadable.lock().contains(&path.to_string()) {
            return Err(StorageError::PermissionDenied(path.to_string()));
        }
        self.inner.read(path).await
    }

    async fn exists(&self, path: &StoragePath) -> heirloom_storage::Result<bool> {
        self.inner.exists(path).await
    }

    async fn delete(&self, path: &StoragePath) -> heirloom_storage::Result<()> {
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &StoragePath) -> heirloom_storage::Result<Vec<ObjectMeta>> {
        self.inner.list(prefix).await
    }

    async fn head(&self, path: &StoragePath) -> heirloom_storage::Result<ObjectMeta> {
        self.inner.head(path).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// A store whose next `snapshot` parks until released.
pub struct GatedStore {
    pub inner: MemoryStore,
    armed: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl DataStore for GatedStore {
    async fn snapshot(&self, query: &SnapshotQuery) -> heirloom::Result<Dataset> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.snapshot(query).await
    }

    async fn write_batch(&self, batch: WriteBatch) -> heirloom::Result<()> {
        self.inner.write_batch(batch).await
    }

    fn instance_id(&self) -> &str {
        self.inner.instance_id()
    }

    async fn acquire_import_lock(&self) -> heirloom::Result<ImportLock> {
        self.inner.acquire_import_lock().await
    }
}

#[async_trait]
impl AuditSink for GatedStore {
    async fn append(&self, event: AuditEvent) -> heirloom::Result<()> {
        self.inner.append(event).await
    }
}
