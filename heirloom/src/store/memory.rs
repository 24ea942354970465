//! In-memory store, used by tests and embedders without persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{
    audit_entry_in_window, AuditEvent, AuditSink, DataStore, ImportLock, SnapshotQuery, WriteBatch,
};
use crate::error::{Error, Result};
use crate::model::{
    AuditLogEntry, Collection, Dataset, Entity, Person, Relationship, Setting, Suggestion, User,
};

#[derive(Default)]
struct Tables {
    people: BTreeMap<String, Person>,
    users: BTreeMap<String, User>,
    relationships: BTreeMap<String, Relationship>,
    suggestions: BTreeMap<String, Suggestion>,
    settings: BTreeMap<String, Setting>,
    audit_logs: BTreeMap<String, AuditLogEntry>,
}

fn upsert<E: Entity>(table: &mut BTreeMap<String, E>, records: Vec<E>) {
    for record in records {
        table.insert(record.id().to_string(), record);
    }
}

/// `DataStore` and `AuditSink` over `BTreeMap`s behind one lock, so every
/// snapshot is consistent.
pub struct MemoryStore {
    instance_id: String,
    tables: RwLock<Tables>,
    failing: Mutex<BTreeSet<Collection>>,
    fail_snapshot: AtomicBool,
    fail_audit: AtomicBool,
    batches_written: AtomicUsize,
    importing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            tables: RwLock::new(Tables::default()),
            failing: Mutex::new(BTreeSet::new()),
            fail_snapshot: AtomicBool::new(false),
            fail_audit: AtomicBool::new(false),
            batches_written: AtomicUsize::new(0),
            importing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A store pre-populated with `dataset`.
    pub fn with_dataset(instance_id: impl Into<String>, dataset: Dataset) -> Self {
        let store = Self::new(instance_id);
        store.seed(dataset);
        store
    }

    /// Upsert every record of `dataset` without counting batches or
    /// honouring injected failures.
    pub fn seed(&self, dataset: Dataset) {
        let mut tables = self.tables.write();
        upsert(&mut tables.people, dataset.people);
        upsert(&mut tables.users, dataset.users);
        upsert(&mut tables.relationships, dataset.relationships);
        upsert(&mut tables.suggestions, dataset.suggestions);
        upsert(&mut tables.settings, dataset.settings);
        upsert(&mut tables.audit_logs, dataset.audit_logs.unwrap_or_default());
    }

    /// Make every later `write_batch` for `collection` fail.
    pub fn fail_writes_to(&self, collection: Collection) {
        self.failing.lock().insert(collection);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
        self.fail_snapshot.store(false, Ordering::SeqCst);
        self.fail_audit.store(false, Ordering::SeqCst);
    }

    /// Make `snapshot` fail.
    pub fn fail_snapshots(&self) {
        self.fail_snapshot.store(true, Ordering::SeqCst);
    }

    /// Make `AuditSink::append` fail.
    pub fn fail_audit(&self) {
        self.fail_audit.store(true, Ordering::SeqCst);
    }

    /// Number of batches committed through `write_batch`.
    pub fn batches_written(&self) -> usize {
        self.batches_written.load(Ordering::SeqCst)
    }

    pub fn person(&self, id: &str) -> Option<Person> {
        self.tables.read().people.get(id).cloned()
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.tables.read().users.get(id).cloned()
    }

    pub fn relationship(&self, id: &str) -> Option<Relationship> {
        self.tables.read().relationships.get(id).cloned()
    }

    pub fn setting(&self, key: &str) -> Option<Setting> {
        self.tables.read().settings.get(key).cloned()
    }

    /// Audit entries ordered by creation time.
    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        let mut entries: Vec<_> = self.tables.read().audit_logs.values().cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    pub fn audit_entries_for(&self, action: &str) -> Vec<AuditLogEntry> {
        self.audit_entries()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn snapshot(&self, query: &SnapshotQuery) -> Result<Dataset> {
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return Err(Error::Store("snapshot read failed (injected)".to_string()));
        }
        let tables = self.tables.read();
        let audit_logs = query.include_audit_logs.then(|| {
            tables
                .audit_logs
                .values()
                .filter(|e| audit_entry_in_window(e, query.audit_logs_since))
                .cloned()
                .collect()
        });
        Ok(Dataset {
            people: tables.people.values().cloned().collect(),
            relationships: tables.relationships.values().cloned().collect(),
            users: tables.users.values().cloned().collect(),
            suggestions: tables.suggestions.values().cloned().collect(),
            settings: tables.settings.values().cloned().collect(),
            audit_logs,
        })
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let collection = batch.collection();
        if self.failing.lock().contains(&collection) {
            return Err(Error::Store(format!(
                "write to {} failed (injected)",
                collection
            )));
        }
        let mut tables = self.tables.write();
        match batch {
            WriteBatch::People(records) => upsert(&mut tables.people, records),
            WriteBatch::Users(records) => upsert(&mut tables.users, records),
            WriteBatch::Relationships(records) => upsert(&mut tables.relationships, records),
            WriteBatch::Suggestions(records) => upsert(&mut tables.suggestions, records),
            WriteBatch::Settings(records) => upsert(&mut tables.settings, records),
            WriteBatch::AuditLogs(records) => upsert(&mut tables.audit_logs, records),
        }
        self.batches_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn acquire_import_lock(&self) -> Result<ImportLock> {
        if self
            .importing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Concurrency);
        }
        let importing = self.importing.clone();
        Ok(ImportLock::new(move || importing.store(false, Ordering::SeqCst)))
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(Error::Store("audit append failed (injected)".to_string()));
        }
        let entry = event.into_entry();
        self.tables
            .write()
            .audit_logs
            .insert(entry.id.clone(), entry);
        Ok(())
    }
}
