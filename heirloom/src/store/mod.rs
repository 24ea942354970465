//! Live data store interface and backends.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::model::{
    AuditLogEntry, Collection, Dataset, Person, Relationship, Setting, Suggestion, User,
};

/// What [`DataStore::snapshot`] should read.
#[derive(Debug, Clone, Default)]
pub struct SnapshotQuery {
    pub include_audit_logs: bool,
    /// Only audit entries created at or after this instant. `None` reads all.
    pub audit_logs_since: Option<DateTime<Utc>>,
}

/// Records to upsert into one collection. Each batch is applied atomically.
#[derive(Debug, Clone)]
pub enum WriteBatch {
    People(Vec<Person>),
    Users(Vec<User>),
    Relationships(Vec<Relationship>),
    Suggestions(Vec<Suggestion>),
    Settings(Vec<Setting>),
    AuditLogs(Vec<AuditLogEntry>),
}

impl WriteBatch {
    pub fn collection(&self) -> Collection {
        match self {
            WriteBatch::People(_) => Collection::People,
            WriteBatch::Users(_) => Collection::Users,
            WriteBatch::Relationships(_) => Collection::Relationships,
            WriteBatch::Suggestions(_) => Collection::Suggestions,
            WriteBatch::Settings(_) => Collection::Settings,
            WriteBatch::AuditLogs(_) => Collection::AuditLogs,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WriteBatch::People(v) => v.len(),
            WriteBatch::Users(v) => v.len(),
            WriteBatch::Relationships(v) => v.len(),
            WriteBatch::Suggestions(v) => v.len(),
            WriteBatch::Settings(v) => v.len(),
            WriteBatch::AuditLogs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(id, json body)` pairs for key/value backends.
    pub fn rows(&self) -> serde_json::Result<Vec<(String, String)>> {
        fn encode<T: serde::Serialize>(
            items: &[T],
            id: impl Fn(&T) -> &str,
        ) -> serde_json::Result<Vec<(String, String)>> {
            items
                .iter()
                .map(|item| Ok((id(item).to_string(), serde_json::to_string(item)?)))
                .collect()
        }
        match self {
            WriteBatch::People(v) => encode(v, |r| r.id.as_str()),
            WriteBatch::Users(v) => encode(v, |r| r.id.as_str()),
            WriteBatch::Relationships(v) => encode(v, |r| r.id.as_str()),
            WriteBatch::Suggestions(v) => encode(v, |r| r.id.as_str()),
            WriteBatch::Settings(v) => encode(v, |r| r.key.as_str()),
            WriteBatch::AuditLogs(v) => encode(v, |r| r.id.as_str()),
        }
    }
}

/// Read/write access to the live dataset.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// One consistent read of every collection.
    async fn snapshot(&self, query: &SnapshotQuery) -> Result<Dataset>;

    /// Insert or overwrite the batch's records by identifier, all or nothing.
    async fn write_batch(&self, batch: WriteBatch) -> Result<()>;

    /// Stable identifier of this installation, recorded in manifests.
    fn instance_id(&self) -> &str;

    /// Claim the store's single import slot. Fails with
    /// [`Error::Concurrency`](crate::Error::Concurrency) while another
    /// holder, in this process or another, has not dropped its lock.
    async fn acquire_import_lock(&self) -> Result<ImportLock>;
}

/// Exclusive right to import into one store, released on drop.
pub struct ImportLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ImportLock {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for ImportLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ImportLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportLock")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// One audit log entry to append.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: String,
    pub user_id: Option<String>,
    pub details: Value,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, user_id: Option<String>, details: Value) -> Self {
        Self {
            action: action.into(),
            user_id,
            details,
            at: Utc::now(),
        }
    }

    pub fn into_entry(self) -> AuditLogEntry {
        AuditLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: self.user_id,
            action: self.action,
            entity_type: Some("backup".to_string()),
            entity_id: None,
            details: self.details,
            created_at: self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Receives one entry per export and per import.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<()>;
}

/// Whether an audit entry falls inside the requested window. Entries whose
/// timestamp cannot be parsed are kept.
pub(crate) fn audit_entry_in_window(entry: &AuditLogEntry, since: Option<DateTime<Utc>>) -> bool {
    match since {
        None => true,
        Some(since) => match DateTime::parse_from_rfc3339(&entry.created_at) {
            Ok(at) => at.with_timezone(&Utc) >= since,
            Err(_) => true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_batch_rows_use_identifier() {
        let batch = WriteBatch::Settings(vec![Setting {
            key: "theme".into(),
            value: serde_json::json!("dark"),
        }]);
        let rows = batch.rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "theme");
        assert_eq!(batch.collection(), Collection::Settings);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_audit_window() {
        let now = Utc::now();
        let recent = AuditEvent::new("x", None, Value::Null).into_entry();
        let mut old = recent.clone();
        old.created_at = (now - Duration::days(200)).to_rfc3339();
        let mut garbled = recent.clone();
        garbled.created_at = "sometime".into();

        let since = Some(now - Duration::days(90));
        assert!(audit_entry_in_window(&recent, since));
        assert!(!audit_entry_in_window(&old, since));
        assert!(audit_entry_in_window(&garbled, since));
        assert!(audit_entry_in_window(&old, None));
    }
}
