//! SQLite-backed store

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    audit_entry_in_window, AuditEvent, AuditSink, DataStore, ImportLock, SnapshotQuery, WriteBatch,
};
use crate::error::{Error, Result};
use crate::model::{Collection, Dataset};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    collection  TEXT NOT NULL,
    id          TEXT NOT NULL,
    body        TEXT NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS meta (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS import_lock (
    slot         INTEGER PRIMARY KEY CHECK (slot = 1),
    holder       TEXT NOT NULL,
    acquired_at  INTEGER NOT NULL
);
"#;

/// A lock row older than this was left by a process that died mid-import.
const STALE_IMPORT_LOCK_SECS: i64 = 6 * 60 * 60;

/// Every collection lives in one `records` table as JSON bodies keyed by
/// `(collection, id)`. Audit entries appended through [`AuditSink`] land in
/// the `audit-logs` collection. The single row of `import_lock` marks an
/// import in progress from any process sharing the database file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    instance_id: String,
}

impl SqliteStore {
    /// Open (or create) the store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode + performance pragmas
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=-64000;
             PRAGMA temp_store=MEMORY;",
        )?;

        Self::init(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store=MEMORY;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;

        // The instance id is generated once and survives restarts
        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'instance_id'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let instance_id = match existing {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('instance_id', ?)",
                    params![&id],
                )?;
                id
            }
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            instance_id,
        })
    }

    /// Number of stored records in a collection.
    pub async fn count(&self, collection: Collection) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?",
            params![collection.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn release_import_lock(conn: Arc<Mutex<Connection>>, holder: String) {
    fn delete(conn: &Connection, holder: &str) {
        if let Err(e) = conn.execute(
            "DELETE FROM import_lock WHERE holder = ?",
            params![holder],
        ) {
            warn!(holder = %holder, error = %e, "Failed to release import lock");
        }
    }

    if let Ok(guard) = conn.try_lock() {
        delete(&guard, &holder);
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                let guard = conn.lock().await;
                delete(&guard, &holder);
            });
        }
        Err(_) => delete(&conn.blocking_lock(), &holder),
    }
}

fn load<T: DeserializeOwned>(conn: &Connection, collection: Collection) -> Result<Vec<T>> {
    let mut stmt =
        conn.prepare_cached("SELECT body FROM records WHERE collection = ? ORDER BY id")?;
    let bodies = stmt
        .query_map(params![collection.as_str()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(Error::from))
        .collect()
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn snapshot(&self, query: &SnapshotQuery) -> Result<Dataset> {
        let mut conn = self.conn.lock().await;

        // A read transaction keeps all collections at the same version
        let tx = conn.transaction()?;
        let audit_logs = if query.include_audit_logs {
            let all: Vec<crate::model::AuditLogEntry> = load(&tx, Collection::AuditLogs)?;
            Some(
                all.into_iter()
                    .filter(|e| audit_entry_in_window(e, query.audit_logs_since))
                    .collect(),
            )
        } else {
            None
        };
        let dataset = Dataset {
            people: load(&tx, Collection::People)?,
            relationships: load(&tx, Collection::Relationships)?,
            users: load(&tx, Collection::Users)?,
            suggestions: load(&tx, Collection::Suggestions)?,
            settings: load(&tx, Collection::Settings)?,
            audit_logs,
        };
        tx.commit()?;
        Ok(dataset)
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let collection = batch.collection();
        let rows = batch.rows()?;
        let now = chrono::Utc::now().timestamp();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO records (collection, id, body, updated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            )?;
            for (id, body) in &rows {
                stmt.execute(params![collection.as_str(), id, body, now])?;
            }
        }
        tx.commit()?;

        debug!(collection = %collection, records = rows.len(), "Committed batch");
        Ok(())
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn acquire_import_lock(&self) -> Result<ImportLock> {
        let holder = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let conn = self.conn.lock().await;
        let stale = conn.execute(
            "DELETE FROM import_lock WHERE acquired_at < ?",
            params![now - STALE_IMPORT_LOCK_SECS],
        )?;
        if stale > 0 {
            warn!("Removed stale import lock");
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO import_lock (slot, holder, acquired_at) VALUES (1, ?, ?)",
            params![&holder, now],
        )?;
        drop(conn);
        if inserted == 0 {
            return Err(Error::Concurrency);
        }

        debug!(holder = %holder, "Acquired import lock");
        let conn = self.conn.clone();
        Ok(ImportLock::new(move || release_import_lock(conn, holder)))
    }
}

#[async_trait]
impl AuditSink for SqliteStore {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        self.write_batch(WriteBatch::AuditLogs(vec![event.into_entry()]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Person, Setting};
    use tempfile::TempDir;

    fn person(id: &str, name: &str) -> Person {
        Person {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_write_and_snapshot() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .write_batch(WriteBatch::People(vec![
                person("p2", "John"),
                person("p1", "Jane"),
            ]))
            .await
            .unwrap();
        store
            .write_batch(WriteBatch::People(vec![person("p1", "Janet")]))
            .await
            .unwrap();

        let dataset = store.snapshot(&SnapshotQuery::default()).await.unwrap();
        let names: Vec<&str> = dataset.people.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Janet", "John"]);
        assert_eq!(store.count(Collection::People).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_instance_id_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store/heirloom.db");

        let first = SqliteStore::open(&path).unwrap();
        let id = first.instance_id().to_string();
        first
            .write_batch(WriteBatch::Settings(vec![Setting {
                key: "theme".into(),
                value: serde_json::json!("dark"),
            }]))
            .await
            .unwrap();
        drop(first);

        let second = SqliteStore::open(&path).unwrap();
        assert_eq!(second.instance_id(), id);
        let dataset = second.snapshot(&SnapshotQuery::default()).await.unwrap();
        assert_eq!(dataset.settings.len(), 1);
    }

    #[tokio::test]
    async fn test_audit_sink_appends_entries() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .append(AuditEvent::new(
                "backup.import",
                Some("admin".into()),
                serde_json::json!({"strategy": "merge"}),
            ))
            .await
            .unwrap();

        let dataset = store
            .snapshot(&SnapshotQuery {
                include_audit_logs: true,
                audit_logs_since: None,
            })
            .await
            .unwrap();
        let logs = dataset.audit_logs.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "backup.import");
        assert_eq!(logs[0].details["strategy"], "merge");
    }

    #[tokio::test]
    async fn test_import_lock_spans_connections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heirloom.db");
        let first = SqliteStore::open(&path).unwrap();
        let second = SqliteStore::open(&path).unwrap();

        let held = first.acquire_import_lock().await.unwrap();
        assert!(matches!(
            second.acquire_import_lock().await,
            Err(Error::Concurrency)
        ));
        assert!(matches!(
            first.acquire_import_lock().await,
            Err(Error::Concurrency)
        ));

        drop(held);
        let taken = second.acquire_import_lock().await.unwrap();
        drop(taken);
        assert!(first.acquire_import_lock().await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_import_lock_is_taken_over() {
        let store = SqliteStore::in_memory().unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO import_lock (slot, holder, acquired_at) VALUES (1, 'crashed', ?)",
                params![chrono::Utc::now().timestamp() - STALE_IMPORT_LOCK_SECS - 60],
            )
            .unwrap();
        }

        let held = store.acquire_import_lock().await.unwrap();
        assert!(matches!(
            store.acquire_import_lock().await,
            Err(Error::Concurrency)
        ));
        drop(held);
    }
}
