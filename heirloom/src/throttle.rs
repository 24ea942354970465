//! Per-user rate limiting for export and import.
//!
//! The last time each user ran each operation lives in an injected
//! [`RateLedger`], so the bookkeeping survives restarts and can be shared by
//! several processes. The engine itself never consults it; callers check
//! before invoking an operation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Export,
    Import,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Export => "export",
            Operation::Import => "import",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted "last run" timestamps keyed by user and operation.
#[async_trait]
pub trait RateLedger: Send + Sync {
    async fn last_run(&self, user_id: &str, operation: Operation) -> Result<Option<DateTime<Utc>>>;

    async fn record_run(&self, user_id: &str, operation: Operation, at: DateTime<Utc>) -> Result<()>;
}

/// Process-local ledger.
#[derive(Default)]
pub struct MemoryRateLedger {
    entries: parking_lot::Mutex<HashMap<(String, Operation), DateTime<Utc>>>,
}

impl MemoryRateLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLedger for MemoryRateLedger {
    async fn last_run(&self, user_id: &str, operation: Operation) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .entries
            .lock()
            .get(&(user_id.to_string(), operation))
            .copied())
    }

    async fn record_run(&self, user_id: &str, operation: Operation, at: DateTime<Utc>) -> Result<()> {
        self.entries
            .lock()
            .insert((user_id.to_string(), operation), at);
        Ok(())
    }
}

/// SQLite-backed ledger
pub struct SqliteRateLedger {
    conn: Mutex<Connection>,
}

const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rate_limits (
    user_id    TEXT NOT NULL,
    operation  TEXT NOT NULL,
    last_at_ms INTEGER NOT NULL,
    PRIMARY KEY (user_id, operation)
)
"#;

impl SqliteRateLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute(LEDGER_SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory ledger (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(LEDGER_SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl RateLedger for SqliteRateLedger {
    async fn last_run(&self, user_id: &str, operation: Operation) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let millis: Option<i64> = conn
            .query_row(
                "SELECT last_at_ms FROM rate_limits WHERE user_id = ? AND operation = ?",
                params![user_id, operation.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    async fn record_run(&self, user_id: &str, operation: Operation, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO rate_limits (user_id, operation, last_at_ms) VALUES (?, ?, ?)
             ON CONFLICT(user_id, operation) DO UPDATE SET last_at_ms = excluded.last_at_ms",
            params![user_id, operation.as_str(), at.timestamp_millis()],
        )?;
        Ok(())
    }
}

/// Enforces a minimum interval between runs of the same operation by the
/// same user.
#[derive(Clone)]
pub struct RateLimiter {
    ledger: Arc<dyn RateLedger>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(ledger: Arc<dyn RateLedger>, config: RateLimitConfig) -> Self {
        Self { ledger, config }
    }

    fn interval(&self, operation: Operation) -> Duration {
        let secs = match operation {
            Operation::Export => self.config.export_interval_secs,
            Operation::Import => self.config.import_interval_secs,
        };
        Duration::seconds(secs.min(i64::MAX as u64) as i64)
    }

    /// `Error::RateLimited` if `user_id` ran `operation` too recently.
    pub async fn check(&self, user_id: &str, operation: Operation) -> Result<()> {
        self.check_at(user_id, operation, Utc::now()).await
    }

    pub async fn check_at(&self, user_id: &str, operation: Operation, now: DateTime<Utc>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let Some(last) = self.ledger.last_run(user_id, operation).await? else {
            return Ok(());
        };
        let next_allowed = last + self.interval(operation);
        if now < next_allowed {
            let wait = (next_allowed - now).num_milliseconds();
            // Round up so callers never retry a moment too early
            let retry_after_secs = ((wait + 999) / 1000).max(1) as u64;
            debug!(user = %user_id, operation = %operation, retry_after_secs, "Rate limited");
            return Err(Error::RateLimited {
                operation: operation.to_string(),
                retry_after_secs,
            });
        }
        Ok(())
    }

    pub async fn record(&self, user_id: &str, operation: Operation) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.ledger.record_run(user_id, operation, Utc::now()).await
    }

    /// Check, then record the run.
    pub async fn check_and_record(&self, user_id: &str, operation: Operation) -> Result<()> {
        self.check(user_id, operation).await?;
        self.record(user_id, operation).await
    }
}
