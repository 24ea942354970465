use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Corrupt or unreadable archive, unsafe entry path, or size ceiling exceeded.
    #[error("Archive format error: {0}")]
    Format(String),

    #[error("Unsupported archive schema version {found} (supported: {supported:?})")]
    Version { found: u64, supported: Vec<u32> },

    #[error("An import is already in progress for this store")]
    Concurrency,

    #[error("Rollback snapshot failed: {0}")]
    RollbackSnapshot(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Rate limited: {operation} allowed again in {retry_after_secs}s")]
    RateLimited {
        operation: String,
        retry_after_secs: u64,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Storage error: {0}")]
    Storage(#[from] heirloom_storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
