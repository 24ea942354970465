pub mod export;
pub mod import;
pub mod snapshots;
pub mod validate;

pub use export::{run_export, ExportFlags};
pub use import::{run_import, run_restore, ImportFlags};
pub use snapshots::{run_snapshots_delete, run_snapshots_list};
pub use validate::run_validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use heirloom::store::SqliteStore;
use heirloom::throttle::{Operation, RateLimiter, SqliteRateLedger};
use heirloom::{BackupEngine, Config};
use heirloom_storage::LocalStorage;
use tokio_util::io::ReaderStream;

/// Everything a command needs, opened once from the config.
pub struct Context {
    pub config: Config,
    pub engine: BackupEngine,
    pub limiter: RateLimiter,
    pub user: Option<String>,
}

impl Context {
    pub fn open(config: Config, user: Option<String>) -> Result<Self> {
        let store = Arc::new(
            SqliteStore::open(config.database_path()).context("Failed to open data store")?,
        );
        let assets = Arc::new(LocalStorage::new(config.assets_dir()));
        let engine = BackupEngine::new(store.clone(), assets, store, &config.archive);

        let ledger = Arc::new(
            SqliteRateLedger::open(config.rate_ledger_path())
                .context("Failed to open rate limit ledger")?,
        );
        let limiter = RateLimiter::new(ledger, config.rate_limit.clone());

        Ok(Self {
            config,
            engine,
            limiter,
            user,
        })
    }

    /// Fail if the acting user ran `operation` too recently. Anonymous runs
    /// are not limited.
    pub async fn check_rate(&self, operation: Operation) -> Result<()> {
        if let Some(user) = &self.user {
            self.limiter.check(user, operation).await?;
        }
        Ok(())
    }

    pub async fn record_run(&self, operation: Operation) -> Result<()> {
        if let Some(user) = &self.user {
            self.limiter.record(user, operation).await?;
        }
        Ok(())
    }
}

/// Stream an archive file from disk.
pub async fn open_archive(path: &Path) -> Result<ReaderStream<tokio::fs::File>> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Cannot open archive {}", path.display()))?;
    Ok(ReaderStream::new(file))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
