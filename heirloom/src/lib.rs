//! Backup, preview and restore for a family-tree dataset.
//!
//! An export is a `tar` + `zstd` archive holding a manifest, one JSON file
//! per collection and the photo tree. An archive can be previewed against
//! live state before anything is written, then imported with a `skip`,
//! `replace` or `merge` strategy, optionally behind a rollback snapshot.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use heirloom::{BackupEngine, ExportOptions, ImportOptions, Strategy};
//! # use heirloom::config::ArchiveConfig;
//! # use heirloom::store::MemoryStore;
//! # use heirloom_storage::LocalStorage;
//! # async fn example() -> heirloom::Result<()> {
//! let store = Arc::new(MemoryStore::new("home"));
//! let assets = Arc::new(LocalStorage::new("/var/lib/heirloom/assets"));
//! let engine = BackupEngine::new(store.clone(), assets, store, &ArchiveConfig::default());
//!
//! let (archive, _summary) = engine.export(ExportOptions::default()).read_to_end().await?;
//!
//! let chunks = || futures::stream::iter([Ok::<_, heirloom::Error>(archive.clone())]);
//! let preview = engine.validate(chunks()).await?;
//! if preview.valid {
//!     engine.import(chunks(), ImportOptions::with_strategy(Strategy::Merge)).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod import;
pub mod model;
pub mod snapshot;
pub mod store;
pub mod throttle;
pub mod validate;

pub use config::Config;
pub use engine::BackupEngine;
pub use error::{Error, Result};
pub use export::{ExportOptions, ExportStream, ExportSummary};
pub use import::{ImportOptions, ImportReport, ImportState, Strategy};
pub use validate::PreviewReport;
