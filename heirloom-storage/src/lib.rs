//! Asset and snapshot storage for Heirloom.
//!
//! This crate provides the `AssetStorage` trait the backup engine uses for
//! every binary object it touches: person photos (read on export, written on
//! import) and persisted rollback snapshots.
//!
//! # Storage Paths
//!
//! All data is organized using hierarchical [`StoragePath`]s:
//!
//! ```text
//! area/[owner/]name
//!
//! photos/p-102/portrait.jpg
//! snapshots/rollback-20240101T120000Z-1a2b3c4d.tar.zst
//! ```
//!
//! Every component is checked with [`sanitize_component`] before a backend
//! touches the medium, so names taken from an untrusted archive can never
//! resolve outside the storage root.
//!
//! # Quick Start
//!
//! ```no_run
//! use heirloom_storage::{AssetStorage, LocalStorage, StoragePath};
//! use bytes::Bytes;
//!
//! # async fn example() -> heirloom_storage::Result<()> {
//! let storage = LocalStorage::new("./data/assets");
//!
//! let path = StoragePath::photo("p-102", "portrait.jpg");
//! storage.write(&path, Bytes::from("jpeg bytes")).await?;
//!
//! let data = storage.read(&path).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod local;
mod path;
mod traits;

pub use error::{Result, StorageError};
pub use local::LocalStorage;
pub use path::{sanitize_component, StorageArea, StoragePath, MAX_COMPONENT_LEN};
pub use traits::{AssetStorage, ByteStream, ObjectMeta};

// Re-export bytes for convenience
pub use bytes::Bytes;
