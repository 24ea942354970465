//! Archive codec: a `tar` stream compressed with `zstd`.
//!
//! Layout, in write order:
//!
//! ```text
//! manifest.json
//! data/people.json
//! data/relationships.json
//! data/users.json
//! data/suggestions.json
//! data/settings.json
//! data/audit-logs.json                     optional
//! photos/<personId>/<originalFilename>     optional
//! ```
//!
//! The manifest records a SHA-256 for every `data/*.json` entry; decoding
//! fails on any mismatch. Decoding also enforces compressed and
//! decompressed size ceilings and rejects entry paths that are absolute,
//! contain `..`, or are not regular files.

mod reader;
mod writer;

pub use reader::{decode, decode_bytes, DecodeLimits, ParsedArchive, PhotoAsset};
pub use writer::{ArchiveWriter, MANIFEST_PATH};

use crate::model::Collection;

/// Order in which data files are written.
pub const DATA_LAYOUT: [Collection; 6] = [
    Collection::People,
    Collection::Relationships,
    Collection::Users,
    Collection::Suggestions,
    Collection::Settings,
    Collection::AuditLogs,
];

/// Suggested file extension.
pub const FILE_EXTENSION: &str = "tar.zst";
