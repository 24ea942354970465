use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Collection;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Schema versions this build can read.
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1];

/// Archive header, always the first entry (`manifest.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    pub source_instance: String,
    pub counts: BTreeMap<Collection, u64>,
    #[serde(default)]
    pub includes: Includes,
    /// SHA-256 (hex) of every `data/*.json` entry, keyed by entry path.
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

/// Optional sections present in an archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Includes {
    pub photos: bool,
    pub audit_logs: bool,
}

impl Manifest {
    pub fn new(source_instance: impl Into<String>, exported_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            exported_at,
            source_instance: source_instance.into(),
            counts: BTreeMap::new(),
            includes: Includes::default(),
            checksums: BTreeMap::new(),
        }
    }
}

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
