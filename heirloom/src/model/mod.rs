//! Data model shared by the codec, exporter, validator and importer.

pub mod dataset;
pub mod entity;
pub mod manifest;
pub mod records;

use serde::{Deserialize, Serialize};

pub use dataset::Dataset;
pub use entity::{Blank, Comparator, Entity, FieldDiff, FieldSpec};
pub use manifest::{sha256_hex, Includes, Manifest, SCHEMA_VERSION, SUPPORTED_SCHEMA_VERSIONS};
pub use records::{AuditLogEntry, Person, Relationship, Setting, Suggestion, User};

/// An exported collection.
///
/// Declaration order is the import application order: people and users are
/// written before the relationships and suggestions that reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Collection {
    People,
    Users,
    Relationships,
    Suggestions,
    Settings,
    AuditLogs,
}

impl Collection {
    /// All collections in application order.
    pub const ALL: [Collection; 6] = [
        Collection::People,
        Collection::Users,
        Collection::Relationships,
        Collection::Suggestions,
        Collection::Settings,
        Collection::AuditLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::People => "people",
            Collection::Users => "users",
            Collection::Relationships => "relationships",
            Collection::Suggestions => "suggestions",
            Collection::Settings => "settings",
            Collection::AuditLogs => "audit-logs",
        }
    }

    /// Whether the collection may be absent from an archive.
    pub fn is_optional(&self) -> bool {
        matches!(self, Collection::AuditLogs)
    }

    /// Entry path inside the archive, e.g. `data/people.json`.
    pub fn data_path(&self) -> String {
        format!("data/{}.json", self.as_str())
    }

    pub fn from_data_path(path: &str) -> Option<Self> {
        let name = path.strip_prefix("data/")?.strip_suffix(".json")?;
        name.parse().ok()
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "people" => Ok(Collection::People),
            "users" => Ok(Collection::Users),
            "relationships" => Ok(Collection::Relationships),
            "suggestions" => Ok(Collection::Suggestions),
            "settings" => Ok(Collection::Settings),
            "audit-logs" | "audit_logs" => Ok(Collection::AuditLogs),
            _ => Err(format!(
                "Invalid collection '{}'. Use one of: people, users, relationships, suggestions, settings, audit-logs",
                s
            )),
        }
    }
}
