//! Preview report types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Collection, FieldDiff, Manifest};

/// How many archived records fall in each class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCounts {
    pub new: u64,
    pub identical: u64,
    pub conflicting: u64,
}

impl ClassCounts {
    pub fn total(&self) -> u64 {
        self.new + self.identical + self.conflicting
    }
}

/// An archived record whose live counterpart differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    /// Differing fields, in field table order.
    pub fields: Vec<FieldDiff>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPreview {
    pub counts: ClassCounts,
    /// Sorted by id.
    pub conflicts: Vec<Conflict>,
}

/// A reference to a person that exists neither in the archive nor live.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferentialWarning {
    /// `relationships` or `photos`
    pub section: String,
    pub record_id: String,
    pub field: String,
    pub missing_id: String,
}

impl std::fmt::Display for ReferentialWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: {} references unknown person {}",
            self.section, self.record_id, self.field, self.missing_id
        )
    }
}

/// Read-only classification of an archive against live state.
///
/// Every map is ordered and every list sorted, so the serialized report is
/// stable for unchanged inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReport {
    /// False when `errors` is non-empty. Import refuses invalid archives.
    pub valid: bool,
    pub manifest: Manifest,
    pub collections: BTreeMap<Collection, CollectionPreview>,
    pub photos: CollectionPreview,
    pub warnings: Vec<ReferentialWarning>,
    pub errors: Vec<String>,
}

impl PreviewReport {
    pub fn collection(&self, collection: Collection) -> Option<&CollectionPreview> {
        self.collections.get(&collection)
    }

    /// True when nothing in the archive is new or conflicting.
    pub fn is_identical(&self) -> bool {
        self.collections
            .values()
            .chain(std::iter::once(&self.photos))
            .all(|p| p.counts.new == 0 && p.counts.conflicting == 0)
    }
}
