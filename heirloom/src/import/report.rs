//! Import options, states and the report returned to callers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::model::Collection;

/// How an archived record is applied when its identifier already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Leave existing records untouched.
    #[default]
    Skip,
    /// Overwrite existing records with the archived version.
    Replace,
    /// Fill blank live fields from the archive; non-blank live values win.
    Merge,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Skip => write!(f, "skip"),
            Strategy::Replace => write!(f, "replace"),
            Strategy::Merge => write!(f, "merge"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(Strategy::Skip),
            "replace" | "overwrite" => Ok(Strategy::Replace),
            "merge" => Ok(Strategy::Merge),
            _ => Err(format!(
                "Invalid strategy '{}'. Use 'skip', 'replace' or 'merge'",
                s
            )),
        }
    }
}

/// Importer lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportState {
    #[default]
    Idle,
    RollbackSnapshotting,
    Applying,
    Completed,
    /// Some collections committed before a failure or cancellation.
    Partial,
    /// Nothing committed.
    Failed,
}

impl std::fmt::Display for ImportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImportState::Idle => "idle",
            ImportState::RollbackSnapshotting => "rollback-snapshotting",
            ImportState::Applying => "applying",
            ImportState::Completed => "completed",
            ImportState::Partial => "partial",
            ImportState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub strategy: Strategy,
    /// Persist a rollback snapshot of live state before mutating anything.
    pub create_backup_before_import: bool,
    pub import_photos: bool,
    pub import_audit_logs: bool,
    /// Restrict the import to these collections. `None` imports all.
    pub collections: Option<BTreeSet<Collection>>,
    /// Recorded as the user of the audit entry.
    pub actor: Option<String>,
    /// Checked before each collection batch.
    pub cancel: Option<CancellationToken>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Skip,
            create_backup_before_import: false,
            import_photos: true,
            import_audit_logs: false,
            collections: None,
            actor: None,
            cancel: None,
        }
    }
}

impl ImportOptions {
    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Re-run only the collections a previous import left pending.
    pub fn resume(mut self, previous: &ImportReport) -> Self {
        self.collections = Some(previous.pending_collections.iter().copied().collect());
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    pub(crate) fn selects(&self, collection: Collection) -> bool {
        self.collections
            .as_ref()
            .map_or(true, |set| set.contains(&collection))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCounts {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// `Completed`, `Partial` or `Failed`.
    pub status: ImportState,
    pub strategy: Strategy,
    pub collections: BTreeMap<Collection, ApplyCounts>,
    pub photos: ApplyCounts,
    /// Fully committed collections, in application order.
    pub applied_collections: Vec<Collection>,
    /// Selected collections that were not committed.
    pub pending_collections: Vec<Collection>,
    pub warnings: Vec<String>,
    pub rollback_snapshot_id: Option<String>,
    /// Why the import stopped early.
    pub error: Option<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportReport {
    pub(crate) fn new(strategy: Strategy, started_at: DateTime<Utc>) -> Self {
        Self {
            status: ImportState::Applying,
            strategy,
            collections: BTreeMap::new(),
            photos: ApplyCounts::default(),
            applied_collections: Vec::new(),
            pending_collections: Vec::new(),
            warnings: Vec::new(),
            rollback_snapshot_id: None,
            error: None,
            cancelled: false,
            started_at,
            finished_at: None,
        }
    }

    pub fn counts(&self, collection: Collection) -> ApplyCounts {
        self.collections
            .get(&collection)
            .copied()
            .unwrap_or_default()
    }
}
