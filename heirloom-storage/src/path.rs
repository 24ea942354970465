//! Hierarchical storage paths for Heirloom assets.
//!
//! Storage paths follow the pattern: `area/[owner/]name`
//!
//! # Examples
//!
//! ```
//! use heirloom_storage::{StoragePath, StorageArea};
//!
//! // A person's photo
//! let path = StoragePath::photo("p-102", "portrait.jpg");
//! assert_eq!(path.to_string(), "photos/p-102/portrait.jpg");
//!
//! // A rollback snapshot
//! let path = StoragePath::snapshot("rollback-20240101T000000Z-1a2b3c4d.tar.zst");
//! assert_eq!(path.area, StorageArea::Snapshots);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, StorageError};

/// Longest accepted single path component, in bytes.
pub const MAX_COMPONENT_LEN: usize = 255;

/// Top-level area a stored object lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    /// Person photos, grouped by person identifier
    Photos,
    /// Persisted archive snapshots (rollback points)
    Snapshots,
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageArea::Photos => write!(f, "photos"),
            StorageArea::Snapshots => write!(f, "snapshots"),
        }
    }
}

impl StorageArea {
    /// Parse area from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photos" => Some(StorageArea::Photos),
            "snapshots" => Some(StorageArea::Snapshots),
            _ => None,
        }
    }
}

/// Check that `component` is safe to use as a single path segment.
///
/// Rejects empty names, `.` and `..`, separators (`/`, `\`), drive markers,
/// NUL and other control characters, and names longer than
/// [`MAX_COMPONENT_LEN`]. Every name that passes resolves to exactly one
/// child of whatever directory it is joined onto.
pub fn sanitize_component(component: &str) -> Result<&str> {
    let reason = if component.is_empty() {
        Some("empty path component")
    } else if component == "." || component == ".." {
        Some("relative path component")
    } else if component.len() > MAX_COMPONENT_LEN {
        Some("path component too long")
    } else if component
        .chars()
        .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
    {
        Some("forbidden character in path component")
    } else {
        None
    };

    if let Some(reason) = reason {
        return Err(StorageError::InvalidPath(format!(
            "{:?}: {}",
            component, reason
        )));
    }

    Ok(component)
}

/// Hierarchical path for storage operations.
///
/// Format: `area/[owner/]name`. An empty `name` denotes a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoragePath {
    /// Top-level area
    pub area: StorageArea,
    /// Owning record (the person id for photos)
    pub owner: Option<String>,
    /// Object name (original filename for photos)
    pub name: String,
}

impl StoragePath {
    /// Create a prefix path covering a whole area.
    pub fn new(area: StorageArea) -> Self {
        Self {
            area,
            owner: None,
            name: String::new(),
        }
    }

    /// Add owner to path.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Add object name to path.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Create path for a person's photo.
    pub fn photo(person_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            area: StorageArea::Photos,
            owner: Some(person_id.into()),
            name: filename.into(),
        }
    }

    /// Create path for a persisted snapshot.
    pub fn snapshot(name: impl Into<String>) -> Self {
        Self {
            area: StorageArea::Snapshots,
            owner: None,
            name: name.into(),
        }
    }

    /// Check every component with [`sanitize_component`].
    pub fn validate(&self) -> Result<()> {
        if let Some(owner) = &self.owner {
            sanitize_component(owner)?;
        }
        if !self.name.is_empty() {
            sanitize_component(&self.name)?;
        }
        Ok(())
    }

    /// Convert to filesystem path.
    pub fn to_path_buf(&self, base: &std::path::Path) -> PathBuf {
        let mut path = base.join(self.area.to_string());
        if let Some(owner) = &self.owner {
            path = path.join(owner);
        }
        if !self.name.is_empty() {
            path = path.join(&self.name);
        }
        path
    }

    /// Parse from string representation.
    ///
    /// Returns `None` for unknown areas, wrong depth or unsafe components.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let area = StorageArea::parse(parts.first()?)?;

        let path = match (area, parts.len()) {
            (StorageArea::Photos, 3) => StoragePath::photo(parts[1], parts[2]),
            (StorageArea::Snapshots, 2) => StoragePath::snapshot(parts[1]),
            _ => return None,
        };

        path.validate().ok()?;
        Some(path)
    }

    /// Check if this path is a directory prefix (no name).
    pub fn is_prefix(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.area)?;
        if let Some(owner) = &self.owner {
            write!(f, "/{}", owner)?;
        }
        if !self.name.is_empty() {
            write!(f, "/{}", self.name)?;
        }
        Ok(())
    }
}
