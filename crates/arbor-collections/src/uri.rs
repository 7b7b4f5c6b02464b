//! Normalized, segment-aware collection paths.
//!
//! Every collection lives under the root `/db`. Relative paths are resolved
//! against the root; `.` segments and duplicate slashes are dropped, and `..`
//! is rejected so that a path can never escape the tree.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DbError, Result};

/// Path of the root collection.
pub const ROOT_COLLECTION: &str = "/db";

/// An absolute, normalized collection path such as `/db/a/b`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Parses and normalizes a path.
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DbError::Syntax("empty collection path".to_string()));
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in trimmed.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(DbError::Syntax(format!(
                        "parent segments are not allowed in collection path {}",
                        raw
                    )))
                }
                s => segments.push(s),
            }
        }

        if !trimmed.starts_with('/') || segments.first() != Some(&"db") {
            segments.insert(0, "db");
        }

        Ok(CollectionPath(format!("/{}", segments.join("/"))))
    }

    /// The root collection path.
    pub fn root() -> Self {
        CollectionPath(ROOT_COLLECTION.to_string())
    }

    /// Returns the string form of the path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the root collection.
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_COLLECTION
    }

    /// Returns the parent path, or None for the root.
    pub fn parent(&self) -> Option<CollectionPath> {
        if self.is_root() {
            return None;
        }
        let idx = self.0.rfind('/')?;
        Some(CollectionPath(self.0[..idx].to_string()))
    }

    /// Returns the final segment of the path.
    pub fn last_segment(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Number of segments below the root (the root itself has depth 0).
    pub fn depth(&self) -> usize {
        self.0.matches('/').count() - 1
    }

    /// Appends a single child segment.
    pub fn append(&self, name: &str) -> Result<CollectionPath> {
        validate_name(name)?;
        Ok(CollectionPath(format!("{}/{}", self.0, name)))
    }

    /// Returns the full URI of a resource named `name` in this collection.
    pub fn resource_uri(&self, name: &str) -> String {
        format!("{}/{}", self.0, name)
    }

    /// Segment-wise prefix test: `/db/ab` does not start with `/db/a`.
    pub fn starts_with(&self, other: &CollectionPath) -> bool {
        self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/'))
    }

    /// Iterates the path segments, starting with `db`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validates a single resource or sub-collection name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DbError::Syntax("empty resource name".to_string()));
    }
    if name == "." || name == ".." {
        return Err(DbError::Syntax(format!("reserved resource name {}", name)));
    }
    if name.contains('/') {
        return Err(DbError::Syntax(format!(
            "resource name {} must not contain '/'",
            name
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(DbError::Syntax(format!(
            "resource name {:?} contains control characters",
            name
        )));
    }
    Ok(())
}
