//! Error types for the collection subsystem.

use thiserror::Error;

/// Errors raised by collection, permission, locking and ingestion operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// A permission or ACL check failed, or the database is read-only.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A lock could not be acquired or released.
    #[error("lock error: {0}")]
    Lock(String),

    /// A malformed mode string or resource name.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// An ACE index outside the valid range for the operation.
    #[error("ACE index {index} out of range for ACL of length {len}")]
    IndexOutOfRange {
        /// The offending index
        index: usize,
        /// Number of entries in the ACL
        len: usize,
    },

    /// A malformed or conflicting collection configuration document.
    #[error("collection configuration error: {0}")]
    CollectionConfiguration(String),

    /// Raised by trigger code.
    #[error("trigger error: {0}")]
    Trigger(String),

    /// A naming conflict, e.g. a document named like an existing sub-collection.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A principal, collection or document that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A malformed persisted byte stream.
    #[error("codec error: {0}")]
    Codec(String),

    /// The storage backend or indexer reported a failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A lower-level I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Returns true for the permission-denied class of failures.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DbError::PermissionDenied(_))
    }
}
