//! Identifier types shared across the collection subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a collection, assigned by the persistence layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(i32);

impl CollectionId {
    /// Sentinel for a collection that has not been assigned an id yet.
    pub const UNKNOWN: CollectionId = CollectionId(-1);

    /// Creates a new CollectionId from a raw value.
    pub fn new(id: i32) -> Self {
        CollectionId(id)
    }

    /// Returns the raw value of this collection id.
    pub fn as_i32(&self) -> i32 {
        self.0
    }

    /// Returns true once the persistence layer has assigned an id.
    pub fn is_known(&self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Database-wide unique document identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(i32);

impl DocId {
    /// Sentinel for a document shell whose id has not been assigned.
    pub const UNKNOWN: DocId = DocId(-1);

    /// Creates a new DocId from a raw value.
    pub fn new(id: i32) -> Self {
        DocId(id)
    }

    /// Returns the raw value of this document id.
    pub fn as_i32(&self) -> i32 {
        self.0
    }

    /// Returns true if this is a real, assigned id.
    pub fn is_known(&self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a database user account.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(u32);

impl UserId {
    /// Creates a new UserId from a raw value.
    pub fn new(id: u32) -> Self {
        UserId(id)
    }

    /// Returns the raw value of this user id.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a database group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(u32);

impl GroupId {
    /// Creates a new GroupId from a raw value.
    pub fn new(id: u32) -> Self {
        GroupId(id)
    }

    /// Returns the raw value of this group id.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a database transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// Creates a new TxnId from a raw value.
    pub fn new(id: u64) -> Self {
        TxnId(id)
    }

    /// Returns the raw value of this transaction id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The logical holder of a lock. Locks are reentrant per owner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockOwner(u64);

impl LockOwner {
    /// Creates a new LockOwner from a raw value.
    pub const fn new(id: u64) -> Self {
        LockOwner(id)
    }

    /// Returns the raw value of this owner.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
