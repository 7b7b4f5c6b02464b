//! Ordered access control lists.
//!
//! Entries are evaluated in order and the first entry matching the subject
//! decides. Insert and remove shift the indices of every later entry.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DbError, Result};
use crate::mode;

/// Whether an entry grants or refuses the bits it names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AceAccess {
    /// Grants the entry's mode bits.
    Allowed,
    /// Refuses the entry's mode bits.
    Denied,
}

/// The kind of principal an entry applies to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AceTarget {
    /// Matches a single user by id.
    User,
    /// Matches every member of a group.
    Group,
}

/// A single access control entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    /// Allow or deny.
    pub access: AceAccess,
    /// User or group entry.
    pub target: AceTarget,
    /// Raw user or group id, depending on `target`.
    pub principal: u32,
    /// `rwx` bits (0..=7).
    pub mode: u32,
}

impl Ace {
    /// Creates an entry, rejecting modes wider than one triple.
    pub fn new(access: AceAccess, target: AceTarget, principal: u32, mode: u32) -> Result<Self> {
        check_ace_mode(mode)?;
        Ok(Self {
            access,
            target,
            principal,
            mode,
        })
    }

    /// Renders the entry's mode as `rwx`.
    pub fn mode_string(&self) -> String {
        mode::triple_to_string(self.mode)
    }
}

impl fmt::Display for Ace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = match self.access {
            AceAccess::Allowed => "ALLOWED",
            AceAccess::Denied => "DENIED",
        };
        let target = match self.target {
            AceTarget::User => "USER",
            AceTarget::Group => "GROUP",
        };
        write!(f, "{} {} {} {}", target, self.principal, access, self.mode_string())
    }
}

fn check_ace_mode(mode: u32) -> Result<()> {
    if mode > 0o7 {
        return Err(DbError::Syntax(format!(
            "ACE mode {:o} must fit in a single rwx triple",
            mode
        )));
    }
    Ok(())
}

/// An ordered list of access control entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    entries: Vec<Ace>,
}

impl Acl {
    /// Creates an empty ACL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the ACL has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: usize) -> Option<&Ace> {
        self.entries.get(index)
    }

    /// Iterates entries in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Ace> {
        self.entries.iter()
    }

    /// Appends an entry.
    pub fn add(&mut self, ace: Ace) {
        self.entries.push(ace);
    }

    /// Inserts an entry at `index` in `[0, len]`.
    pub fn insert(&mut self, index: usize, ace: Ace) -> Result<()> {
        if index > self.entries.len() {
            return Err(DbError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        self.entries.insert(index, ace);
        Ok(())
    }

    /// Changes the access type and mode of the entry at `index` in `[0, len)`.
    pub fn modify(&mut self, index: usize, access: AceAccess, mode: u32) -> Result<()> {
        check_ace_mode(mode)?;
        let len = self.entries.len();
        let ace = self
            .entries
            .get_mut(index)
            .ok_or(DbError::IndexOutOfRange { index, len })?;
        ace.access = access;
        ace.mode = mode;
        Ok(())
    }

    /// Removes and returns the entry at `index` in `[0, len)`.
    pub fn remove(&mut self, index: usize) -> Result<Ace> {
        if index >= self.entries.len() {
            return Err(DbError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        Ok(self.entries.remove(index))
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
