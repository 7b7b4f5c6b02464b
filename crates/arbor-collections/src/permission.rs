//! Owner/group/mode permissions with an optional ordered ACL.
//!
//! Mutators here do no locking of their own: callers hold the enclosing
//! collection's write lock (or own the value outright) while changing it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::acl::{Ace, AceAccess, AceTarget, Acl};
use crate::codec::{VariableByteInput, VariableByteOutput};
use crate::error::{DbError, Result};
use crate::mode;
use crate::subject::{SecurityManager, Subject};
use crate::types::{GroupId, UserId};

/// Permission state of a collection or document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    owner: UserId,
    group: GroupId,
    mode: u32,
    acl: Acl,
}

impl Permission {
    /// Creates a permission with an empty ACL.
    pub fn new(owner: UserId, group: GroupId, mode: u32) -> Self {
        Self {
            owner,
            group,
            mode: mode & mode::MODE_MASK,
            acl: Acl::new(),
        }
    }

    /// Permission for a resource created by `subject`: `base_mode & !umask`.
    pub fn for_subject(subject: &Subject, base_mode: u32) -> Self {
        Permission::new(
            subject.id(),
            subject.default_group(),
            base_mode & !subject.umask(),
        )
    }

    /// Owning user.
    pub fn owner(&self) -> UserId {
        self.owner
    }

    /// Owning group.
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Full mode including setuid/setgid/sticky bits.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// The owner's `rwx` triple.
    pub fn owner_mode(&self) -> u32 {
        (self.mode >> 6) & 0o7
    }

    /// The group's `rwx` triple.
    pub fn group_mode(&self) -> u32 {
        (self.mode >> 3) & 0o7
    }

    /// The `rwx` triple for everyone else.
    pub fn other_mode(&self) -> u32 {
        self.mode & 0o7
    }

    /// True if the setuid bit is set.
    pub fn is_set_uid(&self) -> bool {
        self.mode & mode::SET_UID != 0
    }

    /// True if the setgid bit is set.
    pub fn is_set_gid(&self) -> bool {
        self.mode & mode::SET_GID != 0
    }

    /// True if the sticky bit is set.
    pub fn is_sticky(&self) -> bool {
        self.mode & mode::STICKY != 0
    }

    /// Sets the raw mode bits. Bits above `0o7777` are discarded.
    pub fn set_mode(&mut self, bits: u32) {
        self.mode = bits & mode::MODE_MASK;
    }

    /// Applies a simple, unix or long symbolic mode string.
    pub fn set_mode_str(&mut self, s: &str) -> Result<()> {
        self.mode = mode::parse_mode(self.mode, s)?;
        Ok(())
    }

    /// Sets the owner without an authority check.
    pub fn set_owner(&mut self, owner: UserId) {
        self.owner = owner;
    }

    /// Sets the group without an authority check.
    pub fn set_group(&mut self, group: GroupId) {
        self.group = group;
    }

    fn check_owner_or_dba(&self, subject: &Subject, what: &str) -> Result<()> {
        if subject.has_dba_role() || subject.id() == self.owner {
            return Ok(());
        }
        Err(DbError::PermissionDenied(format!(
            "only the owner or a DBA may {}",
            what
        )))
    }

    /// chmod on behalf of `subject`: owner or DBA only.
    pub fn set_mode_checked(&mut self, subject: &Subject, bits: u32) -> Result<()> {
        self.check_owner_or_dba(subject, "change the mode")?;
        self.set_mode(bits);
        Ok(())
    }

    /// chown on behalf of `subject`: DBA only.
    pub fn set_owner_checked(&mut self, subject: &Subject, owner: UserId) -> Result<()> {
        if !subject.has_dba_role() {
            return Err(DbError::PermissionDenied(
                "only a DBA may change the owner".to_string(),
            ));
        }
        self.owner = owner;
        Ok(())
    }

    /// chgrp on behalf of `subject`: a DBA, or the owner moving the
    /// resource into one of their own groups.
    pub fn set_group_checked(&mut self, subject: &Subject, group: GroupId) -> Result<()> {
        self.check_owner_or_dba(subject, "change the group")?;
        if !subject.has_dba_role() && !subject.is_member_of(group) {
            return Err(DbError::PermissionDenied(format!(
                "{} is not a member of group {}",
                subject.name(),
                group
            )));
        }
        self.group = group;
        Ok(())
    }

    /// Returns whether `subject` holds every bit of `requested`.
    ///
    /// DBA subjects always pass. Otherwise ACL entries matching the subject
    /// are consulted in order: an ALLOW entry covering all requested bits
    /// grants, a DENY entry covering any requested bit refuses. When no
    /// entry decides, the owner, group or other triple is used, whichever
    /// class the subject falls into first.
    pub fn validate(&self, subject: &Subject, requested: u32) -> bool {
        if subject.has_dba_role() {
            return true;
        }
        let requested = requested & 0o7;

        for ace in self.acl.iter() {
            let matches = match ace.target {
                AceTarget::User => ace.principal == subject.id().as_u32(),
                AceTarget::Group => subject.is_member_of(GroupId::new(ace.principal)),
            };
            if !matches {
                continue;
            }
            match ace.access {
                AceAccess::Allowed if ace.mode & requested == requested => return true,
                AceAccess::Denied if ace.mode & requested != 0 => return false,
                _ => {}
            }
        }

        let granted = if subject.id() == self.owner {
            self.owner_mode()
        } else if subject.is_member_of(self.group) {
            self.group_mode()
        } else {
            self.other_mode()
        };
        granted & requested == requested
    }

    /// The ordered access control list.
    pub fn acl(&self) -> &Acl {
        &self.acl
    }

    /// Number of ACL entries.
    pub fn ace_count(&self) -> usize {
        self.acl.len()
    }

    /// Appends an ACE.
    pub fn add_ace(
        &mut self,
        access: AceAccess,
        target: AceTarget,
        principal: u32,
        mode: u32,
    ) -> Result<()> {
        self.acl.add(Ace::new(access, target, principal, mode)?);
        Ok(())
    }

    /// Appends an ACE naming its principal and mode textually, e.g.
    /// `("staff", "r-x")`.
    pub fn add_ace_by_name(
        &mut self,
        security: &dyn SecurityManager,
        access: AceAccess,
        target: AceTarget,
        name: &str,
        mode: &str,
    ) -> Result<()> {
        let principal = resolve_principal(security, target, name)?;
        let bits = mode::triple_from_str(mode)?;
        self.add_ace(access, target, principal, bits)
    }

    /// Inserts an ACE at `index`, shifting later entries up.
    pub fn insert_ace(
        &mut self,
        index: usize,
        access: AceAccess,
        target: AceTarget,
        principal: u32,
        mode: u32,
    ) -> Result<()> {
        self.acl
            .insert(index, Ace::new(access, target, principal, mode)?)
    }

    /// Changes only the access type and mode of the ACE at `index`.
    pub fn modify_ace(&mut self, index: usize, access: AceAccess, mode: u32) -> Result<()> {
        self.acl.modify(index, access, mode)
    }

    /// Removes the ACE at `index`, shifting later entries down.
    pub fn remove_ace(&mut self, index: usize) -> Result<Ace> {
        self.acl.remove(index)
    }

    /// Removes every ACL entry.
    pub fn clear_acl(&mut self) {
        self.acl.clear();
    }

    /// Writes owner, group, mode and the ACL entries.
    pub fn write_to(&self, out: &mut VariableByteOutput) {
        out.write_int(self.owner.as_u32() as i32);
        out.write_int(self.group.as_u32() as i32);
        out.write_int(self.mode as i32);
        out.write_int(self.acl.len() as i32);
        for ace in self.acl.iter() {
            out.write_byte(match ace.access {
                AceAccess::Allowed => 0,
                AceAccess::Denied => 1,
            });
            out.write_byte(match ace.target {
                AceTarget::User => 0,
                AceTarget::Group => 1,
            });
            out.write_int(ace.principal as i32);
            out.write_byte(ace.mode as u8);
        }
    }

    /// Reads a permission written by [`Permission::write_to`].
    pub fn read_from(input: &mut VariableByteInput) -> Result<Self> {
        let owner = UserId::new(input.read_int()? as u32);
        let group = GroupId::new(input.read_int()? as u32);
        let raw_mode = input.read_int()? as u32;
        if raw_mode > mode::MODE_MASK {
            return Err(DbError::Codec(format!("invalid mode {:o}", raw_mode)));
        }
        let count = input.read_int()?;
        if count < 0 {
            return Err(DbError::Codec(format!("invalid ACE count {}", count)));
        }

        let mut permission = Permission::new(owner, group, raw_mode);
        for _ in 0..count {
            let access = match input.read_byte()? {
                0 => AceAccess::Allowed,
                1 => AceAccess::Denied,
                other => return Err(DbError::Codec(format!("invalid ACE access {}", other))),
            };
            let target = match input.read_byte()? {
                0 => AceTarget::User,
                1 => AceTarget::Group,
                other => return Err(DbError::Codec(format!("invalid ACE target {}", other))),
            };
            let principal = input.read_int()? as u32;
            let bits = input.read_byte()? as u32;
            let ace = Ace::new(access, target, principal, bits)
                .map_err(|e| DbError::Codec(e.to_string()))?;
            permission.acl.add(ace);
        }
        Ok(permission)
    }
}

fn resolve_principal(security: &dyn SecurityManager, target: AceTarget, name: &str) -> Result<u32> {
    match target {
        AceTarget::User => security
            .user_id(name)
            .map(|id| id.as_u32())
            .ok_or_else(|| DbError::NotFound(format!("user {}", name))),
        AceTarget::Group => security
            .group_id(name)
            .map(|id| id.as_u32())
            .ok_or_else(|| DbError::NotFound(format!("group {}", name))),
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&mode::mode_to_simple_symbolic(self.mode))?;
        if !self.acl.is_empty() {
            f.write_str("+")?;
        }
        Ok(())
    }
}
