//! Acting identities and principal lookup.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::{GroupId, UserId};

/// The authenticated identity an operation runs as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    id: UserId,
    name: String,
    groups: Vec<GroupId>,
    dba: bool,
    umask: u32,
}

impl Subject {
    /// Creates a subject with a primary group and the default umask `022`.
    pub fn new(id: UserId, name: impl Into<String>, primary_group: GroupId) -> Self {
        Self {
            id,
            name: name.into(),
            groups: vec![primary_group],
            dba: false,
            umask: 0o022,
        }
    }

    /// The database system account: id 0, DBA role.
    pub fn system() -> Self {
        Subject::new(UserId::new(0), "SYSTEM", GroupId::new(0)).with_dba(true)
    }

    /// Adds supplementary groups.
    pub fn with_groups(mut self, groups: impl IntoIterator<Item = GroupId>) -> Self {
        for g in groups {
            if !self.groups.contains(&g) {
                self.groups.push(g);
            }
        }
        self
    }

    /// Sets the DBA role flag.
    pub fn with_dba(mut self, dba: bool) -> Self {
        self.dba = dba;
        self
    }

    /// Sets the umask applied to default permissions.
    pub fn with_umask(mut self, umask: u32) -> Self {
        self.umask = umask & 0o777;
        self
    }

    /// User id.
    pub fn id(&self) -> UserId {
        self.id
    }

    /// User name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The primary group, used as the group of newly created resources.
    pub fn default_group(&self) -> GroupId {
        self.groups[0]
    }

    /// Every group the subject belongs to, primary group first.
    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    /// DBA subjects bypass every permission check.
    pub fn has_dba_role(&self) -> bool {
        self.dba
    }

    /// True if the subject belongs to `group`.
    pub fn is_member_of(&self, group: GroupId) -> bool {
        self.groups.contains(&group)
    }

    /// Mask applied to the mode of newly created resources.
    pub fn umask(&self) -> u32 {
        self.umask
    }
}

/// Resolves principal names to ids.
pub trait SecurityManager: Send + Sync {
    /// Looks up a user id by account name.
    fn user_id(&self, name: &str) -> Option<UserId>;

    /// Looks up a group id by group name.
    fn group_id(&self, name: &str) -> Option<GroupId>;
}

/// An in-process [`SecurityManager`] backed by name tables.
pub struct MemorySecurityManager {
    users: RwLock<HashMap<String, UserId>>,
    groups: RwLock<HashMap<String, GroupId>>,
}

impl MemorySecurityManager {
    /// Creates a manager knowing the `SYSTEM` account and the `dba` group.
    pub fn new() -> Self {
        let manager = Self {
            users: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        };
        manager.register_user("SYSTEM", UserId::new(0));
        manager.register_group("dba", GroupId::new(0));
        manager
    }

    /// Registers or replaces a user name.
    pub fn register_user(&self, name: &str, id: UserId) {
        self.users.write().insert(name.to_string(), id);
    }

    /// Registers or replaces a group name.
    pub fn register_group(&self, name: &str, id: GroupId) {
        self.groups.write().insert(name.to_string(), id);
    }
}

impl Default for MemorySecurityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityManager for MemorySecurityManager {
    fn user_id(&self, name: &str) -> Option<UserId> {
        self.users.read().get(name).copied()
    }

    fn group_id(&self, name: &str) -> Option<GroupId> {
        self.groups.read().get(name).copied()
    }
}
