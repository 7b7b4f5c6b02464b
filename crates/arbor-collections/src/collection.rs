//! The collection node.
//!
//! A collection owns its document table and names its direct children; the
//! tree itself is rebuilt by path concatenation. Every public operation
//! checks the acting subject's permission before taking the collection lock.
//! The in-memory state sits behind a short-lived internal lock that is never
//! held across calls into storage, indexers or triggers.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::broker::{Broker, Txn};
use crate::config::DatabaseConfig;
use crate::doc_table::{DocumentSet, DocumentTable};
use crate::document::{Document, ResourceType};
use crate::error::{DbError, Result};
use crate::locking::{CollectionLockGuard, DocumentLockGuard, LockMode};
use crate::mode::{self, EXECUTE, READ, WRITE};
use crate::permission::Permission;
use crate::triggers::DocumentTriggers;
use crate::types::{now_millis, CollectionId, GroupId, UserId};
use crate::uri::CollectionPath;

struct CollectionState {
    id: CollectionId,
    permissions: Permission,
    sub_collections: BTreeSet<String>,
    documents: DocumentTable,
    created: i64,
    triggers_enabled: bool,
    ref_count: u32,
    timestamp: i64,
}

/// One entry of a collection listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionEntry {
    /// A direct sub-collection.
    Collection(String),
    /// A document in this collection.
    Document {
        /// Document name.
        name: String,
        /// XML or binary.
        resource_type: ResourceType,
    },
}

/// A document handed out together with its held update lock.
pub struct LockedDocument {
    doc: Arc<Document>,
    guard: DocumentLockGuard,
}

impl LockedDocument {
    /// The locked document.
    pub fn document(&self) -> &Arc<Document> {
        &self.doc
    }

    /// Mode the document lock is held in.
    pub fn lock_mode(&self) -> LockMode {
        self.guard.mode()
    }

    /// Releases the document lock.
    pub fn release(self) -> Result<()> {
        self.guard.release()
    }
}

/// A collection of documents and sub-collections.
pub struct Collection {
    path: CollectionPath,
    is_temp: bool,
    state: RwLock<CollectionState>,
}

impl Collection {
    /// Creates an empty collection with an unassigned id.
    pub fn new(config: &DatabaseConfig, path: CollectionPath, permissions: Permission) -> Self {
        let is_temp = path.as_str() == config.temp_collection;
        let now = now_millis();
        Self {
            path,
            is_temp,
            state: RwLock::new(CollectionState {
                id: CollectionId::UNKNOWN,
                permissions,
                sub_collections: BTreeSet::new(),
                documents: DocumentTable::new(),
                created: now,
                triggers_enabled: true,
                ref_count: 0,
                timestamp: now,
            }),
        }
    }

    /// Collection id; `CollectionId::UNKNOWN` until assigned.
    pub fn id(&self) -> CollectionId {
        self.state.read().id
    }

    pub(crate) fn set_id(&self, id: CollectionId) {
        self.state.write().id = id;
    }

    /// Full path of this collection.
    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    /// Path of the parent, `None` for the root.
    pub fn parent_path(&self) -> Option<CollectionPath> {
        self.path.parent()
    }

    /// True for the distinguished temporary collection.
    pub fn is_temp(&self) -> bool {
        self.is_temp
    }

    /// Creation time, epoch millis.
    pub fn created(&self) -> i64 {
        self.state.read().created
    }

    /// Sets the creation time, epoch millis.
    pub fn set_creation_time(&self, millis: i64) {
        self.state.write().created = millis;
    }

    /// Snapshot of the current permissions.
    pub fn permissions(&self) -> Permission {
        self.state.read().permissions.clone()
    }

    /// Acquires this collection's lock for the broker's owner.
    pub fn lock(&self, broker: &Broker, mode: LockMode) -> Result<CollectionLockGuard> {
        broker
            .locks()
            .acquire_collection_lock(&self.path, broker.owner(), mode)
    }

    pub(crate) fn check(&self, broker: &Broker, requested: u32) -> Result<()> {
        let permitted = self
            .state
            .read()
            .permissions
            .validate(broker.subject(), requested);
        if permitted {
            return Ok(());
        }
        Err(DbError::PermissionDenied(format!(
            "{} lacks {} on collection {}",
            broker.subject().name(),
            mode::triple_to_string(requested),
            self.path
        )))
    }

    /// Runs `f` under a READ lock; a lock failure is logged and yields `fallback`.
    fn read_locked<T>(
        &self,
        broker: &Broker,
        fallback: T,
        f: impl FnOnce(&CollectionState) -> T,
    ) -> T {
        match self.lock(broker, LockMode::Read) {
            Ok(_guard) => f(&self.state.read()),
            Err(e) => {
                tracing::error!(path = %self.path, error = %e, "failed to acquire read lock");
                fallback
            }
        }
    }

    /// chmod under the collection's write lock. Owner or DBA only.
    pub fn set_mode(&self, broker: &Broker, bits: u32) -> Result<()> {
        let _guard = self.lock(broker, LockMode::Write)?;
        self.state
            .write()
            .permissions
            .set_mode_checked(broker.subject(), bits)
    }

    /// chmod with a symbolic mode string. Owner or DBA only.
    pub fn set_mode_str(&self, broker: &Broker, s: &str) -> Result<()> {
        let _guard = self.lock(broker, LockMode::Write)?;
        let mut st = self.state.write();
        let mut updated = st.permissions.clone();
        updated.set_mode_str(s)?;
        let bits = updated.mode();
        st.permissions.set_mode_checked(broker.subject(), bits)
    }

    /// chown: changing the owner needs DBA, changing the group needs the
    /// owner (as a member of the target group) or DBA.
    pub fn chown(&self, broker: &Broker, owner: Option<UserId>, group: Option<GroupId>) -> Result<()> {
        let _guard = self.lock(broker, LockMode::Write)?;
        let mut st = self.state.write();
        let mut updated = st.permissions.clone();
        if let Some(owner) = owner {
            updated.set_owner_checked(broker.subject(), owner)?;
        }
        if let Some(group) = group {
            updated.set_group_checked(broker.subject(), group)?;
        }
        st.permissions = updated;
        Ok(())
    }

    /// Edits the permissions (e.g. the ACL) under the write lock. Owner or DBA only.
    pub fn update_permissions(
        &self,
        broker: &Broker,
        f: impl FnOnce(&mut Permission) -> Result<()>,
    ) -> Result<()> {
        let _guard = self.lock(broker, LockMode::Write)?;
        let mut st = self.state.write();
        let subject = broker.subject();
        if !subject.has_dba_role() && subject.id() != st.permissions.owner() {
            return Err(DbError::PermissionDenied(format!(
                "only the owner or a DBA may change permissions of {}",
                self.path
            )));
        }
        let mut updated = st.permissions.clone();
        f(&mut updated)?;
        st.permissions = updated;
        Ok(())
    }

    /// Registers `child`'s name in the sub-collection set. Re-adding an
    /// existing name is a no-op. Nothing is persisted.
    pub fn add_sub_collection(&self, broker: &Broker, child: &Collection, is_new: bool) -> Result<()> {
        if child.path().parent().as_ref() != Some(&self.path) {
            return Err(DbError::Syntax(format!(
                "{} is not a direct child of {}",
                child.path(),
                self.path
            )));
        }
        self.check(broker, WRITE)?;
        let _guard = self.lock(broker, LockMode::Write)?;
        let name = child.path().last_segment().to_string();
        if self.state.write().sub_collections.insert(name) {
            tracing::debug!(parent = %self.path, child = %child.path(), "sub-collection added");
        }
        if is_new {
            child.set_creation_time(now_millis());
        }
        Ok(())
    }

    /// Re-registers a renamed child.
    pub fn update_child(&self, broker: &Broker, old_name: &str, child: &Collection) -> Result<()> {
        self.check(broker, WRITE)?;
        let _guard = self.lock(broker, LockMode::Write)?;
        let mut st = self.state.write();
        st.sub_collections.remove(old_name);
        st.sub_collections
            .insert(child.path().last_segment().to_string());
        Ok(())
    }

    /// Removes a child name. Descendants are not touched.
    pub fn remove_sub_collection(&self, broker: &Broker, name: &str) -> Result<bool> {
        self.check(broker, WRITE)?;
        let _guard = self.lock(broker, LockMode::Write)?;
        Ok(self.state.write().sub_collections.remove(name))
    }

    /// True if `name` is a direct sub-collection. Requires READ.
    pub fn has_child_collection(&self, broker: &Broker, name: &str) -> Result<bool> {
        self.check(broker, READ)?;
        Ok(self.read_locked(broker, false, |st| st.sub_collections.contains(name)))
    }

    /// Caller must already hold this collection's lock.
    pub fn has_child_collection_no_lock(&self, name: &str) -> bool {
        self.state.read().sub_collections.contains(name)
    }

    /// True if a document named `name` exists. Requires READ.
    pub fn has_document(&self, broker: &Broker, name: &str) -> Result<bool> {
        self.check(broker, READ)?;
        Ok(self.read_locked(broker, false, |st| st.documents.contains(name)))
    }

    /// Looks up a document under a READ lock and checks the document's own
    /// READ permission.
    pub fn get_document(&self, broker: &Broker, name: &str) -> Result<Option<Arc<Document>>> {
        let found = self.read_locked(broker, None, |st| st.documents.get(name).cloned());
        match found {
            Some(doc) => {
                if !doc.permissions().validate(broker.subject(), READ) {
                    return Err(DbError::PermissionDenied(format!(
                        "{} may not read {}",
                        broker.subject().name(),
                        doc.uri()
                    )));
                }
                Ok(Some(doc))
            }
            None => {
                tracing::debug!(path = %self.path, doc = name, "document not found");
                Ok(None)
            }
        }
    }

    /// Caller must already hold this collection's lock.
    pub fn get_document_no_lock(&self, name: &str) -> Option<Arc<Document>> {
        self.state.read().documents.get(name).cloned()
    }

    /// Looks up a document and acquires its update lock in `mode` while
    /// holding the collection READ lock, then releases the collection lock.
    /// The caller owns the returned document lock.
    pub fn get_document_with_lock(
        &self,
        broker: &Broker,
        name: &str,
        mode: LockMode,
    ) -> Result<Option<LockedDocument>> {
        let coll_guard = self.lock(broker, LockMode::Read)?;
        let doc = match self.state.read().documents.get(name).cloned() {
            Some(doc) => doc,
            None => return Ok(None),
        };
        if !doc.permissions().validate(broker.subject(), READ) {
            return Err(DbError::PermissionDenied(format!(
                "{} may not read {}",
                broker.subject().name(),
                doc.uri()
            )));
        }
        let guard = coll_guard.lock_document(doc.id(), mode)?;
        drop(coll_guard);
        Ok(Some(LockedDocument { doc, guard }))
    }

    /// Readable documents of this collection, in name order.
    pub fn documents(&self, broker: &Broker) -> Result<Vec<Arc<Document>>> {
        self.check(broker, READ)?;
        let subject = broker.subject();
        Ok(self.read_locked(broker, Vec::new(), |st| {
            st.documents
                .iter()
                .filter(|d| d.permissions().validate(subject, READ))
                .cloned()
                .collect()
        }))
    }

    /// Adds this collection's readable documents to `docs` and, if
    /// `recursive`, those of every readable descendant.
    ///
    /// The lock is dropped before descending. Descendants that are
    /// unreadable or have vanished are skipped.
    pub fn all_docs(&self, broker: &Broker, docs: &mut DocumentSet, recursive: bool) -> Result<()> {
        self.check(broker, READ)?;
        let subject = broker.subject();
        let children: Vec<String> = self.read_locked(broker, Vec::new(), |st| {
            for doc in st.documents.iter() {
                if doc.permissions().validate(subject, READ) {
                    docs.add(Arc::clone(doc));
                }
            }
            if recursive {
                st.sub_collections.iter().cloned().collect()
            } else {
                Vec::new()
            }
        });

        for name in children {
            let child_path = self.path.append(&name)?;
            let child = match broker.open_collection(&child_path) {
                Ok(Some(child)) => child,
                Ok(None) => {
                    tracing::debug!(path = %child_path, "sub-collection vanished, skipping");
                    continue;
                }
                Err(e) if e.is_permission_denied() => {
                    tracing::debug!(path = %child_path, "sub-collection not accessible, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match child.all_docs(broker, docs, true) {
                Err(e) if e.is_permission_denied() => {
                    tracing::debug!(path = %child_path, "sub-collection not readable, skipping");
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Number of direct sub-collections. Requires READ.
    pub fn child_collection_count(&self, broker: &Broker) -> Result<usize> {
        self.check(broker, READ)?;
        Ok(self.read_locked(broker, 0, |st| st.sub_collections.len()))
    }

    /// Number of documents. Requires READ.
    pub fn document_count(&self, broker: &Broker) -> Result<usize> {
        self.check(broker, READ)?;
        Ok(self.read_locked(broker, 0, |st| st.documents.len()))
    }

    /// True if the collection has neither documents nor sub-collections.
    pub fn is_empty(&self, broker: &Broker) -> Result<bool> {
        self.check(broker, READ)?;
        Ok(self.read_locked(broker, false, |st| {
            st.documents.is_empty() && st.sub_collections.is_empty()
        }))
    }

    /// Names of the direct sub-collections.
    pub fn collection_names(&self, broker: &Broker) -> Result<Vec<String>> {
        self.check(broker, READ)?;
        Ok(self.read_locked(broker, Vec::new(), |st| {
            st.sub_collections.iter().cloned().collect()
        }))
    }

    /// Names of all documents, in name order. Requires READ.
    pub fn document_names(&self, broker: &Broker) -> Result<Vec<String>> {
        self.check(broker, READ)?;
        Ok(self.read_locked(broker, Vec::new(), |st| st.documents.names()))
    }

    /// Sub-collections followed by documents, each in name order.
    pub fn entries(&self, broker: &Broker) -> Result<Vec<CollectionEntry>> {
        self.check(broker, READ)?;
        Ok(self.read_locked(broker, Vec::new(), |st| {
            let mut entries: Vec<CollectionEntry> = st
                .sub_collections
                .iter()
                .map(|n| CollectionEntry::Collection(n.clone()))
                .collect();
            entries.extend(st.documents.iter().map(|d| CollectionEntry::Document {
                name: d.name().to_string(),
                resource_type: d.resource_type(),
            }));
            entries
        }))
    }

    /// Every readable descendant collection, depth first.
    pub fn descendants(&self, broker: &Broker) -> Result<Vec<Arc<Collection>>> {
        let mut out = Vec::new();
        for name in self.collection_names(broker)? {
            let child_path = self.path.append(&name)?;
            let child = match broker.open_collection(&child_path) {
                Ok(Some(child)) => child,
                Ok(None) => continue,
                Err(e) if e.is_permission_denied() => continue,
                Err(e) => return Err(e),
            };
            out.push(Arc::clone(&child));
            match child.descendants(broker) {
                Ok(mut grandchildren) => out.append(&mut grandchildren),
                Err(e) if e.is_permission_denied() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Registers `doc`, assigning an id if it has none. Requires WRITE.
    pub fn add_document(&self, txn: &Txn, broker: &Broker, doc: Arc<Document>) -> Result<()> {
        self.check(broker, WRITE)?;
        let _guard = self.lock(broker, LockMode::Write)?;
        if !doc.id().is_known() {
            doc.set_id(broker.storage().next_resource_id(txn)?);
        }
        self.insert_document(doc);
        Ok(())
    }

    /// Removes a document from the table without touching storage.
    pub fn unlink_document(&self, broker: &Broker, name: &str) -> Result<Option<Arc<Document>>> {
        self.check(broker, WRITE)?;
        let _guard = self.lock(broker, LockMode::Write)?;
        Ok(self.remove_document_entry(name))
    }

    /// True unless this collection is part of the configuration tree or
    /// holds a write-locked document. Advisory only.
    pub fn allow_unload(&self, broker: &Broker) -> bool {
        let config = broker.database().config();
        if let Ok(config_root) = CollectionPath::new(&config.config_collection) {
            if self.path.starts_with(&config_root) {
                return false;
            }
        }
        let locks = broker.locks();
        !self
            .state
            .read()
            .documents
            .iter()
            .any(|d| locks.is_document_locked_for_write(d.id()))
    }

    /// Whether document triggers fire for this collection.
    pub fn triggers_enabled(&self) -> bool {
        self.state.read().triggers_enabled
    }

    /// Enables or disables document triggers for this collection.
    pub fn set_triggers_enabled(&self, enabled: bool) {
        self.state.write().triggers_enabled = enabled;
    }

    /// Trigger dispatcher for this collection, honoring both the per-collection
    /// and the database-wide switch.
    pub(crate) fn document_triggers(&self, broker: &Broker) -> DocumentTriggers {
        let db = broker.database();
        let enabled = self.triggers_enabled() && db.config().triggers_enabled;
        DocumentTriggers::new(db.triggers_for(&self.path), self.path.clone(), enabled)
    }

    /// Current reference count.
    pub fn reference_count(&self) -> u32 {
        self.state.read().ref_count
    }

    /// Increments the reference count.
    pub fn inc_reference_count(&self) {
        self.state.write().ref_count += 1;
    }

    /// Decrements the reference count, stopping at zero.
    pub fn dec_reference_count(&self) {
        let mut st = self.state.write();
        st.ref_count = st.ref_count.saturating_sub(1);
    }

    /// Sets the reference count.
    pub fn set_reference_count(&self, count: u32) {
        self.state.write().ref_count = count;
    }

    /// Last access time used for LRU eviction.
    pub fn timestamp(&self) -> i64 {
        self.state.read().timestamp
    }

    /// Sets the last access time.
    pub fn set_timestamp(&self, millis: i64) {
        self.state.write().timestamp = millis;
    }

    /// Rough in-memory footprint in bytes.
    pub fn memory_size_estimate(&self) -> usize {
        let st = self.state.read();
        std::mem::size_of::<Self>()
            + self.path.as_str().len()
            + st.sub_collections.iter().map(|n| n.len() + 24).sum::<usize>()
            + st.documents.iter().map(|d| d.memory_size()).sum::<usize>()
    }

    pub(crate) fn insert_document(&self, doc: Arc<Document>) {
        tracing::debug!(path = %self.path, doc = doc.name(), id = %doc.id(), "document registered");
        self.state.write().documents.insert(doc);
    }

    pub(crate) fn remove_document_entry(&self, name: &str) -> Option<Arc<Document>> {
        self.state.write().documents.remove(name)
    }

    pub(crate) fn sub_collection_names_no_lock(&self) -> Vec<String> {
        self.state.read().sub_collections.iter().cloned().collect()
    }

    pub(crate) fn documents_no_lock(&self) -> Vec<Arc<Document>> {
        self.state.read().documents.documents()
    }

    pub(crate) fn restore(
        &self,
        id: CollectionId,
        sub_collections: BTreeSet<String>,
        permissions: Permission,
        created: i64,
    ) {
        let mut st = self.state.write();
        st.id = id;
        st.sub_collections = sub_collections;
        st.permissions = permissions;
        st.created = created;
    }

    pub(crate) fn requires_execute(&self, broker: &Broker) -> Result<()> {
        self.check(broker, EXECUTE)
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Collection {}

impl PartialOrd for Collection {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Collection {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id())
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::subject::Subject;

    fn setup() -> (Arc<Database>, Broker) {
        let db = Database::in_memory(DatabaseConfig::default());
        let broker = db.broker(Subject::system());
        (db, broker)
    }

    fn user(id: u32) -> Subject {
        Subject::new(UserId::new(id), format!("user{}", id), GroupId::new(id))
    }

    #[test]
    fn test_add_sub_collection_is_idempotent() {
        let (db, broker) = setup();
        let root = db.collection(&CollectionPath::root()).unwrap();
        let child = Collection::new(
            db.config(),
            CollectionPath::new("/db/a").unwrap(),
            Permission::new(UserId::new(0), GroupId::new(0), 0o755),
        );
        child.set_creation_time(0);
        root.add_sub_collection(&broker, &child, true).unwrap();
        root.add_sub_collection(&broker, &child, false).unwrap();
        assert!(child.created() > 0);
        assert_eq!(root.child_collection_count(&broker).unwrap(), 1);
        assert!(root.has_child_collection(&broker, "a").unwrap());
    }

    #[test]
    fn test_add_sub_collection_rejects_grandchild() {
        let (db, broker) = setup();
        let root = db.collection(&CollectionPath::root()).unwrap();
        let grandchild = Collection::new(
            db.config(),
            CollectionPath::new("/db/a/b").unwrap(),
            Permission::new(UserId::new(0), GroupId::new(0), 0o755),
        );
        assert!(matches!(
            root.add_sub_collection(&broker, &grandchild, true),
            Err(DbError::Syntax(_))
        ));
    }

    #[test]
    fn test_remove_sub_collection_absent_is_noop() {
        let (db, broker) = setup();
        let root = db.collection(&CollectionPath::root()).unwrap();
        assert!(!root.remove_sub_collection(&broker, "missing").unwrap());
    }

    #[test]
    fn test_write_requires_permission() {
        let (db, broker) = setup();
        let txn = broker.begin_transaction();
        let coll = broker
            .create_collection(&txn, &CollectionPath::new("/db/locked").unwrap())
            .unwrap();
        coll.set_mode(&broker, 0o755).unwrap();

        let guest = db.broker(user(50));
        let child = Collection::new(
            db.config(),
            CollectionPath::new("/db/locked/x").unwrap(),
            Permission::new(UserId::new(50), GroupId::new(50), 0o755),
        );
        assert!(matches!(
            coll.add_sub_collection(&guest, &child, true),
            Err(DbError::PermissionDenied(_))
        ));
        assert!(coll.has_child_collection(&guest, "x").is_ok());
    }

    #[test]
    fn test_read_requires_permission() {
        let (db, broker) = setup();
        let txn = broker.begin_transaction();
        let coll = broker
            .create_collection(&txn, &CollectionPath::new("/db/private").unwrap())
            .unwrap();
        coll.set_mode(&broker, 0o700).unwrap();

        let guest = db.broker(user(51));
        assert!(matches!(
            coll.document_count(&guest),
            Err(DbError::PermissionDenied(_))
        ));
        assert!(matches!(
            coll.has_document(&guest, "a.xml"),
            Err(DbError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_chmod_requires_owner() {
        let (db, broker) = setup();
        let txn = broker.begin_transaction();
        let coll = broker
            .create_collection(&txn, &CollectionPath::new("/db/c").unwrap())
            .unwrap();
        let guest = db.broker(user(52));
        assert!(coll.set_mode(&guest, 0o777).is_err());
        assert!(coll.set_mode_str(&broker, "rwxr-x---").is_ok());
        assert_eq!(coll.permissions().mode(), 0o750);
        assert!(coll.chown(&guest, Some(UserId::new(52)), None).is_err());
        coll.chown(&broker, Some(UserId::new(52)), Some(GroupId::new(52)))
            .unwrap();
        assert_eq!(coll.permissions().owner(), UserId::new(52));
        assert!(coll
            .update_permissions(&guest, |p| {
                p.set_mode(0o700);
                Ok(())
            })
            .is_ok());
    }

    #[test]
    fn test_equality_by_id() {
        let config = DatabaseConfig::default();
        let perm = Permission::new(UserId::new(0), GroupId::new(0), 0o755);
        let a = Collection::new(&config, CollectionPath::new("/db/a").unwrap(), perm.clone());
        let b = Collection::new(&config, CollectionPath::new("/db/b").unwrap(), perm);
        a.set_id(CollectionId::new(4));
        b.set_id(CollectionId::new(4));
        assert_eq!(a, b);
        b.set_id(CollectionId::new(2));
        assert!(b < a);
    }

    #[test]
    fn test_temp_flag() {
        let config = DatabaseConfig::default();
        let perm = Permission::new(UserId::new(0), GroupId::new(0), 0o755);
        let temp = Collection::new(&config, CollectionPath::new("/db/system/temp").unwrap(), perm.clone());
        let other = Collection::new(&config, CollectionPath::new("/db/system/temp2").unwrap(), perm);
        assert!(temp.is_temp());
        assert!(!other.is_temp());
    }

    #[test]
    fn test_reference_count_saturates() {
        let config = DatabaseConfig::default();
        let c = Collection::new(
            &config,
            CollectionPath::root(),
            Permission::new(UserId::new(0), GroupId::new(0), 0o755),
        );
        c.dec_reference_count();
        assert_eq!(c.reference_count(), 0);
        c.inc_reference_count();
        c.inc_reference_count();
        assert_eq!(c.reference_count(), 2);
        c.set_reference_count(0);
        assert_eq!(c.reference_count(), 0);
        assert!(c.memory_size_estimate() > 0);
    }

    #[test]
    fn test_config_collections_never_unload() {
        let (_db, broker) = setup();
        let txn = broker.begin_transaction();
        let conf = broker
            .create_collection(&txn, &CollectionPath::new("/db/system/config/db").unwrap())
            .unwrap();
        let plain = broker
            .create_collection(&txn, &CollectionPath::new("/db/plain").unwrap())
            .unwrap();
        assert!(!conf.allow_unload(&broker));
        assert!(plain.allow_unload(&broker));
    }
}
