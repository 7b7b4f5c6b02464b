//! Shared database state and the broker-side collection operations.
//!
//! `Database` is the primary entry point. It owns the configuration, the
//! lock tables, the storage backend, the collection arena and the trigger
//! and listener registries, and hands out a [`Broker`] per request.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::arena::CollectionArena;
use crate::broker::{Broker, ConfigurationManager, StorageBroker, Txn};
use crate::collection::Collection;
use crate::config::DatabaseConfig;
use crate::document::Document;
use crate::error::{DbError, Result};
use crate::locking::{LockManager, LockMode};
use crate::memory::MemoryStorage;
use crate::mode::WRITE;
use crate::permission::Permission;
use crate::subject::{MemorySecurityManager, SecurityManager, Subject};
use crate::triggers::{DocumentTrigger, UpdateEvent, UpdateListener};
use crate::types::{CollectionId, LockOwner, TxnId};
use crate::uri::CollectionPath;

/// The database: shared state behind every [`Broker`].
pub struct Database {
    config: DatabaseConfig,
    locks: Arc<LockManager>,
    storage: Arc<dyn StorageBroker>,
    security: Arc<dyn SecurityManager>,
    arena: CollectionArena,
    triggers: RwLock<Vec<(CollectionPath, Arc<dyn DocumentTrigger>)>>,
    listeners: RwLock<Vec<Arc<dyn UpdateListener>>>,
    config_manager: RwLock<Option<Arc<dyn ConfigurationManager>>>,
    next_owner: AtomicU64,
    next_txn: AtomicU64,
}

impl Database {
    fn assemble(
        config: DatabaseConfig,
        storage: Arc<dyn StorageBroker>,
        security: Arc<dyn SecurityManager>,
    ) -> Arc<Self> {
        let arena = CollectionArena::new(config.arena_capacity);
        Arc::new(Self {
            config,
            locks: Arc::new(LockManager::new()),
            storage,
            security,
            arena,
            triggers: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            config_manager: RwLock::new(None),
            next_owner: AtomicU64::new(0),
            next_txn: AtomicU64::new(0),
        })
    }

    /// Creates a database over in-memory storage with a fresh root collection.
    pub fn in_memory(config: DatabaseConfig) -> Arc<Self> {
        let storage = Arc::new(MemoryStorage::new());
        let root_id = storage.allocate_collection_id();
        let db = Self::assemble(config, storage, Arc::new(MemorySecurityManager::new()));
        db.install_root(root_id);
        db
    }

    /// Opens a database over `storage`, loading the root collection record
    /// or creating and persisting one if the store is empty.
    pub fn open(
        config: DatabaseConfig,
        storage: Arc<dyn StorageBroker>,
        security: Arc<dyn SecurityManager>,
    ) -> Result<Arc<Self>> {
        let db = Self::assemble(config, storage, security);
        let broker = db.broker(Subject::system());
        let root_path = CollectionPath::root();
        match db.storage.load_collection(&root_path)? {
            Some(record) => {
                let root = Collection::deserialize(&broker, root_path, record)?;
                root.attach_documents(&broker)?;
                db.arena.insert(Arc::new(root));
                tracing::info!("loaded root collection");
            }
            None => {
                let txn = broker.begin_transaction();
                let id = db.storage.next_collection_id(&txn)?;
                let root = db.install_root(id);
                broker.save_collection(&txn, &root)?;
                tracing::info!("created root collection");
            }
        }
        Ok(db)
    }

    fn install_root(&self, id: CollectionId) -> Arc<Collection> {
        let permissions = Permission::for_subject(&Subject::system(), self.config.default_collection_mode);
        let root = Collection::new(&self.config, CollectionPath::root(), permissions);
        root.set_id(id);
        self.arena.insert(Arc::new(root))
    }

    /// Creates a request context acting as `subject` under a fresh lock owner.
    pub fn broker(self: &Arc<Self>, subject: Subject) -> Broker {
        let owner = LockOwner::new(self.next_owner.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::trace!(subject = subject.name(), owner = %owner, "broker created");
        Broker::new(Arc::clone(self), subject, owner)
    }

    /// Starts a new transaction.
    pub fn begin_transaction(&self) -> Txn {
        Txn::new(TxnId::new(self.next_txn.fetch_add(1, Ordering::Relaxed) + 1))
    }

    /// Database configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Collection and document lock tables.
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Storage backend.
    pub fn storage(&self) -> &Arc<dyn StorageBroker> {
        &self.storage
    }

    /// Security manager used for name lookups.
    pub fn security(&self) -> &Arc<dyn SecurityManager> {
        &self.security
    }

    /// The collection cache.
    pub fn arena(&self) -> &CollectionArena {
        &self.arena
    }

    /// The cached collection at `path`, without any permission check.
    pub fn collection(&self, path: &CollectionPath) -> Option<Arc<Collection>> {
        self.arena.get(path)
    }

    /// Registers a trigger for every collection at or below `path`.
    pub fn register_trigger(&self, path: CollectionPath, trigger: Arc<dyn DocumentTrigger>) {
        tracing::debug!(path = %path, trigger = trigger.name(), "trigger registered");
        self.triggers.write().push((path, trigger));
    }

    /// Triggers that apply to the collection at `path`, in registration order.
    pub fn triggers_for(&self, path: &CollectionPath) -> Vec<Arc<dyn DocumentTrigger>> {
        self.triggers
            .read()
            .iter()
            .filter(|(scope, _)| path.starts_with(scope))
            .map(|(_, t)| Arc::clone(t))
            .collect()
    }

    /// Adds a listener notified after every document change.
    pub fn add_update_listener(&self, listener: Arc<dyn UpdateListener>) {
        self.listeners.write().push(listener);
    }

    /// Reports a completed document change to every listener.
    pub fn notify(&self, doc: &Document, event: UpdateEvent) {
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.document_updated(doc, event);
        }
    }

    /// Installs the manager notified about configuration documents.
    pub fn set_configuration_manager(&self, manager: Arc<dyn ConfigurationManager>) {
        *self.config_manager.write() = Some(manager);
    }

    /// The installed configuration manager, if any.
    pub fn configuration_manager(&self) -> Option<Arc<dyn ConfigurationManager>> {
        self.config_manager.read().clone()
    }
}

impl Broker {
    fn check_writable(&self, path: &CollectionPath) -> Result<()> {
        if self.database().config().read_only {
            return Err(DbError::PermissionDenied(format!(
                "database is read-only, cannot modify {}",
                path
            )));
        }
        Ok(())
    }

    /// Returns the collection at `path`, from the arena or loaded from
    /// storage. The subject needs EXECUTE on the collection.
    pub fn open_collection(&self, path: &CollectionPath) -> Result<Option<Arc<Collection>>> {
        let db = self.database();
        if let Some(cached) = db.arena().get(path) {
            cached.requires_execute(self)?;
            return Ok(Some(cached));
        }

        let Some(record) = self.storage().load_collection(path)? else {
            return Ok(None);
        };
        let loaded = Collection::deserialize(self, path.clone(), record)?;
        let attached = loaded.attach_documents(self)?;
        tracing::debug!(path = %path, documents = attached, "collection loaded");
        let cached = db.arena().insert(Arc::new(loaded));
        db.arena().evict(self);
        Ok(Some(cached))
    }

    /// Returns the collection at `path`, creating it and any missing
    /// ancestors. Each new collection is registered in its parent and both
    /// records are persisted.
    pub fn create_collection(&self, txn: &Txn, path: &CollectionPath) -> Result<Arc<Collection>> {
        if let Some(existing) = self.open_collection(path)? {
            return Ok(existing);
        }
        self.check_writable(path)?;

        let root = CollectionPath::root();
        let mut current = self
            .open_collection(&root)?
            .ok_or_else(|| DbError::NotFound(format!("root collection {}", root)))?;
        // first segment is the root itself
        for segment in path.segments().skip(1) {
            let child_path = current.path().append(segment)?;
            current = match self.open_collection(&child_path)? {
                Some(child) => child,
                None => self.create_child(txn, &current, child_path)?,
            };
        }
        Ok(current)
    }

    fn create_child(
        &self,
        txn: &Txn,
        parent: &Arc<Collection>,
        path: CollectionPath,
    ) -> Result<Arc<Collection>> {
        let guard = parent.lock(self, LockMode::Write)?;
        let name = path.last_segment().to_string();
        if parent.has_child_collection_no_lock(&name) {
            drop(guard);
            return self
                .open_collection(&path)?
                .ok_or_else(|| DbError::NotFound(format!("collection {}", path)));
        }
        if parent.get_document_no_lock(&name).is_some() {
            return Err(DbError::Conflict(format!(
                "{} already has a document named {}",
                parent.path(),
                name
            )));
        }

        let config = self.database().config();
        let child = Collection::new(
            config,
            path,
            Permission::for_subject(self.subject(), config.default_collection_mode),
        );
        child.set_id(self.storage().next_collection_id(txn)?);
        parent.add_sub_collection(self, &child, true)?;
        let child = self.database().arena().insert(Arc::new(child));
        self.save_collection(txn, &child)?;
        self.save_collection(txn, parent)?;
        drop(guard);

        tracing::debug!(path = %child.path(), id = %child.id(), "collection created");
        self.database().arena().evict(self);
        Ok(child)
    }

    /// Persists the record of `collection`.
    pub fn save_collection(&self, txn: &Txn, collection: &Collection) -> Result<()> {
        let record = collection.serialize(self)?;
        self.storage().save_collection(txn, collection.path(), record)
    }

    /// Removes the collection at `path` with all its documents and
    /// descendants, deepest first. Returns false if it did not exist.
    pub fn remove_collection(&self, txn: &Txn, path: &CollectionPath) -> Result<bool> {
        let Some(parent_path) = path.parent() else {
            return Err(DbError::PermissionDenied(
                "the root collection cannot be removed".to_string(),
            ));
        };
        self.check_writable(path)?;
        let Some(collection) = self.open_collection(path)? else {
            return Ok(false);
        };
        let parent = self
            .open_collection(&parent_path)?
            .ok_or_else(|| DbError::NotFound(format!("collection {}", parent_path)))?;
        parent.check(self, WRITE)?;

        self.remove_tree(txn, &collection)?;
        parent.remove_sub_collection(self, path.last_segment())?;
        self.save_collection(txn, &parent)?;
        tracing::debug!(path = %path, "collection removed");
        Ok(true)
    }

    fn remove_tree(&self, txn: &Txn, collection: &Arc<Collection>) -> Result<()> {
        collection.check(self, WRITE)?;
        let guard = collection.lock(self, LockMode::Write)?;
        for name in collection.sub_collection_names_no_lock() {
            let child_path = collection.path().append(&name)?;
            if let Some(child) = self.open_collection(&child_path)? {
                self.remove_tree(txn, &child)?;
            }
            collection.remove_sub_collection(self, &name)?;
        }
        for doc in collection.documents_no_lock() {
            collection.remove_resource(txn, self, &doc)?;
        }
        self.storage().remove_collection(txn, collection.path())?;
        self.database().arena().remove(collection.path());
        drop(guard);
        Ok(())
    }

    /// Hands a collection back; unused collections may then be evicted.
    pub fn close_collection(&self, collection: Arc<Collection>) {
        drop(collection);
        self.database().arena().evict(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordingListener;
    use crate::types::{GroupId, UserId};

    fn setup() -> (Arc<Database>, Broker) {
        let db = Database::in_memory(DatabaseConfig::default());
        let broker = db.broker(Subject::system());
        (db, broker)
    }

    #[test]
    fn test_root_exists() {
        let (db, broker) = setup();
        let root = broker.open_collection(&CollectionPath::root()).unwrap().unwrap();
        assert!(root.id().is_known());
        assert!(db.collection(&CollectionPath::root()).is_some());
    }

    #[test]
    fn test_create_collection_creates_ancestors() {
        let (db, broker) = setup();
        let txn = broker.begin_transaction();
        let leaf = broker
            .create_collection(&txn, &CollectionPath::new("/db/a/b/c").unwrap())
            .unwrap();
        assert_eq!(leaf.path().as_str(), "/db/a/b/c");
        let a = db.collection(&CollectionPath::new("/db/a").unwrap()).unwrap();
        assert_eq!(a.collection_names(&broker).unwrap(), vec!["b".to_string()]);
        assert_eq!(leaf.permissions().mode(), 0o755);

        let again = broker
            .create_collection(&txn, &CollectionPath::new("/db/a/b/c").unwrap())
            .unwrap();
        assert!(Arc::ptr_eq(&leaf, &again));
    }

    #[test]
    fn test_create_collection_over_document_conflicts() {
        let (db, broker) = setup();
        let txn = broker.begin_transaction();
        let root = db.collection(&CollectionPath::root()).unwrap();
        root.add_binary_resource(&txn, &broker, "x", b"1", Default::default())
            .unwrap();
        assert!(matches!(
            broker.create_collection(&txn, &CollectionPath::new("/db/x").unwrap()),
            Err(DbError::Conflict(_))
        ));
    }

    #[test]
    fn test_open_collection_reloads_from_storage() {
        let (db, broker) = setup();
        let txn = broker.begin_transaction();
        let coll = broker
            .create_collection(&txn, &CollectionPath::new("/db/reload").unwrap())
            .unwrap();
        coll.add_binary_resource(&txn, &broker, "a.bin", b"abc", Default::default())
            .unwrap();
        let id = coll.id();
        drop(coll);
        assert!(db.arena().remove(&CollectionPath::new("/db/reload").unwrap()).is_some());

        let reopened = broker
            .open_collection(&CollectionPath::new("/db/reload").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(reopened.id(), id);
        assert!(reopened.has_document(&broker, "a.bin").unwrap());
    }

    #[test]
    fn test_open_collection_requires_execute() {
        let (db, broker) = setup();
        let txn = broker.begin_transaction();
        let coll = broker
            .create_collection(&txn, &CollectionPath::new("/db/secret").unwrap())
            .unwrap();
        coll.set_mode(&broker, 0o700).unwrap();
        let guest = db.broker(Subject::new(UserId::new(5), "guest", GroupId::new(5)));
        assert!(guest
            .open_collection(&CollectionPath::new("/db/secret").unwrap())
            .unwrap_err()
            .is_permission_denied());
        assert!(guest
            .open_collection(&CollectionPath::new("/db/missing").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_remove_collection_recursive() {
        let (db, broker) = setup();
        let listener = Arc::new(RecordingListener::new());
        db.add_update_listener(listener.clone());
        let txn = broker.begin_transaction();
        let b = broker
            .create_collection(&txn, &CollectionPath::new("/db/a/b").unwrap())
            .unwrap();
        b.add_binary_resource(&txn, &broker, "x.bin", b"x", Default::default())
            .unwrap();
        drop(b);

        assert!(broker
            .remove_collection(&txn, &CollectionPath::new("/db/a").unwrap())
            .unwrap());
        assert!(broker
            .open_collection(&CollectionPath::new("/db/a/b").unwrap())
            .unwrap()
            .is_none());
        assert!(broker
            .open_collection(&CollectionPath::new("/db/a").unwrap())
            .unwrap()
            .is_none());
        let root = db.collection(&CollectionPath::root()).unwrap();
        assert!(!root.has_child_collection(&broker, "a").unwrap());
        assert_eq!(listener.events().last().map(|(_, e)| *e), Some(UpdateEvent::Remove));

        assert!(!broker
            .remove_collection(&txn, &CollectionPath::new("/db/a").unwrap())
            .unwrap());
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let (_db, broker) = setup();
        let txn = broker.begin_transaction();
        assert!(broker
            .remove_collection(&txn, &CollectionPath::root())
            .unwrap_err()
            .is_permission_denied());
    }

    #[test]
    fn test_open_over_existing_storage() {
        let storage: Arc<dyn StorageBroker> = Arc::new(MemoryStorage::new());
        let security: Arc<dyn SecurityManager> = Arc::new(MemorySecurityManager::new());
        let first = Database::open(DatabaseConfig::default(), storage.clone(), security.clone()).unwrap();
        let broker = first.broker(Subject::system());
        let txn = broker.begin_transaction();
        broker
            .create_collection(&txn, &CollectionPath::new("/db/kept").unwrap())
            .unwrap();
        drop(broker);
        drop(first);

        let second = Database::open(DatabaseConfig::default(), storage, security).unwrap();
        let broker = second.broker(Subject::system());
        let root = broker.open_collection(&CollectionPath::root()).unwrap().unwrap();
        assert_eq!(root.collection_names(&broker).unwrap(), vec!["kept".to_string()]);
        assert!(broker
            .open_collection(&CollectionPath::new("/db/kept").unwrap())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_triggers_for_scopes_by_prefix() {
        struct Named;
        impl DocumentTrigger for Named {}
        let (db, _broker) = setup();
        db.register_trigger(CollectionPath::new("/db/a").unwrap(), Arc::new(Named));
        assert_eq!(db.triggers_for(&CollectionPath::new("/db/a/b").unwrap()).len(), 1);
        assert!(db.triggers_for(&CollectionPath::new("/db/ab").unwrap()).is_empty());
        assert!(db.triggers_for(&CollectionPath::root()).is_empty());
    }

    #[test]
    fn test_read_only_blocks_collection_creation() {
        let db = Database::in_memory(DatabaseConfig {
            read_only: true,
            ..DatabaseConfig::default()
        });
        let broker = db.broker(Subject::system());
        let txn = broker.begin_transaction();
        assert!(broker
            .create_collection(&txn, &CollectionPath::new("/db/x").unwrap())
            .unwrap_err()
            .is_permission_denied());
    }
}
