//! Document ingestion and removal.
//!
//! XML documents go through two phases. [`Collection::validate_xml_resource`]
//! parses and indexes under the collection WRITE lock, registers the
//! document and hands back an [`IndexInfo`] that still holds the document's
//! WRITE lock. [`Collection::store`] consumes that token, persists the
//! content, releases the document lock and fires the after-triggers.
//!
//! A document only enters the table once its parse has succeeded, so a
//! failed validate leaves the collection exactly as it was.

use std::fmt;
use std::sync::Arc;

use crate::broker::{Broker, Indexer, Txn, XmlSource};
use crate::collection::Collection;
use crate::document::{Document, BINARY_MIME_TYPE};
use crate::error::{DbError, Result};
use crate::locking::{DocumentLockGuard, LockMode};
use crate::mode::{EXECUTE, WRITE};
use crate::permission::Permission;
use crate::triggers::{DocumentTriggers, UpdateEvent};
use crate::types::now_millis;
use crate::uri::{validate_name, CollectionPath};

/// Outcome of a successful validate phase, consumed by [`Collection::store`].
///
/// Holds the document's WRITE lock. Dropping it without storing releases
/// the lock and leaves the registered, unpersisted document in the table.
#[must_use = "an IndexInfo holds the document write lock until it is passed to Collection::store"]
pub struct IndexInfo {
    document: Arc<Document>,
    indexer: Box<dyn Indexer>,
    triggers: DocumentTriggers,
    creating: bool,
    old_doc_permissions: Option<Permission>,
    lock: Option<DocumentLockGuard>,
}

impl IndexInfo {
    /// The validated document.
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// True if no document of this name existed before.
    pub fn is_creating(&self) -> bool {
        self.creating
    }

    /// Permissions of the replaced document, if any.
    pub fn old_doc_permissions(&self) -> Option<&Permission> {
        self.old_doc_permissions.as_ref()
    }

    /// Size reported by the indexer for the validated content.
    pub fn doc_size(&self) -> u64 {
        self.indexer.doc_size()
    }
}

impl fmt::Debug for IndexInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexInfo")
            .field("document", &self.document.uri())
            .field("id", &self.document.id())
            .field("creating", &self.creating)
            .field("locked", &self.lock.is_some())
            .finish()
    }
}

impl Drop for IndexInfo {
    fn drop(&mut self) {
        if self.lock.is_some() {
            tracing::warn!(
                doc = %self.document.uri(),
                "validated document dropped without being stored"
            );
        }
    }
}

/// Options for [`Collection::add_binary_resource`].
#[derive(Clone, Debug, Default)]
pub struct BinaryOptions {
    /// MIME type; defaults to `application/octet-stream`.
    pub mime_type: Option<String>,
    /// Explicit creation time, epoch millis.
    pub created: Option<i64>,
    /// Explicit modification time, epoch millis.
    pub modified: Option<i64>,
}

impl Collection {
    fn check_not_read_only(&self, broker: &Broker) -> Result<()> {
        if broker.database().config().read_only {
            return Err(DbError::PermissionDenied(format!(
                "database is read-only, cannot modify {}",
                self.path()
            )));
        }
        Ok(())
    }

    fn is_config_document(&self, broker: &Broker, name: &str) -> bool {
        let config = broker.database().config();
        if !config.is_config_name(name) {
            return false;
        }
        CollectionPath::new(&config.config_collection)
            .map(|root| self.path().starts_with(&root))
            .unwrap_or(false)
    }

    /// A configuration collection may hold only one configuration document.
    fn check_configuration_document(&self, broker: &Broker, name: &str) -> Result<()> {
        if !self.is_config_document(broker, name) {
            return Ok(());
        }
        let config = broker.database().config();
        for existing in self.document_names(broker)? {
            if existing != name && config.is_config_name(&existing) {
                return Err(DbError::CollectionConfiguration(format!(
                    "{} already holds configuration document {}, cannot add {}",
                    self.path(),
                    existing,
                    name
                )));
            }
        }
        Ok(())
    }

    /// A document may not take the name of a sub-collection.
    fn check_collection_conflict(&self, name: &str) -> Result<()> {
        if self.has_child_collection_no_lock(name) {
            return Err(DbError::Conflict(format!(
                "{} already has a sub-collection named {}",
                self.path(),
                name
            )));
        }
        Ok(())
    }

    fn check_permissions_for_add(&self, broker: &Broker, old_doc: Option<&Document>) -> Result<()> {
        let subject = broker.subject();
        self.check(broker, EXECUTE)?;
        match old_doc {
            Some(old) => {
                if let Some(holder) = old.user_lock() {
                    if holder != subject.id() && !subject.has_dba_role() {
                        return Err(DbError::PermissionDenied(format!(
                            "{} is locked by user {}",
                            old.uri(),
                            holder
                        )));
                    }
                }
                let perms = old.permissions();
                if perms.owner() != subject.id() && !perms.validate(subject, WRITE) {
                    return Err(DbError::PermissionDenied(format!(
                        "{} may not replace {}",
                        subject.name(),
                        old.uri()
                    )));
                }
                Ok(())
            }
            None => self.check(broker, WRITE),
        }
    }

    /// Carries permissions and metadata of a replaced document forward, or
    /// stamps a fresh creation time.
    fn manage_document_information(old_doc: Option<&Document>, document: &Document) {
        match old_doc {
            Some(old) => {
                let old_meta = old.metadata();
                document.set_permissions(old.permissions());
                document.update_metadata(|m| {
                    m.created = old_meta.created;
                    m.last_modified = old_meta.last_modified;
                });
            }
            None => {
                let now = now_millis();
                document.update_metadata(|m| {
                    m.created = now;
                    m.last_modified = now;
                });
            }
        }
    }

    fn update_modification_time(document: &Document) {
        let now = now_millis();
        document.update_metadata(|m| m.last_modified = now);
    }

    /// Validate phase of XML ingestion.
    ///
    /// Checks permissions and naming, parses `source` in validating mode,
    /// removes any replaced resource and registers the document. On success
    /// the document's WRITE lock travels inside the returned [`IndexInfo`];
    /// the collection lock is released before returning either way.
    pub fn validate_xml_resource(
        &self,
        txn: &Txn,
        broker: &Broker,
        name: &str,
        source: &mut XmlSource,
    ) -> Result<IndexInfo> {
        validate_name(name)?;
        self.check_not_read_only(broker)?;

        let coll_guard = self.lock(broker, LockMode::Write)?;
        self.check_configuration_document(broker, name)?;
        let old_doc = self.get_document_no_lock(name);
        self.check_permissions_for_add(broker, old_doc.as_deref())?;
        self.check_collection_conflict(name)?;

        let db = broker.database();
        let document = Arc::new(Document::new_xml(
            self.path().clone(),
            name,
            Permission::for_subject(broker.subject(), db.config().default_resource_mode),
        ));
        Self::manage_document_information(old_doc.as_deref(), &document);

        let storage = broker.storage();
        let mut indexer = storage.new_indexer(txn);
        indexer.set_document(Arc::clone(&document));
        indexer.set_validating(true);

        let mut triggers = self.document_triggers(broker);
        triggers.set_validating(true);
        match &old_doc {
            Some(old) => triggers.before_update_document(txn, old)?,
            None => triggers.before_create_document(txn, &document.uri())?,
        }

        tracing::debug!(doc = %document.uri(), "scanning document");
        indexer.index(source)?;

        let (document, doc_lock) = match &old_doc {
            Some(old) => {
                Self::update_modification_time(&document);
                let old_lock = coll_guard.lock_document(old.id(), LockMode::Write)?;
                if old.is_binary() {
                    storage.remove_binary_resource(txn, old)?;
                    self.remove_document_entry(old.name());
                    drop(old_lock);
                    document.set_id(storage.next_resource_id(txn)?);
                    let lock = coll_guard.lock_document(document.id(), LockMode::Write)?;
                    self.insert_document(Arc::clone(&document));
                    (document, lock)
                } else {
                    storage.remove_xml_resource(txn, old, false)?;
                    old.copy_of(&document);
                    indexer.set_document(Arc::clone(old));
                    (Arc::clone(old), old_lock)
                }
            }
            None => {
                document.set_id(storage.next_resource_id(txn)?);
                let lock = coll_guard.lock_document(document.id(), LockMode::Write)?;
                self.insert_document(Arc::clone(&document));
                (document, lock)
            }
        };
        triggers.set_validating(false);
        drop(coll_guard);

        tracing::debug!(doc = %document.uri(), id = %document.id(), "document validated");
        Ok(IndexInfo {
            document,
            indexer,
            triggers,
            creating: old_doc.is_none(),
            old_doc_permissions: old_doc.map(|d| d.permissions()),
            lock: Some(doc_lock),
        })
    }

    /// Store phase of XML ingestion.
    ///
    /// Re-reads `source` (rewinding it where possible), persists the node
    /// structure and releases the document lock, then fires the after
    /// triggers, reloads configuration for configuration documents and
    /// notifies update listeners. A failure after persistence is reported
    /// but not undone.
    pub fn store(
        &self,
        txn: &Txn,
        broker: &Broker,
        info: IndexInfo,
        source: &mut XmlSource,
    ) -> Result<Arc<Document>> {
        let mut info = info;
        let document = Arc::clone(&info.document);
        let doc_lock = info.lock.take();
        if doc_lock.is_none() {
            return Err(DbError::Lock(format!(
                "{} is not write-locked for storing",
                document.uri()
            )));
        }

        let storage = broker.storage();
        let persisted = (|| -> Result<()> {
            source.reset();
            info.indexer.set_validating(false);
            info.indexer.index(source)?;
            let size = info.indexer.doc_size();
            document.update_metadata(|m| m.content_length = size);
            storage.store_xml_resource(txn, &document, info.indexer.as_ref())?;
            storage.flush()
        })();
        drop(doc_lock);
        persisted?;
        tracing::debug!(doc = %document.uri(), id = %document.id(), "document stored");

        if info.creating {
            info.triggers.after_create_document(txn, &document)?;
        } else {
            info.triggers.after_update_document(txn, &document)?;
        }

        if self.is_config_document(broker, document.name()) {
            self.reload_configuration(broker)?;
        }

        broker.database().notify(
            &document,
            if info.creating {
                UpdateEvent::Add
            } else {
                UpdateEvent::Update
            },
        );
        Ok(document)
    }

    fn reload_configuration(&self, broker: &Broker) -> Result<()> {
        let Some(manager) = broker.database().configuration_manager() else {
            return Ok(());
        };
        manager.invalidate(self.path());
        manager
            .load_configuration(broker, self)
            .map_err(|e| match e {
                DbError::CollectionConfiguration(_) => e,
                other => DbError::CollectionConfiguration(format!(
                    "failed to load configuration of {}: {}",
                    self.path(),
                    other
                )),
            })
    }

    /// Stores a binary resource in a single phase, replacing any existing
    /// resource of the same name. A replaced resource always gets a new id.
    pub fn add_binary_resource(
        &self,
        txn: &Txn,
        broker: &Broker,
        name: &str,
        data: &[u8],
        options: BinaryOptions,
    ) -> Result<Arc<Document>> {
        validate_name(name)?;
        self.check_not_read_only(broker)?;

        let coll_guard = self.lock(broker, LockMode::Write)?;
        let old_doc = self.get_document_no_lock(name);
        self.check_permissions_for_add(broker, old_doc.as_deref())?;
        self.check_collection_conflict(name)?;

        let db = broker.database();
        let blob = Arc::new(Document::new_binary(
            self.path().clone(),
            name,
            Permission::for_subject(broker.subject(), db.config().default_resource_mode),
        ));
        Self::manage_document_information(old_doc.as_deref(), &blob);
        blob.update_metadata(|m| {
            m.mime_type = options
                .mime_type
                .clone()
                .unwrap_or_else(|| BINARY_MIME_TYPE.to_string());
            m.content_length = data.len() as u64;
            if let Some(created) = options.created {
                m.created = created;
            }
            if let Some(modified) = options.modified {
                m.last_modified = modified;
            }
        });

        let triggers = self.document_triggers(broker);
        match &old_doc {
            Some(old) => triggers.before_update_document(txn, old)?,
            None => triggers.before_create_document(txn, &blob.uri())?,
        }

        let storage = broker.storage();
        if let Some(old) = &old_doc {
            if options.modified.is_none() {
                Self::update_modification_time(&blob);
            }
            let old_lock = coll_guard.lock_document(old.id(), LockMode::Write)?;
            if old.is_binary() {
                storage.remove_binary_resource(txn, old)?;
            } else {
                storage.remove_xml_resource(txn, old, true)?;
            }
            self.remove_document_entry(old.name());
            drop(old_lock);
        }

        blob.set_id(storage.next_resource_id(txn)?);
        storage.store_binary_resource(txn, &blob, data)?;
        self.insert_document(Arc::clone(&blob));

        {
            let _read = coll_guard.lock_document(blob.id(), LockMode::Read)?;
            match &old_doc {
                Some(_) => triggers.after_update_document(txn, &blob)?,
                None => triggers.after_create_document(txn, &blob)?,
            }
        }
        drop(coll_guard);

        tracing::debug!(doc = %blob.uri(), id = %blob.id(), "binary resource stored");
        db.notify(
            &blob,
            if old_doc.is_some() {
                UpdateEvent::Update
            } else {
                UpdateEvent::Add
            },
        );
        Ok(blob)
    }

    /// Removes an XML document. Missing documents are ignored.
    pub fn remove_xml_resource(&self, txn: &Txn, broker: &Broker, name: &str) -> Result<()> {
        self.check(broker, WRITE)?;
        self.check_not_read_only(broker)?;
        let coll_guard = self.lock(broker, LockMode::Write)?;
        let Some(doc) = self.get_document_no_lock(name) else {
            return Ok(());
        };
        if doc.is_binary() {
            return Err(DbError::Conflict(format!("{} is a binary resource", doc.uri())));
        }
        let doc_lock = coll_guard.lock_document(doc.id(), LockMode::Write)?;
        self.remove_locked(txn, broker, &doc)?;
        drop(doc_lock);
        drop(coll_guard);
        Ok(())
    }

    /// Removes a binary resource. Missing resources are ignored; a resource
    /// write-locked by someone else is refused.
    pub fn remove_binary_resource(&self, txn: &Txn, broker: &Broker, name: &str) -> Result<()> {
        self.check(broker, WRITE)?;
        self.check_not_read_only(broker)?;
        let coll_guard = self.lock(broker, LockMode::Write)?;
        let Some(doc) = self.get_document_no_lock(name) else {
            return Ok(());
        };
        if !doc.is_binary() {
            return Err(DbError::Conflict(format!("{} is not a binary resource", doc.uri())));
        }
        let writer = broker.locks().document_snapshot(doc.id()).writer;
        if writer.is_some_and(|owner| owner != broker.owner()) {
            return Err(DbError::PermissionDenied(format!(
                "{} is locked for write",
                doc.uri()
            )));
        }
        let doc_lock = coll_guard.lock_document(doc.id(), LockMode::Write)?;
        self.remove_locked(txn, broker, &doc)?;
        drop(doc_lock);
        drop(coll_guard);
        Ok(())
    }

    /// Removes `doc` whatever its type.
    pub fn remove_resource(&self, txn: &Txn, broker: &Broker, doc: &Document) -> Result<()> {
        if doc.is_binary() {
            self.remove_binary_resource(txn, broker, doc.name())
        } else {
            self.remove_xml_resource(txn, broker, doc.name())
        }
    }

    /// Caller holds the collection and document WRITE locks.
    fn remove_locked(&self, txn: &Txn, broker: &Broker, doc: &Arc<Document>) -> Result<()> {
        let is_config = self.is_config_document(broker, doc.name());
        let triggers = if is_config {
            DocumentTriggers::new(Vec::new(), self.path().clone(), false)
        } else {
            self.document_triggers(broker)
        };
        if is_config {
            if let Some(manager) = broker.database().configuration_manager() {
                manager.invalidate(self.path());
            }
        }

        triggers.before_delete_document(txn, doc)?;
        let storage = broker.storage();
        if doc.is_binary() {
            storage.remove_binary_resource(txn, doc)?;
        } else {
            storage.remove_xml_resource(txn, doc, true)?;
        }
        self.remove_document_entry(doc.name());
        triggers.after_delete_document(txn, &doc.uri())?;

        tracing::debug!(doc = %doc.uri(), id = %doc.id(), "document removed");
        broker.database().notify(doc, UpdateEvent::Remove);
        Ok(())
    }

    /// Reads back a document's stored bytes. Requires READ on the document.
    pub fn read_resource(&self, broker: &Broker, name: &str) -> Result<Option<bytes::Bytes>> {
        let Some(locked) = self.get_document_with_lock(broker, name, LockMode::Read)? else {
            return Ok(None);
        };
        let data = broker.storage().read_resource(locked.document());
        locked.release()?;
        data
    }
}
