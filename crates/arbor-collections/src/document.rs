//! Stored resources: XML documents and binary blobs.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};

use crate::permission::Permission;
use crate::types::{now_millis, DocId, UserId};
use crate::uri::CollectionPath;

/// Default MIME type of XML documents.
pub const XML_MIME_TYPE: &str = "application/xml";
/// Default MIME type of binary resources.
pub const BINARY_MIME_TYPE: &str = "application/octet-stream";

/// Kind of stored resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// Parsed and indexed XML.
    Xml,
    /// Opaque bytes.
    Binary,
}

/// Descriptive metadata carried forward when a document is replaced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Creation time, epoch millis.
    pub created: i64,
    /// Last modification time, epoch millis.
    pub last_modified: i64,
    /// MIME type of the content.
    pub mime_type: String,
    /// Size of the stored content in bytes.
    pub content_length: u64,
}

impl DocumentMetadata {
    fn new(mime_type: &str) -> Self {
        let now = now_millis();
        Self {
            created: now,
            last_modified: now,
            mime_type: mime_type.to_string(),
            content_length: 0,
        }
    }
}

#[derive(Debug)]
struct DocumentState {
    permissions: Permission,
    metadata: DocumentMetadata,
    user_lock: Option<UserId>,
}

/// A document handle.
///
/// The owning collection is referenced by path only; a document never keeps
/// its collection alive. Mutable state sits behind a short-lived internal
/// lock; the logical update lock lives in the [`LockManager`].
///
/// [`LockManager`]: crate::locking::LockManager
#[derive(Debug)]
pub struct Document {
    id: AtomicI32,
    name: String,
    resource_type: ResourceType,
    collection: CollectionPath,
    state: RwLock<DocumentState>,
}

impl Document {
    /// Creates an XML document shell with no id.
    pub fn new_xml(collection: CollectionPath, name: &str, permissions: Permission) -> Self {
        Self::new(collection, name, ResourceType::Xml, permissions)
    }

    /// Creates a binary resource shell with no id.
    pub fn new_binary(collection: CollectionPath, name: &str, permissions: Permission) -> Self {
        Self::new(collection, name, ResourceType::Binary, permissions)
    }

    fn new(
        collection: CollectionPath,
        name: &str,
        resource_type: ResourceType,
        permissions: Permission,
    ) -> Self {
        let mime = match resource_type {
            ResourceType::Xml => XML_MIME_TYPE,
            ResourceType::Binary => BINARY_MIME_TYPE,
        };
        Self {
            id: AtomicI32::new(DocId::UNKNOWN.as_i32()),
            name: name.to_string(),
            resource_type,
            collection,
            state: RwLock::new(DocumentState {
                permissions,
                metadata: DocumentMetadata::new(mime),
                user_lock: None,
            }),
        }
    }

    /// Rebuilds a previously stored document from its persisted parts.
    pub fn restore(
        collection: CollectionPath,
        name: &str,
        resource_type: ResourceType,
        id: DocId,
        permissions: Permission,
        metadata: DocumentMetadata,
    ) -> Self {
        let doc = Self::new(collection, name, resource_type, permissions);
        doc.set_id(id);
        doc.state.write().metadata = metadata;
        doc
    }

    /// Document id; `DocId::UNKNOWN` until assigned.
    pub fn id(&self) -> DocId {
        DocId::new(self.id.load(Ordering::Acquire))
    }

    pub(crate) fn set_id(&self, id: DocId) {
        self.id.store(id.as_i32(), Ordering::Release);
    }

    /// Document name within its collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// XML or binary.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// True for binary resources.
    pub fn is_binary(&self) -> bool {
        self.resource_type == ResourceType::Binary
    }

    /// Path of the owning collection.
    pub fn collection_path(&self) -> &CollectionPath {
        &self.collection
    }

    /// Full path of the document, e.g. `/db/test/a.xml`.
    pub fn uri(&self) -> String {
        self.collection.resource_uri(&self.name)
    }

    /// Snapshot of the document's permissions.
    pub fn permissions(&self) -> Permission {
        self.state.read().permissions.clone()
    }

    /// Replaces the document's permissions.
    pub fn set_permissions(&self, permissions: Permission) {
        self.state.write().permissions = permissions;
    }

    /// Snapshot of the document's metadata.
    pub fn metadata(&self) -> DocumentMetadata {
        self.state.read().metadata.clone()
    }

    /// Replaces the document's metadata.
    pub fn set_metadata(&self, metadata: DocumentMetadata) {
        self.state.write().metadata = metadata;
    }

    /// Applies `f` to the metadata in place.
    pub fn update_metadata(&self, f: impl FnOnce(&mut DocumentMetadata)) {
        f(&mut self.state.write().metadata);
    }

    /// The user holding an advisory lock on this document, if any.
    pub fn user_lock(&self) -> Option<UserId> {
        self.state.read().user_lock
    }

    /// Sets or clears the user lock marker.
    pub fn set_user_lock(&self, user: Option<UserId>) {
        self.state.write().user_lock = user;
    }

    /// Copies permissions and metadata of `other` onto this document,
    /// keeping this document's id and name.
    pub fn copy_of(&self, other: &Document) {
        let (permissions, metadata) = {
            let src = other.state.read();
            (src.permissions.clone(), src.metadata.clone())
        };
        let mut dst = self.state.write();
        dst.permissions = permissions;
        dst.metadata = metadata;
    }

    /// Rough in-memory footprint in bytes, for cache accounting.
    pub fn memory_size(&self) -> usize {
        let st = self.state.read();
        std::mem::size_of::<Self>()
            + self.name.len()
            + st.metadata.mime_type.len()
            + st.permissions.ace_count() * 16
    }
}
