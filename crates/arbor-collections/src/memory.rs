//! In-memory backends: storage, indexer, configuration cache and an update
//! listener that records what it sees.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::broker::{Broker, ConfigurationManager, Indexer, StorageBroker, Txn, XmlSource};
use crate::collection::Collection;
use crate::document::{Document, DocumentMetadata, ResourceType};
use crate::error::{DbError, Result};
use crate::permission::Permission;
use crate::triggers::{UpdateEvent, UpdateListener};
use crate::types::{CollectionId, DocId};
use crate::uri::CollectionPath;

#[derive(Clone)]
struct StoredResource {
    id: DocId,
    resource_type: ResourceType,
    permissions: Permission,
    metadata: DocumentMetadata,
    content: Bytes,
}

/// A [`StorageBroker`] keeping everything in concurrent maps.
pub struct MemoryStorage {
    next_doc_id: AtomicI32,
    next_collection_id: AtomicI32,
    resources: DashMap<(CollectionPath, String), StoredResource>,
    collections: DashMap<CollectionPath, Bytes>,
    flushes: AtomicUsize,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            next_doc_id: AtomicI32::new(1),
            next_collection_id: AtomicI32::new(0),
            resources: DashMap::new(),
            collections: DashMap::new(),
            flushes: AtomicUsize::new(0),
        }
    }

    /// Hands out the next collection id without a transaction.
    pub fn allocate_collection_id(&self) -> CollectionId {
        CollectionId::new(self.next_collection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of stored documents across all collections.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// True if a collection record is stored for `path`.
    pub fn has_collection_record(&self, path: &CollectionPath) -> bool {
        self.collections.contains_key(path)
    }

    /// Number of `flush` calls so far.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    fn key(doc: &Document) -> (CollectionPath, String) {
        (doc.collection_path().clone(), doc.name().to_string())
    }

    fn put(&self, doc: &Document, content: Bytes) {
        self.resources.insert(
            Self::key(doc),
            StoredResource {
                id: doc.id(),
                resource_type: doc.resource_type(),
                permissions: doc.permissions(),
                metadata: doc.metadata(),
                content,
            },
        );
    }

    fn take(&self, doc: &Document) {
        let key = Self::key(doc);
        if self
            .resources
            .remove_if(&key, |_, stored| stored.id == doc.id())
            .is_none()
        {
            tracing::debug!(doc = %doc.uri(), "no stored content to remove");
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBroker for MemoryStorage {
    fn next_resource_id(&self, _txn: &Txn) -> Result<DocId> {
        Ok(DocId::new(self.next_doc_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn next_collection_id(&self, _txn: &Txn) -> Result<CollectionId> {
        Ok(self.allocate_collection_id())
    }

    fn new_indexer(&self, _txn: &Txn) -> Box<dyn Indexer> {
        Box::new(MemoryIndexer::new())
    }

    fn store_xml_resource(&self, _txn: &Txn, doc: &Document, indexer: &dyn Indexer) -> Result<()> {
        if indexer.is_validating() {
            return Err(DbError::Storage(format!(
                "indexer for {} is still validating",
                doc.uri()
            )));
        }
        self.put(doc, indexer.node_image());
        Ok(())
    }

    fn remove_xml_resource(&self, _txn: &Txn, doc: &Document, free_doc_id: bool) -> Result<()> {
        tracing::trace!(doc = %doc.uri(), free_doc_id, "removing xml resource");
        self.take(doc);
        Ok(())
    }

    fn store_binary_resource(&self, _txn: &Txn, doc: &Document, data: &[u8]) -> Result<()> {
        self.put(doc, Bytes::copy_from_slice(data));
        Ok(())
    }

    fn remove_binary_resource(&self, _txn: &Txn, doc: &Document) -> Result<()> {
        self.take(doc);
        Ok(())
    }

    fn read_resource(&self, doc: &Document) -> Result<Option<Bytes>> {
        Ok(self
            .resources
            .get(&Self::key(doc))
            .filter(|stored| stored.id == doc.id())
            .map(|stored| stored.content.clone()))
    }

    fn save_collection(&self, _txn: &Txn, path: &CollectionPath, record: Bytes) -> Result<()> {
        self.collections.insert(path.clone(), record);
        Ok(())
    }

    fn load_collection(&self, path: &CollectionPath) -> Result<Option<Bytes>> {
        Ok(self.collections.get(path).map(|r| r.value().clone()))
    }

    fn remove_collection(&self, _txn: &Txn, path: &CollectionPath) -> Result<()> {
        self.collections.remove(path);
        self.resources.retain(|(coll, _), _| coll != path);
        Ok(())
    }

    fn collection_resources(
        &self,
        path: &CollectionPath,
        sink: &mut dyn FnMut(Document) -> Result<()>,
    ) -> Result<()> {
        let stored: Vec<(String, StoredResource)> = self
            .resources
            .iter()
            .filter(|e| &e.key().0 == path)
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect();
        for (name, res) in stored {
            sink(Document::restore(
                path.clone(),
                &name,
                res.resource_type,
                res.id,
                res.permissions,
                res.metadata,
            ))?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// An [`Indexer`] that only checks tag balance.
///
/// Good enough to tell well-formed test input from broken input; the node
/// image it produces is the document text itself.
pub struct MemoryIndexer {
    document: Option<Arc<Document>>,
    validating: bool,
    size: u64,
    image: Bytes,
}

impl MemoryIndexer {
    /// Creates an indexer with no document set.
    pub fn new() -> Self {
        Self {
            document: None,
            validating: false,
            size: 0,
            image: Bytes::new(),
        }
    }
}

impl Default for MemoryIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for MemoryIndexer {
    fn set_document(&mut self, doc: Arc<Document>) {
        self.document = Some(doc);
    }

    fn document(&self) -> Option<Arc<Document>> {
        self.document.clone()
    }

    fn set_validating(&mut self, validating: bool) {
        self.validating = validating;
    }

    fn is_validating(&self) -> bool {
        self.validating
    }

    fn doc_size(&self) -> u64 {
        self.size
    }

    fn index(&mut self, source: &mut XmlSource) -> Result<()> {
        let text = source.read_to_string()?;
        check_well_formed(&text).map_err(|reason| {
            let uri = self
                .document
                .as_ref()
                .map(|d| d.uri())
                .unwrap_or_default();
            DbError::Storage(format!("{} is not well-formed: {}", uri, reason))
        })?;
        self.size = text.len() as u64;
        if !self.validating {
            self.image = Bytes::from(text);
        }
        Ok(())
    }

    fn node_image(&self) -> Bytes {
        self.image.clone()
    }
}

fn check_well_formed(text: &str) -> std::result::Result<(), String> {
    let mut open: Vec<&str> = Vec::new();
    let mut roots = 0;
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        let outside = &rest[..start];
        if open.is_empty() && !outside.trim().is_empty() {
            return Err("text outside the root element".to_string());
        }
        let tag_area = &rest[start + 1..];
        let (terminator, skip) = if tag_area.starts_with("!--") {
            ("-->", 3)
        } else if tag_area.starts_with('?') {
            ("?>", 2)
        } else {
            (">", 1)
        };
        let end = tag_area
            .find(terminator)
            .ok_or_else(|| "unterminated markup".to_string())?;
        let tag = &tag_area[..end];
        rest = &tag_area[end + skip..];

        if tag.starts_with('!') || tag.starts_with('?') {
            continue;
        }
        if let Some(closing) = tag.strip_prefix('/') {
            let name = closing.trim();
            match open.pop() {
                Some(expected) if expected == name => {}
                Some(expected) => return Err(format!("expected </{}>, found </{}>", expected, name)),
                None => return Err(format!("unexpected </{}>", name)),
            }
            continue;
        }

        let self_closing = tag.ends_with('/');
        let body = tag.trim_end_matches('/');
        let name = body.split_whitespace().next().unwrap_or_default();
        if name.is_empty() {
            return Err("empty tag".to_string());
        }
        if open.is_empty() {
            roots += 1;
            if roots > 1 {
                return Err("more than one root element".to_string());
            }
        }
        if !self_closing {
            open.push(name);
        }
    }
    if !rest.trim().is_empty() && open.is_empty() {
        return Err("text outside the root element".to_string());
    }
    if let Some(unclosed) = open.last() {
        return Err(format!("unclosed element <{}>", unclosed));
    }
    if roots == 0 {
        return Err("no root element".to_string());
    }
    Ok(())
}

/// A [`ConfigurationManager`] that counts invalidations and remembers which
/// configuration documents each collection holds.
#[derive(Default)]
pub struct MemoryConfigurationManager {
    invalidations: AtomicUsize,
    loads: AtomicUsize,
    loaded: Mutex<HashMap<CollectionPath, Vec<String>>>,
}

impl MemoryConfigurationManager {
    /// Creates a manager with no loaded configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `invalidate` calls so far.
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Number of `load_configuration` calls so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Configuration document names found by the last load of `path`.
    pub fn loaded(&self, path: &CollectionPath) -> Option<Vec<String>> {
        self.loaded.lock().get(path).cloned()
    }
}

impl ConfigurationManager for MemoryConfigurationManager {
    fn invalidate(&self, path: &CollectionPath) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.loaded.lock().retain(|p, _| !p.starts_with(path));
    }

    fn load_configuration(&self, broker: &Broker, collection: &Collection) -> Result<()> {
        let config = broker.database().config();
        let names: Vec<String> = collection
            .document_names(broker)?
            .into_iter()
            .filter(|n| config.is_config_name(n))
            .collect();
        for name in &names {
            let content = collection.read_resource(broker, name)?.unwrap_or_default();
            if content.is_empty() {
                return Err(DbError::CollectionConfiguration(format!(
                    "configuration document {} is empty",
                    collection.path().resource_uri(name)
                )));
            }
        }
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.loaded.lock().insert(collection.path().clone(), names);
        Ok(())
    }
}

/// An [`UpdateListener`] that keeps every event it receives.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(String, UpdateEvent)>>,
}

impl RecordingListener {
    /// Creates a listener with no recorded events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far as `(uri, event)` pairs.
    pub fn events(&self) -> Vec<(String, UpdateEvent)> {
        self.events.lock().clone()
    }
}

impl UpdateListener for RecordingListener {
    fn document_updated(&self, doc: &Document, event: UpdateEvent) {
        self.events.lock().push((doc.uri(), event));
    }
}
