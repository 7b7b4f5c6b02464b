//! Name-ordered document tables and id-ordered document sets.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::document::Document;
use crate::types::DocId;

/// Child documents of one collection, keyed by name.
///
/// Not synchronized: the owning collection mutates it only while holding
/// its own write lock.
#[derive(Debug, Default)]
pub struct DocumentTable {
    entries: BTreeMap<String, Arc<Document>>,
}

impl DocumentTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `doc` under its name, returning any displaced entry.
    pub fn insert(&mut self, doc: Arc<Document>) -> Option<Arc<Document>> {
        self.entries.insert(doc.name().to_string(), doc)
    }

    /// Removes and returns the document named `name`.
    pub fn remove(&mut self, name: &str) -> Option<Arc<Document>> {
        self.entries.remove(name)
    }

    /// Looks up a document by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Document>> {
        self.entries.get(name)
    }

    /// True if a document named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table holds no documents.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Document names in order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Snapshot of all handles in name order.
    pub fn documents(&self) -> Vec<Arc<Document>> {
        self.entries.values().cloned().collect()
    }

    /// Documents in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.entries.values()
    }
}

/// A set of documents drawn from one or more collections, ordered by id.
#[derive(Debug, Default)]
pub struct DocumentSet {
    docs: BTreeMap<DocId, Arc<Document>>,
}

impl DocumentSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `doc`; returns false if a document with the same id is present.
    pub fn add(&mut self, doc: Arc<Document>) -> bool {
        use std::collections::btree_map::Entry;
        match self.docs.entry(doc.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(doc);
                true
            }
        }
    }

    /// True if a document with `id` is in the set.
    pub fn contains(&self, id: DocId) -> bool {
        self.docs.contains_key(&id)
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// True if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Documents in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.docs.values()
    }

    /// Full paths of the contained documents, in id order.
    pub fn uris(&self) -> Vec<String> {
        self.docs.values().map(|d| d.uri()).collect()
    }
}
