//! Per-request context and the storage-side collaborator interfaces.

use bytes::Bytes;
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::collection::Collection;
use crate::database::Database;
use crate::document::Document;
use crate::error::Result;
use crate::locking::LockManager;
use crate::subject::Subject;
use crate::types::{CollectionId, DocId, LockOwner, TxnId};
use crate::uri::CollectionPath;

/// A database transaction handle.
#[derive(Debug, PartialEq, Eq)]
pub struct Txn {
    id: TxnId,
}

impl Txn {
    /// Wraps a transaction id.
    pub fn new(id: TxnId) -> Self {
        Self { id }
    }

    /// Transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }
}

/// A byte stream that can optionally be rewound for a second parse.
pub trait SourceStream: Read + Send {
    /// Rewinds to the start. Streams that cannot rewind return an error.
    fn reset(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "stream cannot be reset",
        ))
    }
}

impl<T: AsRef<[u8]> + Send> SourceStream for Cursor<T> {
    fn reset(&mut self) -> std::io::Result<()> {
        self.set_position(0);
        Ok(())
    }
}

/// A forward-only stream wrapper.
pub struct OneShot<R>(pub R);

impl<R: Read> Read for OneShot<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Send> SourceStream for OneShot<R> {}

/// An already-built XML node that can be replayed without re-parsing.
pub trait DomNode: Send + Sync + fmt::Debug {
    /// Serializes the node as XML text.
    fn to_xml(&self) -> String;
}

/// Content fed to the indexer.
pub enum XmlSource {
    /// In-memory XML text.
    Text(String),
    /// A byte stream, re-read for the store pass when it supports reset.
    Stream(Box<dyn SourceStream>),
    /// An in-memory node, replayed for the store pass.
    Node(Arc<dyn DomNode>),
}

impl XmlSource {
    /// Rewinds the source before a second pass.
    ///
    /// A stream that cannot rewind is left where it is: the second pass
    /// then sees whatever the stream still yields.
    pub fn reset(&mut self) {
        if let XmlSource::Stream(stream) = self {
            if let Err(e) = stream.reset() {
                tracing::debug!(error = %e, "source stream cannot be re-read");
            }
        }
    }

    /// Reads the whole source as text.
    pub fn read_to_string(&mut self) -> Result<String> {
        match self {
            XmlSource::Text(s) => Ok(s.clone()),
            XmlSource::Stream(stream) => {
                let mut s = String::new();
                stream.read_to_string(&mut s)?;
                Ok(s)
            }
            XmlSource::Node(node) => Ok(node.to_xml()),
        }
    }
}

impl fmt::Debug for XmlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XmlSource::Text(s) => write!(f, "Text({} bytes)", s.len()),
            XmlSource::Stream(_) => f.write_str("Stream"),
            XmlSource::Node(n) => write!(f, "Node({:?})", n),
        }
    }
}

/// Builds index structures for one document from parse events.
///
/// In validating mode the indexer checks well-formedness and index
/// structure without producing anything to persist.
pub trait Indexer: Send {
    /// Sets the document the index entries belong to.
    fn set_document(&mut self, doc: Arc<Document>);
    /// The document being indexed, if set.
    fn document(&self) -> Option<Arc<Document>>;
    /// Switches between the validating pass and the storing pass.
    fn set_validating(&mut self, validating: bool);
    /// True during the validating pass.
    fn is_validating(&self) -> bool;
    /// Size of the last parsed document in bytes.
    fn doc_size(&self) -> u64;
    /// Parses `source` and feeds the events to the index builders.
    fn index(&mut self, source: &mut XmlSource) -> Result<()>;
    /// Node structure produced by the last non-validating pass.
    fn node_image(&self) -> Bytes;
}

/// Physical storage and id generation.
pub trait StorageBroker: Send + Sync {
    /// Allocates a database-wide unique document id.
    fn next_resource_id(&self, txn: &Txn) -> Result<DocId>;

    /// Allocates a collection id.
    fn next_collection_id(&self, txn: &Txn) -> Result<CollectionId>;

    /// Creates an indexer for one ingestion.
    fn new_indexer(&self, txn: &Txn) -> Box<dyn Indexer>;

    /// Persists the node structure the indexer produced for `doc`.
    fn store_xml_resource(&self, txn: &Txn, doc: &Document, indexer: &dyn Indexer) -> Result<()>;

    /// Removes the stored nodes of `doc`. With `free_doc_id` the id may be reused.
    fn remove_xml_resource(&self, txn: &Txn, doc: &Document, free_doc_id: bool) -> Result<()>;

    /// Persists the bytes of a binary resource.
    fn store_binary_resource(&self, txn: &Txn, doc: &Document, data: &[u8]) -> Result<()>;

    /// Deletes the bytes of a binary resource.
    fn remove_binary_resource(&self, txn: &Txn, doc: &Document) -> Result<()>;

    /// Reads back the stored bytes of a document.
    fn read_resource(&self, doc: &Document) -> Result<Option<Bytes>>;

    /// Persists an encoded collection record.
    fn save_collection(&self, txn: &Txn, path: &CollectionPath, record: Bytes) -> Result<()>;

    /// Loads an encoded collection record.
    fn load_collection(&self, path: &CollectionPath) -> Result<Option<Bytes>>;

    /// Deletes the record of the collection at `path`.
    fn remove_collection(&self, txn: &Txn, path: &CollectionPath) -> Result<()>;

    /// Walks the stored documents of a collection, handing each to `sink`.
    fn collection_resources(
        &self,
        path: &CollectionPath,
        sink: &mut dyn FnMut(Document) -> Result<()>,
    ) -> Result<()>;

    /// Makes pending writes durable.
    fn flush(&self) -> Result<()>;
}

/// Cache of parsed collection configuration documents.
pub trait ConfigurationManager: Send + Sync {
    /// Drops cached configuration for `path` and its descendants.
    fn invalidate(&self, path: &CollectionPath);

    /// Re-reads the configuration documents stored in `collection`.
    fn load_configuration(&self, broker: &Broker, collection: &Collection) -> Result<()>;
}

/// Per-request context: who is acting, under which lock owner, on which database.
///
/// Locks taken through one broker are reentrant with each other.
pub struct Broker {
    db: Arc<Database>,
    subject: Subject,
    owner: LockOwner,
}

impl Broker {
    pub(crate) fn new(db: Arc<Database>, subject: Subject, owner: LockOwner) -> Self {
        Self { db, subject, owner }
    }

    /// The acting subject.
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Lock owner shared by every lock this broker takes.
    pub fn owner(&self) -> LockOwner {
        self.owner
    }

    /// The database this broker works on.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The database's lock tables.
    pub fn locks(&self) -> &Arc<LockManager> {
        self.db.locks()
    }

    /// The database's storage backend.
    pub fn storage(&self) -> &Arc<dyn StorageBroker> {
        self.db.storage()
    }

    /// Starts a new transaction.
    pub fn begin_transaction(&self) -> Txn {
        self.db.begin_transaction()
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("subject", &self.subject.name())
            .field("owner", &self.owner)
            .finish()
    }
}
