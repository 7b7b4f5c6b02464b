//! Binary form of a collection record.
//!
//! Layout: `[int id][int count]{utf name}*[permission][long created]`.
//! Documents are not part of the record; they are re-attached from the
//! storage layer's document directory after the record is read.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::broker::Broker;
use crate::codec::{VariableByteInput, VariableByteOutput};
use crate::collection::Collection;
use crate::document::Document;
use crate::error::{DbError, Result};
use crate::locking::LockMode;
use crate::permission::Permission;
use crate::types::CollectionId;
use crate::uri::CollectionPath;

impl Collection {
    /// Writes this collection's record under a READ lock.
    pub fn write_to(&self, broker: &Broker, out: &mut VariableByteOutput) -> Result<()> {
        let _guard = self.lock(broker, LockMode::Read)?;
        let names = self.sub_collection_names_no_lock();
        out.write_int(self.id().as_i32());
        out.write_int(names.len() as i32);
        for name in &names {
            out.write_utf(name);
        }
        self.permissions().write_to(out);
        out.write_long(self.created());
        Ok(())
    }

    /// Encodes this collection's record.
    pub fn serialize(&self, broker: &Broker) -> Result<Bytes> {
        let mut out = VariableByteOutput::new();
        self.write_to(broker, &mut out)?;
        Ok(out.finish())
    }

    /// Reads a record for the collection at `path`.
    ///
    /// The acting subject must hold EXECUTE on the decoded permissions;
    /// otherwise the half-built collection is discarded. Documents are not
    /// attached; see [`Collection::attach_documents`].
    pub fn read_from(
        broker: &Broker,
        path: CollectionPath,
        input: &mut VariableByteInput,
    ) -> Result<Collection> {
        let id = input.read_int()?;
        if id < 0 {
            return Err(DbError::Codec(format!(
                "invalid collection id {} for {}",
                id, path
            )));
        }
        let config = broker.database().config();
        let collection = Collection::new(
            config,
            path,
            Permission::new(broker.subject().id(), broker.subject().default_group(), 0),
        );
        let guard = collection.lock(broker, LockMode::Write)?;

        let count = input.read_int()?;
        if count < 0 {
            return Err(DbError::Codec(format!(
                "invalid sub-collection count {}",
                count
            )));
        }
        let mut names = BTreeSet::new();
        for _ in 0..count {
            names.insert(input.read_utf()?);
        }
        let permissions = Permission::read_from(input)?;
        let created = input.read_long()?;
        collection.restore(CollectionId::new(id), names, permissions, created);

        collection.requires_execute(broker)?;
        drop(guard);
        Ok(collection)
    }

    /// Decodes a record produced by [`Collection::serialize`].
    pub fn deserialize(broker: &Broker, path: CollectionPath, record: Bytes) -> Result<Collection> {
        let mut input = VariableByteInput::new(record);
        Collection::read_from(broker, path, &mut input)
    }

    /// Re-attaches the stored documents of this collection.
    pub fn attach_documents(&self, broker: &Broker) -> Result<usize> {
        let _guard = self.lock(broker, LockMode::Write)?;
        let mut injector = DocumentInjector { collection: self, count: 0 };
        broker
            .storage()
            .collection_resources(self.path(), &mut |doc| injector.add_document(doc))?;
        Ok(injector.count)
    }
}

/// Callback target used while re-attaching stored documents.
pub struct DocumentInjector<'a> {
    collection: &'a Collection,
    count: usize,
}

impl DocumentInjector<'_> {
    /// Registers a stored document. Only documents that already carry an
    /// id are accepted.
    pub fn add_document(&mut self, doc: Document) -> Result<()> {
        if !doc.id().is_known() {
            return Err(DbError::Storage(format!(
                "document {} must have an id",
                doc.uri()
            )));
        }
        self.collection.insert_document(Arc::new(doc));
        self.count += 1;
        Ok(())
    }
}
