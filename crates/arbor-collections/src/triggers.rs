//! Document lifecycle hooks and update notifications.

use std::sync::Arc;

use crate::broker::Txn;
use crate::document::Document;
use crate::error::{DbError, Result};
use crate::uri::CollectionPath;

/// Context handed to every trigger invocation.
pub struct TriggerContext<'a> {
    /// Transaction the operation runs in.
    pub txn: &'a Txn,
    /// Collection the document belongs to.
    pub collection: &'a CollectionPath,
    /// True during the validate phase of XML ingestion, when nothing has
    /// been persisted yet.
    pub validating: bool,
}

/// Callbacks fired around document creation, update and deletion.
///
/// A `before_*` failure aborts the operation before anything is mutated.
/// An `after_*` failure is reported to the caller but cannot undo work that
/// has already been persisted.
pub trait DocumentTrigger: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str {
        "trigger"
    }

    /// Called before a new document is registered.
    fn before_create_document(&self, _ctx: &TriggerContext<'_>, _uri: &str) -> Result<()> {
        Ok(())
    }

    /// Called after a new document is stored.
    fn after_create_document(&self, _ctx: &TriggerContext<'_>, _doc: &Document) -> Result<()> {
        Ok(())
    }

    /// Called before an existing document is replaced.
    fn before_update_document(&self, _ctx: &TriggerContext<'_>, _doc: &Document) -> Result<()> {
        Ok(())
    }

    /// Called after an existing document is replaced.
    fn after_update_document(&self, _ctx: &TriggerContext<'_>, _doc: &Document) -> Result<()> {
        Ok(())
    }

    /// Called before a document is removed.
    fn before_delete_document(&self, _ctx: &TriggerContext<'_>, _doc: &Document) -> Result<()> {
        Ok(())
    }

    /// Called after a document is removed.
    fn after_delete_document(&self, _ctx: &TriggerContext<'_>, _uri: &str) -> Result<()> {
        Ok(())
    }
}

/// Dispatches to the triggers registered for one collection.
pub struct DocumentTriggers {
    triggers: Vec<Arc<dyn DocumentTrigger>>,
    collection: CollectionPath,
    validating: bool,
}

impl DocumentTriggers {
    /// Builds a dispatcher; a disabled dispatcher fires nothing.
    pub fn new(
        triggers: Vec<Arc<dyn DocumentTrigger>>,
        collection: CollectionPath,
        enabled: bool,
    ) -> Self {
        Self {
            triggers: if enabled { triggers } else { Vec::new() },
            collection,
            validating: false,
        }
    }

    /// Sets the validating flag passed to triggers.
    pub fn set_validating(&mut self, validating: bool) {
        self.validating = validating;
    }

    /// True while the validate phase is running.
    pub fn is_validating(&self) -> bool {
        self.validating
    }

    /// True if no triggers apply.
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    fn fire(
        &self,
        txn: &Txn,
        hook: &str,
        f: impl Fn(&dyn DocumentTrigger, &TriggerContext<'_>) -> Result<()>,
    ) -> Result<()> {
        let ctx = TriggerContext {
            txn,
            collection: &self.collection,
            validating: self.validating,
        };
        for trigger in &self.triggers {
            f(trigger.as_ref(), &ctx).map_err(|e| match e {
                DbError::Trigger(_) => e,
                other => DbError::Trigger(format!("{} in {}: {}", trigger.name(), hook, other)),
            })?;
        }
        Ok(())
    }

    /// Fires `before_create_document` on every trigger.
    pub fn before_create_document(&self, txn: &Txn, uri: &str) -> Result<()> {
        self.fire(txn, "before_create_document", |t, ctx| {
            t.before_create_document(ctx, uri)
        })
    }

    /// Fires `after_create_document` on every trigger.
    pub fn after_create_document(&self, txn: &Txn, doc: &Document) -> Result<()> {
        self.fire(txn, "after_create_document", |t, ctx| {
            t.after_create_document(ctx, doc)
        })
    }

    /// Fires `before_update_document` on every trigger.
    pub fn before_update_document(&self, txn: &Txn, doc: &Document) -> Result<()> {
        self.fire(txn, "before_update_document", |t, ctx| {
            t.before_update_document(ctx, doc)
        })
    }

    /// Fires `after_update_document` on every trigger.
    pub fn after_update_document(&self, txn: &Txn, doc: &Document) -> Result<()> {
        self.fire(txn, "after_update_document", |t, ctx| {
            t.after_update_document(ctx, doc)
        })
    }

    /// Fires `before_delete_document` on every trigger.
    pub fn before_delete_document(&self, txn: &Txn, doc: &Document) -> Result<()> {
        self.fire(txn, "before_delete_document", |t, ctx| {
            t.before_delete_document(ctx, doc)
        })
    }

    /// Fires `after_delete_document` on every trigger.
    pub fn after_delete_document(&self, txn: &Txn, uri: &str) -> Result<()> {
        self.fire(txn, "after_delete_document", |t, ctx| {
            t.after_delete_document(ctx, uri)
        })
    }
}

/// Kind of change reported to update listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateEvent {
    /// A new document became visible.
    Add,
    /// An existing document was replaced.
    Update,
    /// A document was removed.
    Remove,
}

/// Receives a notification after every completed document change.
pub trait UpdateListener: Send + Sync {
    /// Called once a document change has completed.
    fn document_updated(&self, doc: &Document, event: UpdateEvent);
}
