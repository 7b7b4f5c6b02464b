//! Reentrant read/write locks for collections and documents.
//!
//! Collection locks are keyed by path and document locks by doc id; the
//! two key spaces are independent. Locks are reentrant per [`LockOwner`]:
//! an owner holding WRITE may take READ or WRITE again, and an owner that
//! is the only reader may upgrade to WRITE. Waiting writers block new
//! readers so writers are not starved.
//!
//! Acquisition returns RAII guards that release on drop. A document guard
//! can only be obtained from a held [`CollectionLockGuard`], which fixes the
//! collection-then-document acquisition order at the type level. Table
//! entries live only while some guard references them.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::types::{DocId, LockOwner};
use crate::uri::CollectionPath;

/// Requested lock strength.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// No lock; guards in this mode release nothing.
    NoLock,
    /// Shared lock, multiple readers allowed.
    Read,
    /// Exclusive lock, only one writer allowed.
    Write,
}

/// What a lock protects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// A collection, keyed by path.
    Collection(CollectionPath),
    /// A document's update lock, keyed by id.
    Document(DocId),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Collection(path) => write!(f, "collection {}", path),
            LockKey::Document(id) => write!(f, "document {}", id),
        }
    }
}

/// Point-in-time view of a lock's holders.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Distinct owners holding READ.
    pub readers: usize,
    /// Owner holding WRITE, if any.
    pub writer: Option<LockOwner>,
    /// Writers currently blocked.
    pub waiting_writers: usize,
}

#[derive(Default)]
struct LockState {
    writer: Option<LockOwner>,
    write_count: u32,
    readers: HashMap<LockOwner, u32>,
    waiting_writers: usize,
    upgrading: Option<LockOwner>,
}

/// A reentrant read/write lock with per-owner hold counts.
pub(crate) struct ReentrantRwLock {
    key: LockKey,
    state: Mutex<LockState>,
    cond: Condvar,
}

impl ReentrantRwLock {
    /// Creates an unheld lock.
    pub(crate) fn new(key: LockKey) -> Self {
        Self {
            key,
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn key(&self) -> &LockKey {
        &self.key
    }

    /// Blocks until `owner` holds the lock in `mode`.
    pub(crate) fn acquire(&self, owner: LockOwner, mode: LockMode) -> Result<()> {
        match mode {
            LockMode::NoLock => Ok(()),
            LockMode::Read => {
                self.acquire_read(owner);
                Ok(())
            }
            LockMode::Write => self.acquire_write(owner),
        }
    }

    fn acquire_read(&self, owner: LockOwner) {
        let mut st = self.state.lock();
        loop {
            let is_writer = st.writer == Some(owner);
            let reentrant = is_writer || st.readers.contains_key(&owner);
            let writer_free = st.writer.is_none() || is_writer;
            if writer_free && (reentrant || st.waiting_writers == 0) {
                *st.readers.entry(owner).or_insert(0) += 1;
                tracing::trace!(key = %self.key, %owner, "read lock acquired");
                return;
            }
            self.cond.wait(&mut st);
        }
    }

    fn acquire_write(&self, owner: LockOwner) -> Result<()> {
        let mut st = self.state.lock();
        if st.writer == Some(owner) {
            st.write_count += 1;
            return Ok(());
        }

        let upgrading = st.readers.contains_key(&owner);
        if upgrading {
            if let Some(other) = st.upgrading {
                return Err(DbError::Lock(format!(
                    "{} cannot upgrade {} while {} is upgrading",
                    owner, self.key, other
                )));
            }
            st.upgrading = Some(owner);
        }

        st.waiting_writers += 1;
        loop {
            let others_reading = st.readers.keys().any(|o| *o != owner);
            if st.writer.is_none() && !others_reading {
                st.waiting_writers -= 1;
                if upgrading {
                    st.upgrading = None;
                }
                st.writer = Some(owner);
                st.write_count = 1;
                tracing::trace!(key = %self.key, %owner, "write lock acquired");
                return Ok(());
            }
            self.cond.wait(&mut st);
        }
    }

    /// Releases one hold of `mode` by `owner`.
    pub(crate) fn release(&self, owner: LockOwner, mode: LockMode) -> Result<()> {
        let mut st = self.state.lock();
        match mode {
            LockMode::NoLock => return Ok(()),
            LockMode::Read => {
                let count = st.readers.get_mut(&owner).ok_or_else(|| {
                    DbError::Lock(format!("{} does not hold a read lock on {}", owner, self.key))
                })?;
                *count -= 1;
                if *count == 0 {
                    st.readers.remove(&owner);
                }
            }
            LockMode::Write => {
                if st.writer != Some(owner) {
                    return Err(DbError::Lock(format!(
                        "{} does not hold the write lock on {}",
                        owner, self.key
                    )));
                }
                st.write_count -= 1;
                if st.write_count == 0 {
                    st.writer = None;
                }
            }
        }
        tracing::trace!(key = %self.key, %owner, ?mode, "lock released");
        drop(st);
        self.cond.notify_all();
        Ok(())
    }

    /// True if any owner holds the lock in any mode.
    pub(crate) fn is_locked(&self) -> bool {
        let st = self.state.lock();
        st.writer.is_some() || !st.readers.is_empty()
    }

    pub(crate) fn is_locked_for_write(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    pub(crate) fn snapshot(&self) -> LockSnapshot {
        let st = self.state.lock();
        LockSnapshot {
            readers: st.readers.len(),
            writer: st.writer,
            waiting_writers: st.waiting_writers,
        }
    }
}

/// A held lock, released on drop. The table entry is discarded once the
/// last guard referencing an unheld lock goes away.
struct LockGuard {
    lock: Arc<ReentrantRwLock>,
    manager: Arc<LockManager>,
    owner: LockOwner,
    mode: LockMode,
    released: bool,
}

impl LockGuard {
    fn acquire(
        manager: &Arc<LockManager>,
        lock: Arc<ReentrantRwLock>,
        owner: LockOwner,
        mode: LockMode,
    ) -> Result<Self> {
        if let Err(e) = lock.acquire(owner, mode) {
            manager.discard_if_idle(&lock);
            return Err(e);
        }
        Ok(Self {
            lock,
            manager: Arc::clone(manager),
            owner,
            mode,
            released: false,
        })
    }

    fn release_once(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let result = self.lock.release(self.owner, self.mode);
        self.manager.discard_if_idle(&self.lock);
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_once() {
            tracing::error!(key = %self.lock.key(), error = %e, "failed to release lock");
        }
    }
}

/// A held collection lock. Document locks are taken through it.
pub struct CollectionLockGuard {
    guard: LockGuard,
    path: CollectionPath,
}

impl CollectionLockGuard {
    /// Path of the locked collection.
    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    /// Mode this guard holds.
    pub fn mode(&self) -> LockMode {
        self.guard.mode
    }

    /// Owner the lock is held for.
    pub fn owner(&self) -> LockOwner {
        self.guard.owner
    }

    /// Acquires the update lock of `doc` for the same owner.
    ///
    /// The returned guard is independent of this one and may outlive it.
    /// This is the only way to lock a document:
    ///
    /// ```compile_fail
    /// use arbor_collections::{DocId, LockManager};
    ///
    /// let locks = LockManager::new();
    /// let _lock = locks.document_lock(DocId::new(1));
    /// ```
    pub fn lock_document(&self, doc: DocId, mode: LockMode) -> Result<DocumentLockGuard> {
        if !doc.is_known() {
            return Err(DbError::Lock(format!(
                "cannot lock a document without an id in {}",
                self.path
            )));
        }
        let manager = &self.guard.manager;
        let lock = manager.document_lock(doc);
        Ok(DocumentLockGuard {
            guard: LockGuard::acquire(manager, lock, self.guard.owner, mode)?,
            doc,
        })
    }

    /// Releases the collection lock now, reporting a failed release.
    pub fn release(mut self) -> Result<()> {
        self.guard.release_once()
    }
}

/// A held document update lock.
pub struct DocumentLockGuard {
    guard: LockGuard,
    doc: DocId,
}

impl DocumentLockGuard {
    /// Id of the locked document.
    pub fn doc_id(&self) -> DocId {
        self.doc
    }

    /// Mode this guard holds.
    pub fn mode(&self) -> LockMode {
        self.guard.mode
    }

    /// Releases the document lock now, reporting a failed release.
    pub fn release(mut self) -> Result<()> {
        self.guard.release_once()
    }
}

/// Lock tables for collection paths and document ids.
pub struct LockManager {
    collections: DashMap<CollectionPath, Arc<ReentrantRwLock>>,
    documents: DashMap<DocId, Arc<ReentrantRwLock>>,
}

impl LockManager {
    /// Creates a new LockManager.
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            documents: DashMap::new(),
        }
    }

    /// Returns the lock for `path`, creating it on first use.
    fn collection_lock(&self, path: &CollectionPath) -> Arc<ReentrantRwLock> {
        self.collections
            .entry(path.clone())
            .or_insert_with(|| Arc::new(ReentrantRwLock::new(LockKey::Collection(path.clone()))))
            .value()
            .clone()
    }

    /// Returns the update lock for `doc`, creating it on first use.
    fn document_lock(&self, doc: DocId) -> Arc<ReentrantRwLock> {
        self.documents
            .entry(doc)
            .or_insert_with(|| Arc::new(ReentrantRwLock::new(LockKey::Document(doc))))
            .value()
            .clone()
    }

    /// Blocks until `owner` holds the lock on `path` in `mode`.
    pub fn acquire_collection_lock(
        self: &Arc<Self>,
        path: &CollectionPath,
        owner: LockOwner,
        mode: LockMode,
    ) -> Result<CollectionLockGuard> {
        let lock = self.collection_lock(path);
        Ok(CollectionLockGuard {
            guard: LockGuard::acquire(self, lock, owner, mode)?,
            path: path.clone(),
        })
    }

    /// Drops the table entry of `lock` if it is unheld and referenced only
    /// by the table and the caller. Entries are cloned under the same shard
    /// lock, so no waiter can hold a discarded lock.
    fn discard_if_idle(&self, lock: &Arc<ReentrantRwLock>) {
        let idle = |l: &Arc<ReentrantRwLock>| {
            Arc::ptr_eq(l, lock) && Arc::strong_count(l) <= 2 && !l.is_locked()
        };
        let removed = match lock.key() {
            LockKey::Collection(path) => self.collections.remove_if(path, |_, l| idle(l)).is_some(),
            LockKey::Document(doc) => self.documents.remove_if(doc, |_, l| idle(l)).is_some(),
        };
        if removed {
            tracing::trace!(key = %lock.key(), "idle lock entry discarded");
        }
    }

    /// True if any owner holds the lock on `path`.
    pub fn is_collection_locked(&self, path: &CollectionPath) -> bool {
        self.collections
            .get(path)
            .map(|l| l.is_locked())
            .unwrap_or(false)
    }

    /// True if some owner holds the update lock of `doc` in WRITE mode.
    pub fn is_document_locked_for_write(&self, doc: DocId) -> bool {
        self.documents
            .get(&doc)
            .map(|l| l.is_locked_for_write())
            .unwrap_or(false)
    }

    /// Holders of the lock on `path`; empty if the lock is not in use.
    pub fn collection_snapshot(&self, path: &CollectionPath) -> LockSnapshot {
        self.collections
            .get(path)
            .map(|l| l.snapshot())
            .unwrap_or_default()
    }

    /// Holders of the update lock of `doc`; empty if the lock is not in use.
    pub fn document_snapshot(&self, doc: DocId) -> LockSnapshot {
        self.documents
            .get(&doc)
            .map(|l| l.snapshot())
            .unwrap_or_default()
    }

    /// Number of collection lock entries currently in use.
    pub fn collection_lock_count(&self) -> usize {
        self.collections.len()
    }

    /// Number of document lock entries currently in use.
    pub fn document_lock_count(&self) -> usize {
        self.documents.len()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
