//! In-memory cache of loaded collections.
//!
//! Entries are keyed by path. When the arena grows past its capacity the
//! least recently used collections are dropped, ordered by reference count
//! first and access tick second. A collection is only evicted if nobody
//! outside the arena holds it, it is not pinned by a reference count, and
//! it allows unloading. The root is never evicted.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::broker::Broker;
use crate::collection::Collection;
use crate::uri::CollectionPath;

/// Arena counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaStats {
    /// Lookups served from the arena.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Collections dropped by eviction.
    pub evictions: u64,
}

/// Path-keyed cache of [`Collection`]s.
pub struct CollectionArena {
    entries: DashMap<CollectionPath, Arc<Collection>>,
    capacity: usize,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CollectionArena {
    /// Creates an empty arena that evicts down to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "created collection arena");
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn touch(&self, collection: &Collection) {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        collection.set_timestamp(tick as i64);
    }

    /// Looks up a cached collection and marks it as recently used.
    pub fn get(&self, path: &CollectionPath) -> Option<Arc<Collection>> {
        match self.entries.get(path) {
            Some(entry) => {
                let collection = Arc::clone(entry.value());
                drop(entry);
                self.touch(&collection);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(collection)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Caches `collection`, replacing any entry at the same path. If another
    /// thread cached the path first, that entry is kept and returned.
    pub fn insert(&self, collection: Arc<Collection>) -> Arc<Collection> {
        let cached = self
            .entries
            .entry(collection.path().clone())
            .or_insert(collection)
            .value()
            .clone();
        self.touch(&cached);
        cached
    }

    /// Drops the entry for `path`, returning it if present.
    pub fn remove(&self, path: &CollectionPath) -> Option<Arc<Collection>> {
        self.entries.remove(path).map(|(_, c)| c)
    }

    /// True if `path` is cached.
    pub fn contains(&self, path: &CollectionPath) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of cached collections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Target entry count for eviction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the hit, miss and eviction counters.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drops least recently used collections until the arena is within
    /// capacity or nothing more can be dropped. Returns how many went.
    pub fn evict(&self, broker: &Broker) -> usize {
        let excess = self.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return 0;
        }

        let mut candidates: Vec<(u32, i64, CollectionPath)> = self
            .entries
            .iter()
            .filter(|e| Self::unloadable(e.value(), broker))
            .map(|e| {
                let c = e.value();
                (c.reference_count(), c.timestamp(), e.key().clone())
            })
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (_, _, path) in candidates.into_iter() {
            if evicted == excess {
                break;
            }
            if self
                .entries
                .remove_if(&path, |_, c| Arc::strong_count(c) == 1)
                .is_some()
            {
                debug!(path = %path, "evicted collection");
                evicted += 1;
            }
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    fn unloadable(collection: &Arc<Collection>, broker: &Broker) -> bool {
        !collection.path().is_root()
            && collection.reference_count() == 0
            && Arc::strong_count(collection) == 1
            && collection.allow_unload(broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::Database;
    use crate::permission::Permission;
    use crate::subject::Subject;
    use crate::types::{GroupId, UserId};

    fn collection(config: &DatabaseConfig, path: &str) -> Arc<Collection> {
        Arc::new(Collection::new(
            config,
            CollectionPath::new(path).unwrap(),
            Permission::new(UserId::new(0), GroupId::new(0), 0o755),
        ))
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let config = DatabaseConfig::default();
        let arena = CollectionArena::new(4);
        arena.insert(collection(&config, "/db/a"));
        assert!(arena.get(&CollectionPath::new("/db/a").unwrap()).is_some());
        assert!(arena.get(&CollectionPath::new("/db/b").unwrap()).is_none());
        let stats = arena.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_insert_keeps_first_entry() {
        let config = DatabaseConfig::default();
        let arena = CollectionArena::new(4);
        let first = arena.insert(collection(&config, "/db/a"));
        let second = arena.insert(collection(&config, "/db/a"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_evict_least_recently_used() {
        let db = Database::in_memory(DatabaseConfig::default());
        let broker = db.broker(Subject::system());
        let config = DatabaseConfig::default();
        let arena = CollectionArena::new(2);
        arena.insert(collection(&config, "/db/a"));
        arena.insert(collection(&config, "/db/b"));
        arena.insert(collection(&config, "/db/c"));
        arena.get(&CollectionPath::new("/db/a").unwrap());

        assert_eq!(arena.evict(&broker), 1);
        assert!(!arena.contains(&CollectionPath::new("/db/b").unwrap()));
        assert!(arena.contains(&CollectionPath::new("/db/a").unwrap()));
        assert!(arena.contains(&CollectionPath::new("/db/c").unwrap()));
        assert_eq!(arena.stats().evictions, 1);
    }

    #[test]
    fn test_evict_skips_pinned_and_held() {
        let db = Database::in_memory(DatabaseConfig::default());
        let broker = db.broker(Subject::system());
        let config = DatabaseConfig::default();
        let arena = CollectionArena::new(1);
        let pinned = arena.insert(collection(&config, "/db/a"));
        pinned.inc_reference_count();
        drop(pinned);
        let _held = arena.insert(collection(&config, "/db/b"));
        arena.insert(collection(&config, "/db/system/config/x"));
        arena.insert(collection(&config, "/db"));

        assert_eq!(arena.evict(&broker), 0);
        assert_eq!(arena.len(), 4);
    }
}
