#![warn(missing_docs)]

//! Arbor collection subsystem: collection tree, permissions, locking and document ingestion
//!
//! This crate holds the in-memory collection nodes of a hierarchical
//! XML/binary document store, the POSIX-plus-ACL permission model that
//! guards them, reentrant collection and document locks, the two-phase
//! validate/store ingestion protocol and the binary collection record codec.

pub mod acl;
pub mod arena;
pub mod broker;
pub mod codec;
pub mod collection;
pub mod config;
pub mod database;
pub mod doc_table;
pub mod document;
pub mod error;
pub mod ingest;
pub mod locking;
pub mod memory;
pub mod mode;
pub mod permission;
pub mod persist;
pub mod subject;
pub mod triggers;
pub mod types;
pub mod uri;

pub use acl::{Ace, AceAccess, AceTarget, Acl};
pub use arena::{ArenaStats, CollectionArena};
pub use broker::{Broker, ConfigurationManager, DomNode, Indexer, OneShot, SourceStream, StorageBroker, Txn, XmlSource};
pub use codec::{VariableByteInput, VariableByteOutput};
pub use collection::{Collection, CollectionEntry, LockedDocument};
pub use config::DatabaseConfig;
pub use database::Database;
pub use doc_table::{DocumentSet, DocumentTable};
pub use document::{Document, DocumentMetadata, ResourceType, BINARY_MIME_TYPE, XML_MIME_TYPE};
pub use error::{DbError, Result};
pub use ingest::{BinaryOptions, IndexInfo};
pub use locking::{CollectionLockGuard, DocumentLockGuard, LockKey, LockManager, LockMode, LockSnapshot};
pub use memory::{MemoryConfigurationManager, MemoryIndexer, MemoryStorage, RecordingListener};
pub use permission::Permission;
pub use persist::DocumentInjector;
pub use subject::{MemorySecurityManager, SecurityManager, Subject};
pub use triggers::{DocumentTrigger, DocumentTriggers, TriggerContext, UpdateEvent, UpdateListener};
pub use types::{CollectionId, DocId, GroupId, LockOwner, TxnId, UserId};
pub use uri::{CollectionPath, ROOT_COLLECTION};
