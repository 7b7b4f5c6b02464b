//! Common fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use arbor_collections::{
    BinaryOptions, Broker, Collection, CollectionPath, Database, DatabaseConfig, DbError, Document,
    DocumentTrigger, GroupId, RecordingListener, Result, Subject, TriggerContext, Txn, UserId,
    XmlSource,
};
use parking_lot::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ADMIN: u32 = 1;
pub const GUEST: u32 = 2;
pub const BOB: u32 = 3;

pub const DBA_GROUP: u32 = 0;
pub const GUEST_GROUP: u32 = 2;
pub const STAFF_GROUP: u32 = 3;

/// Routes crate logs to the test harness; filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

pub fn admin() -> Subject {
    Subject::new(UserId::new(ADMIN), "admin", GroupId::new(DBA_GROUP)).with_dba(true)
}

pub fn guest() -> Subject {
    Subject::new(UserId::new(GUEST), "guest", GroupId::new(GUEST_GROUP))
}

pub fn bob() -> Subject {
    Subject::new(UserId::new(BOB), "bob", GroupId::new(STAFF_GROUP))
}

/// A database with `/db/test` (rwxr-xr-x, owner admin, group dba).
pub struct Fixture {
    pub db: Arc<Database>,
    pub admin: Broker,
    pub coll: Arc<Collection>,
    pub listener: Arc<RecordingListener>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(DatabaseConfig::default())
    }

    pub fn with_config(config: DatabaseConfig) -> Self {
        init_tracing();
        let db = Database::in_memory(config);
        let listener = Arc::new(RecordingListener::new());
        db.add_update_listener(listener.clone());
        let admin = db.broker(admin());
        let txn = admin.begin_transaction();
        let coll = admin.create_collection(&txn, &path("/db/test")).unwrap();
        coll.set_mode_str(&admin, "rwxr-xr-x").unwrap();
        Self {
            db,
            admin,
            coll,
            listener,
        }
    }

    pub fn broker(&self, subject: Subject) -> Broker {
        self.db.broker(subject)
    }
}

pub fn path(s: &str) -> CollectionPath {
    CollectionPath::new(s).unwrap()
}

/// Runs both ingestion phases for an XML text.
pub fn store_xml(
    coll: &Collection,
    txn: &Txn,
    broker: &Broker,
    name: &str,
    text: &str,
) -> Result<Arc<Document>> {
    let mut source = XmlSource::Text(text.to_string());
    let info = coll.validate_xml_resource(txn, broker, name, &mut source)?;
    coll.store(txn, broker, info, &mut source)
}

pub fn store_binary(
    coll: &Collection,
    txn: &Txn,
    broker: &Broker,
    name: &str,
    data: &[u8],
) -> Result<Arc<Document>> {
    coll.add_binary_resource(txn, broker, name, data, BinaryOptions::default())
}

/// Records every hook invocation as `hook uri validating`.
#[derive(Default)]
pub struct RecordingTrigger {
    calls: Mutex<Vec<String>>,
}

impl RecordingTrigger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, hook: &str, uri: &str, ctx: &TriggerContext<'_>) {
        self.calls
            .lock()
            .push(format!("{} {} {}", hook, uri, ctx.validating));
    }
}

impl DocumentTrigger for RecordingTrigger {
    fn name(&self) -> &str {
        "recorder"
    }

    fn before_create_document(&self, ctx: &TriggerContext<'_>, uri: &str) -> Result<()> {
        self.record("before_create", uri, ctx);
        Ok(())
    }

    fn after_create_document(&self, ctx: &TriggerContext<'_>, doc: &Document) -> Result<()> {
        self.record("after_create", &doc.uri(), ctx);
        Ok(())
    }

    fn before_update_document(&self, ctx: &TriggerContext<'_>, doc: &Document) -> Result<()> {
        self.record("before_update", &doc.uri(), ctx);
        Ok(())
    }

    fn after_update_document(&self, ctx: &TriggerContext<'_>, doc: &Document) -> Result<()> {
        self.record("after_update", &doc.uri(), ctx);
        Ok(())
    }

    fn before_delete_document(&self, ctx: &TriggerContext<'_>, doc: &Document) -> Result<()> {
        self.record("before_delete", &doc.uri(), ctx);
        Ok(())
    }

    fn after_delete_document(&self, ctx: &TriggerContext<'_>, uri: &str) -> Result<()> {
        self.record("after_delete", uri, ctx);
        Ok(())
    }
}

/// Which hook a [`FailingTrigger`] refuses in.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    BeforeCreate,
    AfterCreate,
    BeforeDelete,
}

pub struct FailingTrigger {
    at: FailAt,
}

impl FailingTrigger {
    pub fn new(at: FailAt) -> Arc<Self> {
        Arc::new(Self { at })
    }

    fn fail(&self, at: FailAt) -> Result<()> {
        if self.at == at {
            return Err(DbError::Trigger("refused".to_string()));
        }
        Ok(())
    }
}

impl DocumentTrigger for FailingTrigger {
    fn name(&self) -> &str {
        "failing"
    }

    fn before_create_document(&self, _ctx: &TriggerContext<'_>, _uri: &str) -> Result<()> {
        self.fail(FailAt::BeforeCreate)
    }

    fn after_create_document(&self, _ctx: &TriggerContext<'_>, _doc: &Document) -> Result<()> {
        self.fail(FailAt::AfterCreate)
    }

    fn before_delete_document(&self, _ctx: &TriggerContext<'_>, _doc: &Document) -> Result<()> {
        self.fail(FailAt::BeforeDelete)
    }
}
