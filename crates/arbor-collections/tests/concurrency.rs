//! Multi-threaded locking and ingestion tests.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use arbor_collections::{DbError, LockMode, XmlSource};
use common::{admin, path, store_xml, Fixture};

#[test]
fn test_writers_exclude_everyone() {
    let fx = Fixture::new();
    let readers = Arc::new(AtomicUsize::new(0));
    let writers = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let broker = fx.broker(admin());
            let locks = Arc::clone(fx.db.locks());
            let (readers, writers, violations, barrier) = (
                Arc::clone(&readers),
                Arc::clone(&writers),
                Arc::clone(&violations),
                Arc::clone(&barrier),
            );
            thread::spawn(move || {
                let p = path("/db/test");
                barrier.wait();
                for round in 0..50 {
                    if (i + round) % 3 == 0 {
                        let _g = locks
                            .acquire_collection_lock(&p, broker.owner(), LockMode::Write)
                            .unwrap();
                        let w = writers.fetch_add(1, Ordering::SeqCst);
                        if w != 0 || readers.load(Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::yield_now();
                        writers.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        let _g = locks
                            .acquire_collection_lock(&p, broker.owner(), LockMode::Read)
                            .unwrap();
                        readers.fetch_add(1, Ordering::SeqCst);
                        if writers.load(Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::yield_now();
                        readers.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert!(!fx.db.locks().is_collection_locked(&path("/db/test")));
}

#[test]
fn test_reader_blocks_until_replace_is_stored() {
    let fx = Fixture::new();
    let txn = fx.admin.begin_transaction();
    store_xml(&fx.coll, &txn, &fx.admin, "a.xml", "<v1/>").unwrap();

    let mut source = XmlSource::Text("<v2/>".to_string());
    let info = fx
        .coll
        .validate_xml_resource(&txn, &fx.admin, "a.xml", &mut source)
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let broker = fx.broker(admin());
        let coll = Arc::clone(&fx.coll);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let locked = coll
                .get_document_with_lock(&broker, "a.xml", LockMode::Read)
                .unwrap()
                .unwrap();
            let content = broker.storage().read_resource(locked.document()).unwrap();
            done.store(true, Ordering::SeqCst);
            locked.release().unwrap();
            content
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::SeqCst));
    fx.coll.store(&txn, &fx.admin, info, &mut source).unwrap();

    let content = reader.join().unwrap().unwrap();
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(content.as_ref(), b"<v2/>");
}

#[test]
fn test_parallel_ingestion_assigns_unique_ids() {
    let fx = Fixture::new();
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let broker = fx.broker(admin());
            let coll = Arc::clone(&fx.coll);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let txn = broker.begin_transaction();
                barrier.wait();
                (0..10)
                    .map(|i| {
                        let name = format!("t{}-{}.xml", t, i);
                        store_xml(&coll, &txn, &broker, &name, "<d/>").unwrap().id()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert!(ids.insert(id));
        }
    }
    assert_eq!(ids.len(), 40);
    assert_eq!(fx.coll.document_count(&fx.admin).unwrap(), 40);
    assert!(fx.coll.allow_unload(&fx.admin));
}

#[test]
fn test_concurrent_create_collection_yields_one_instance() {
    let fx = Fixture::new();
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let broker = fx.broker(admin());
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let txn = broker.begin_transaction();
                barrier.wait();
                broker
                    .create_collection(&txn, &path("/db/test/shared/leaf"))
                    .unwrap()
                    .id()
            })
        })
        .collect();

    let ids: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 1);
    assert_eq!(
        fx.coll.collection_names(&fx.admin).unwrap(),
        vec!["shared".to_string()]
    );
}

#[test]
fn test_same_owner_reenters_collection_lock() {
    let fx = Fixture::new();
    let guard = fx.coll.lock(&fx.admin, LockMode::Write).unwrap();
    assert!(fx.coll.has_document(&fx.admin, "none.xml").is_ok());
    assert_eq!(fx.coll.document_count(&fx.admin).unwrap(), 0);
    drop(guard);
    assert!(!fx.db.locks().is_collection_locked(fx.coll.path()));
}

#[test]
fn test_concurrent_config_documents_admit_one() {
    let fx = Fixture::new();
    let txn = fx.admin.begin_transaction();
    let conf = fx
        .admin
        .create_collection(&txn, &path("/db/system/config/db/test"))
        .unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["a.xconf", "b.xconf"]
        .into_iter()
        .map(|name| {
            let broker = fx.broker(admin());
            let conf = Arc::clone(&conf);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let txn = broker.begin_transaction();
                barrier.wait();
                store_xml(&conf, &txn, &broker, name, "<collection/>")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(DbError::CollectionConfiguration(_)))));
    assert_eq!(conf.document_count(&fx.admin).unwrap(), 1);
}
