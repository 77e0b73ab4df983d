// tests/lifecycle.rs

//! End-to-end lifecycle tests for the transaction set
//!
//! These walk the documented flows: create/open/close, transactions and
//! signal masking, element membership, label lookups and rebuilds.

mod common;

use common::rooted_set;
use granary::{
    DbIndex, DbMode, Error, Header, OpKind, Settings, TransactionSet, TxnMode, VerifyFlags,
    signals,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_fresh_create_open_close() {
    let root = TempDir::new().unwrap();
    let ts = TransactionSet::create_with_settings(Settings::default());

    assert_eq!(ts.root_dir(), PathBuf::from("/"));
    assert_eq!(ts.db_mode(), DbMode::ReadOnly);
    assert_eq!(ts.ref_count(), 1);

    ts.set_root_dir(Some(root.path())).unwrap();
    ts.open_db(DbMode::Create).unwrap();
    assert!(ts.db_is_open());

    let txn = ts.begin(TxnMode::Write).unwrap();
    txn.import_header(&Header::new("bash", "5.2", "1").seal()).unwrap();
    txn.end();

    ts.close_db().unwrap();
    assert!(!ts.db_is_open());
    // Database traffic was folded into the set's statistics
    assert!(ts.op_stats(OpKind::DbPut).count > 0);
}

#[test]
fn test_write_transaction_masks_signals() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);

    assert!(!signals::termination_masked());
    let txn = ts.begin(TxnMode::Write).unwrap();
    assert!(signals::termination_masked());
    txn.end();
    assert!(!signals::termination_masked());
}

#[test]
fn test_read_transaction_leaves_mask_alone() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);

    let txn = ts.begin(TxnMode::Read).unwrap();
    assert!(!signals::termination_masked());
    txn.end();
    assert!(!signals::termination_masked());
}

#[test]
fn test_transaction_holds_set_reference() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);

    let before = ts.ref_count();
    let txn = ts.begin(TxnMode::Read).unwrap();
    assert_eq!(ts.ref_count(), before + 1);
    txn.end();
    assert_eq!(ts.ref_count(), before);
}

#[test]
fn test_root_dir_validation() {
    let ts = TransactionSet::create_with_settings(Settings::default());

    let err = ts.set_root_dir(Some(Path::new("x")));
    assert!(err.is_err());
    assert_eq!(ts.root_dir(), PathBuf::from("/"));

    ts.set_root_dir(None).unwrap();
    assert_eq!(ts.root_dir(), PathBuf::from("/"));
}

#[test]
fn test_deterministic_time_stepping() {
    let mut settings = Settings::default();
    settings.source_date_epoch = Some(1_000_000_000);
    let ts = TransactionSet::create_with_settings(settings);

    assert_eq!(ts.tid(), 1_000_000_000);
    assert_eq!(ts.get_time(3), 1_000_000_000);
    assert_eq!(ts.get_time(3), 1_000_000_003);
    assert_eq!(ts.get_time(3), 1_000_000_006);
}

#[test]
fn test_wall_clock_time_non_decreasing() {
    let ts = TransactionSet::create_with_settings(Settings::default());
    let a = ts.get_time(0);
    let b = ts.get_time(0);
    assert!(b >= a);
}

#[test]
fn test_label_lookup_with_epoch_syntax() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    ts.set_vs_flags(VerifyFlags::MASK_NO_SIGNATURES);

    ts.open_db(DbMode::Create).unwrap();
    let txn = ts.begin(TxnMode::Write).unwrap();
    txn.import_header(&Header::new("name", "2.3", "4").seal()).unwrap();
    txn.import_header(&Header::new("other", "1.0", "1").seal()).unwrap();
    txn.end();

    // The explicit epoch is dropped; "name(1:2.3-4)" matches name-2.3-4
    let found: Vec<_> = ts
        .init_iterator(DbIndex::Label, Some("name(1:2.3-4)"))
        .unwrap()
        .collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].1.label(), "name-2.3-4");

    // Malformed labels fail iterator creation
    assert!(ts.init_iterator(DbIndex::Label, Some("name((bad)")).is_err());
    assert!(ts.init_iterator(DbIndex::Label, Some("name(bad")).is_err());
}

#[test]
fn test_rebuild_refuses_pending_elements() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    ts.open_db(DbMode::Create).unwrap();
    ts.close_db().unwrap();

    ts.add_install(Header::new("bash", "5.2", "1").seal(), None).unwrap();

    match ts.rebuild_db() {
        Err(Error::ElementsPending(1)) => {}
        other => panic!("expected ElementsPending, got {:?}", other.err()),
    }
    // No transaction was opened for the refused rebuild
    assert!(ts.lock_path().is_none());

    // After emptying, the rebuild goes through
    ts.empty();
    ts.rebuild_db().unwrap();
    ts.verify_db().unwrap();
}

#[test]
fn test_empty_preserves_pool_and_fires_delete_events() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let ts = TransactionSet::create_with_settings(Settings::default());
    ts.add_install(Header::new("bash", "5.2", "1").seal(), None).unwrap();
    ts.add_install(Header::new("sed", "4.9", "2").seal(), None).unwrap();

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    ts.set_change_callback(Some(Box::new(move |event, element, _| {
        sink.borrow_mut().push((event, element.name().to_string()));
        0
    })));

    let pool = ts.pool();
    ts.empty();

    assert_eq!(ts.n_elements(), 0);
    assert_eq!(events.borrow().len(), 2);
    assert!(pool.contains("bash"));
    assert!(pool.contains("sed"));
}

#[test]
fn test_iterator_walks_snapshot_in_order() {
    let ts = TransactionSet::create_with_settings(Settings::default());
    for name in ["a", "b", "c"] {
        ts.add_install(Header::new(name, "1", "1").seal(), None).unwrap();
    }

    let walked: Vec<String> = ts.iter().map(|e| e.name().to_string()).collect();
    assert_eq!(walked, vec!["a", "b", "c"]);

    let mut iter = ts.iter();
    for _ in 0..3 {
        iter.next().unwrap();
    }
    assert!(iter.next().is_none());
}

#[test]
fn test_init_db_creates_database() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);

    ts.init_db(0o755).unwrap();
    assert!(
        root.path()
            .join("var/lib/granary/packages.sqlite")
            .exists()
    );
    ts.verify_db().unwrap();
}
