// tests/pubkey.rs

//! Key import, deletion and keystore behaviour across backends

mod common;

use common::{generate_key, rooted_set};
use granary::{
    DbMode, Keyring, PubKey, Settings, TransFlags, TransactionSet, TxnMode, VerifyFlags,
};
use tempfile::TempDir;

fn fs_keystore_set(root: &TempDir) -> TransactionSet {
    let mut settings = Settings::default();
    settings.keystore = Some("fs".to_string());
    let ts = TransactionSet::create_with_settings(settings);
    ts.set_root_dir(Some(root.path())).unwrap();
    ts
}

#[test]
fn test_import_then_lookup() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    let pkt = generate_key("alice <alice@example.com>");
    let fingerprint = PubKey::parse(&pkt).unwrap().fingerprint().to_string();

    ts.import_pubkey(&pkt).unwrap();

    let keyring = ts.keyring(true).unwrap();
    assert!(keyring.lookup_fingerprint(&fingerprint).is_some());
}

/// Count the keys the set's keystore has actually persisted.
fn stored_key_count(ts: &TransactionSet) -> u64 {
    let keyring = Keyring::new();
    let txn = ts.begin(TxnMode::Read).unwrap();
    let n = ts.keystore().load_keys(&txn, &keyring).unwrap() as u64;
    txn.end();
    n
}

#[test]
fn test_reimport_is_idempotent() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    let pkt = generate_key("bob <bob@example.com>");

    ts.import_pubkey(&pkt).unwrap();
    assert_eq!(stored_key_count(&ts), 1);

    // Same packet again: success, no new keystore record
    ts.import_pubkey(&pkt).unwrap();
    assert_eq!(stored_key_count(&ts), 1);
}

#[test]
fn test_import_garbage_fails() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    assert!(ts.import_pubkey(b"certainly not a key").is_err());
}

#[test]
fn test_import_with_signature_checking_disabled() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    // Users commonly import their first key with checking disabled; the
    // keyring is still force-loaded for the merge and the flags restored.
    ts.set_vs_flags(VerifyFlags::MASK_NO_SIGNATURES);

    let pkt = generate_key("carol <carol@example.com>");
    ts.import_pubkey(&pkt).unwrap();
    assert_eq!(ts.vs_flags(), VerifyFlags::MASK_NO_SIGNATURES);

    // With the mask still set, a plain autoload is refused
    let fresh = rooted_set(&root);
    fresh.set_vs_flags(VerifyFlags::MASK_NO_SIGNATURES);
    assert!(fresh.keyring(true).is_none());
}

#[test]
fn test_test_mode_import_persists_nothing() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    ts.set_flags(TransFlags::TEST);

    let pkt = generate_key("dave <dave@example.com>");
    ts.import_pubkey(&pkt).unwrap();

    // In-memory ring saw the key, the keystore did not
    let keyring = ts.keyring(false).unwrap();
    assert_eq!(keyring.len(), 1);

    let fresh = rooted_set(&root);
    assert_eq!(stored_key_count(&fresh), 0);
}

#[test]
fn test_test_mode_delete_succeeds_without_effect() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    let pkt = generate_key("erin <erin@example.com>");
    ts.import_pubkey(&pkt).unwrap();

    ts.set_flags(TransFlags::TEST);
    let key = PubKey::parse(&pkt).unwrap();
    ts.delete_pubkey(&key).unwrap();

    // The record survived the dry run
    let fresh = rooted_set(&root);
    assert_eq!(stored_key_count(&fresh), 1);
}

#[test]
fn test_delete_propagates_missing_key() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    ts.open_db(DbMode::Create).unwrap();

    let key = PubKey::parse(&generate_key("frank <frank@example.com>")).unwrap();
    assert!(ts.delete_pubkey(&key).is_err());
}

#[test]
fn test_delete_then_reload_sees_no_key() {
    let root = TempDir::new().unwrap();
    let ts = rooted_set(&root);
    let pkt = generate_key("grace <grace@example.com>");
    ts.import_pubkey(&pkt).unwrap();

    let key = PubKey::parse(&pkt).unwrap();
    ts.delete_pubkey(&key).unwrap();

    let fresh = rooted_set(&root);
    assert_eq!(stored_key_count(&fresh), 0);
}

#[test]
fn test_fs_keystore_roundtrip() {
    let root = TempDir::new().unwrap();
    let ts = fs_keystore_set(&root);
    let pkt = generate_key("heidi <heidi@example.com>");
    let fingerprint = PubKey::parse(&pkt).unwrap().fingerprint().to_string();

    ts.import_pubkey(&pkt).unwrap();
    assert!(
        root.path()
            .join("var/lib/granary/pubkeys")
            .join(format!("{}.asc", fingerprint))
            .exists()
    );

    // A second set rooted at the same place loads the key back
    let again = fs_keystore_set(&root);
    let keyring = again.keyring(true).unwrap();
    assert!(keyring.lookup_fingerprint(&fingerprint).is_some());

    again.delete_pubkey(&PubKey::parse(&pkt).unwrap()).unwrap();
    assert!(
        !root
            .path()
            .join("var/lib/granary/pubkeys")
            .join(format!("{}.asc", fingerprint))
            .exists()
    );
}

#[test]
fn test_keyring_handle_outlives_set() {
    let root = TempDir::new().unwrap();
    let pkt = generate_key("ivan <ivan@example.com>");
    let fingerprint = PubKey::parse(&pkt).unwrap().fingerprint().to_string();

    let keyring = {
        let ts = rooted_set(&root);
        ts.import_pubkey(&pkt).unwrap();
        ts.keyring(true).unwrap()
    };
    // The set is gone; the counted keyring handle still works
    assert!(keyring.lookup_fingerprint(&fingerprint).is_some());
}
