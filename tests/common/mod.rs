// tests/common/mod.rs

//! Shared helpers for integration tests
#![allow(dead_code)]

use granary::{Settings, TransactionSet};
use sequoia_openpgp::cert::CertBuilder;
use sequoia_openpgp::serialize::SerializeInto;
use tempfile::TempDir;

/// A transaction set rooted in a fresh temporary directory, configured
/// explicitly so the ambient environment cannot leak in.
pub fn rooted_set(root: &TempDir) -> TransactionSet {
    let ts = TransactionSet::create_with_settings(Settings::default());
    ts.set_root_dir(Some(root.path())).unwrap();
    ts
}

/// Generate a transferable OpenPGP public key for the given user id.
pub fn generate_key(userid: &str) -> Vec<u8> {
    let (cert, _) = CertBuilder::new()
        .add_userid(userid)
        .add_signing_subkey()
        .generate()
        .unwrap();
    cert.to_vec().unwrap()
}
