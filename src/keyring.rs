// src/keyring.rs

//! In-memory trust keyring
//!
//! The keyring is the reference-counted collection of OpenPGP public keys
//! a transaction set trusts, keyed by primary fingerprint. It is loaded on
//! demand from the persistent keystore and shared by handle: callers that
//! fetch the keyring may outlive the set's own reference.
//!
//! Keys are parsed and merged with sequoia-openpgp (pure Rust).

use crate::{Error, Result};
use sequoia_openpgp as openpgp;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::SerializeInto;
use openpgp::types::RevocationStatus;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A parsed OpenPGP public key
#[derive(Debug, Clone)]
pub struct PubKey {
    cert: openpgp::Cert,
    fingerprint: String,
}

impl PubKey {
    /// Parse a binary or armored transferable public key.
    pub fn parse(pkt: &[u8]) -> Result<Self> {
        let cert = openpgp::Cert::from_bytes(pkt)
            .map_err(|e| Error::Pgp(format!("failed to parse public key: {}", e)))?;
        let fingerprint = cert.fingerprint().to_hex();
        Ok(Self { cert, fingerprint })
    }

    /// Structural lint of a candidate key packet. Returns non-fatal
    /// diagnostics; an unparseable packet is the fatal case.
    pub fn lint(pkt: &[u8]) -> Result<Vec<String>> {
        let key = Self::parse(pkt).map_err(|e| Error::KeyLint(e.to_string()))?;
        let mut lints = Vec::new();

        let policy = StandardPolicy::new();
        match key.cert.with_policy(&policy, None) {
            Ok(valid) => {
                if let RevocationStatus::Revoked(_) = valid.revocation_status() {
                    lints.push(format!("key {} is revoked", key.fingerprint));
                }
                if valid.alive().is_err() {
                    lints.push(format!("key {} is expired", key.fingerprint));
                }
                if !valid.keys().any(|k| k.for_signing()) {
                    lints.push(format!(
                        "key {} has no signing-capable keys",
                        key.fingerprint
                    ));
                }
            }
            Err(e) => {
                lints.push(format!(
                    "key {} is not valid under the current policy: {}",
                    key.fingerprint, e
                ));
            }
        }
        if key.cert.userids().next().is_none() {
            lints.push(format!("key {} has no user id", key.fingerprint));
        }

        Ok(lints)
    }

    /// Hex primary fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Primary user id, if the key carries one.
    pub fn userid(&self) -> Option<String> {
        self.cert
            .userids()
            .next()
            .map(|u| String::from_utf8_lossy(u.userid().value()).into_owned())
    }

    /// Binary serialized form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.cert
            .to_vec()
            .map_err(|e| Error::Pgp(format!("failed to serialize key: {}", e)))
    }

    /// ASCII-armored serialized form.
    pub fn to_armored(&self) -> Result<Vec<u8>> {
        self.cert
            .armored()
            .to_vec()
            .map_err(|e| Error::Pgp(format!("failed to armor key: {}", e)))
    }

    /// Merge another copy of this key into this one. Returns the merged key,
    /// or `None` when the other copy carries no new material.
    ///
    /// Fails when the fingerprints differ.
    pub fn merge(&self, other: &PubKey) -> Result<Option<PubKey>> {
        if self.fingerprint != other.fingerprint {
            return Err(Error::Keyring(format!(
                "cannot merge key {} into key {}",
                other.fingerprint, self.fingerprint
            )));
        }
        let merged = self
            .cert
            .clone()
            .merge_public(other.cert.clone())
            .map_err(|e| Error::Pgp(format!("failed to merge key: {}", e)))?;

        let before = self.to_bytes()?;
        let after = merged
            .to_vec()
            .map_err(|e| Error::Pgp(format!("failed to serialize key: {}", e)))?;
        if before == after {
            return Ok(None);
        }
        Ok(Some(PubKey {
            fingerprint: self.fingerprint.clone(),
            cert: merged,
        }))
    }
}

/// Result of a keyring modification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modify {
    /// The keyring changed; persist the key to the keystore
    Changed,
    /// The key was already present unchanged
    Unchanged,
}

/// Reference-counted key collection keyed by fingerprint
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: Rc<RefCell<HashMap<String, Rc<PubKey>>>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key by the fingerprint of another key.
    pub fn lookup(&self, key: &PubKey) -> Option<Rc<PubKey>> {
        self.lookup_fingerprint(key.fingerprint())
    }

    pub fn lookup_fingerprint(&self, fingerprint: &str) -> Option<Rc<PubKey>> {
        self.keys.borrow().get(fingerprint).cloned()
    }

    /// Add or replace a key.
    ///
    /// With `replace` unset the key must be new: an existing fingerprint is
    /// reported as `Unchanged`. With `replace` set the key must already
    /// exist and is overwritten; replacing an absent key is an error.
    pub fn modify(&self, key: PubKey, replace: bool) -> Result<Modify> {
        let mut keys = self.keys.borrow_mut();
        let fingerprint = key.fingerprint().to_string();
        if replace {
            if !keys.contains_key(&fingerprint) {
                return Err(Error::Keyring(format!(
                    "cannot replace missing key {}",
                    fingerprint
                )));
            }
            keys.insert(fingerprint, Rc::new(key));
            Ok(Modify::Changed)
        } else if keys.contains_key(&fingerprint) {
            Ok(Modify::Unchanged)
        } else {
            keys.insert(fingerprint, Rc::new(key));
            Ok(Modify::Changed)
        }
    }

    /// Remove a key by fingerprint. Returns whether it was present.
    pub fn remove(&self, fingerprint: &str) -> bool {
        self.keys.borrow_mut().remove(fingerprint).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.borrow().is_empty()
    }

    /// Fingerprints of all keys, in no particular order.
    pub fn fingerprints(&self) -> Vec<String> {
        self.keys.borrow().keys().cloned().collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_fingerprint() {
        let pkt = testutil::generate_key("alice <alice@example.com>");
        let key = PubKey::parse(&pkt).unwrap();
        assert_eq!(key.fingerprint().len(), 40);
        assert!(key.userid().unwrap().contains("alice"));
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(PubKey::parse(b"not a key").is_err());
        assert!(PubKey::lint(b"not a key").is_err());
    }

    #[test]
    fn test_lint_fresh_key_is_clean() {
        let pkt = testutil::generate_key("bob <bob@example.com>");
        let lints = PubKey::lint(&pkt).unwrap();
        assert!(lints.is_empty(), "unexpected lints: {:?}", lints);
    }

    #[test]
    fn test_merge_same_key_is_noop() {
        let pkt = testutil::generate_key("carol <carol@example.com>");
        let a = PubKey::parse(&pkt).unwrap();
        let b = PubKey::parse(&pkt).unwrap();
        assert!(a.merge(&b).unwrap().is_none());
    }

    #[test]
    fn test_merge_different_keys_fails() {
        let a = PubKey::parse(&testutil::generate_key("a <a@example.com>")).unwrap();
        let b = PubKey::parse(&testutil::generate_key("b <b@example.com>")).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_modify_add_then_unchanged() {
        let keyring = Keyring::new();
        let key = PubKey::parse(&testutil::generate_key("d <d@example.com>")).unwrap();

        assert_eq!(keyring.modify(key.clone(), false).unwrap(), Modify::Changed);
        assert_eq!(keyring.modify(key, false).unwrap(), Modify::Unchanged);
        assert_eq!(keyring.len(), 1);
    }

    #[test]
    fn test_modify_replace_missing_fails() {
        let keyring = Keyring::new();
        let key = PubKey::parse(&testutil::generate_key("e <e@example.com>")).unwrap();
        assert!(keyring.modify(key, true).is_err());
    }

    #[test]
    fn test_lookup_and_remove() {
        let keyring = Keyring::new();
        let key = PubKey::parse(&testutil::generate_key("f <f@example.com>")).unwrap();
        let fingerprint = key.fingerprint().to_string();

        keyring.modify(key, false).unwrap();
        assert!(keyring.lookup_fingerprint(&fingerprint).is_some());
        assert!(keyring.remove(&fingerprint));
        assert!(!keyring.remove(&fingerprint));
        assert!(keyring.is_empty());
    }

    #[test]
    fn test_shared_handle() {
        let keyring = Keyring::new();
        let handle = keyring.clone();
        let key = PubKey::parse(&testutil::generate_key("g <g@example.com>")).unwrap();
        handle.modify(key, false).unwrap();
        assert_eq!(keyring.len(), 1);
    }
}
