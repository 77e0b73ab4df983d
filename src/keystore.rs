// src/keystore.rs

//! Persistent public key storage
//!
//! Two backends persist the trust keyring between runs. The filesystem
//! variant keeps one armored file per key in a `pubkeys` directory next to
//! the database; the database variant keeps key records in the packages
//! database itself and is the default. Every backend call runs under a
//! transaction supplied by the caller: reads under a read transaction,
//! import and delete under a write transaction.

use crate::db::DbMode;
use crate::keyring::{Keyring, PubKey};
use crate::ts::txn::Txn;
use crate::{Error, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Keystore backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystore {
    /// One armored key file per fingerprint under the database directory
    Fs,
    /// Key records in the packages database
    Db,
}

impl Keystore {
    /// Resolve a backend from its configured name. Anything but `fs` maps
    /// to the database backend; an unrecognised non-empty name warns.
    pub fn from_config(name: Option<&str>) -> Self {
        match name {
            Some("fs") => Keystore::Fs,
            Some("db") | None => Keystore::Db,
            Some(other) => {
                warn!("unknown keystore type: {}, using database", other);
                Keystore::Db
            }
        }
    }

    /// Populate `keyring` with every stored key. Returns how many keys were
    /// loaded. A missing store is empty, not an error.
    pub fn load_keys(&self, txn: &Txn, keyring: &Keyring) -> Result<usize> {
        let packets = match self {
            Keystore::Fs => self.fs_read_all(txn)?,
            Keystore::Db => self.db_read_all(txn)?,
        };

        let mut loaded = 0;
        for packet in packets {
            match PubKey::parse(&packet) {
                Ok(key) => {
                    if keyring.modify(key, false).is_ok() {
                        loaded += 1;
                    }
                }
                Err(e) => warn!("ignoring unparseable stored key: {}", e),
            }
        }
        debug!("loaded {} keys from {:?} keystore", loaded, self);
        Ok(loaded)
    }

    /// Persist a key. With `replace` set an existing record for the same
    /// fingerprint is overwritten.
    pub fn import_key(&self, txn: &Txn, key: &PubKey, replace: bool) -> Result<()> {
        match self {
            Keystore::Fs => {
                let path = self.fs_key_path(txn, key);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                if !replace && path.exists() {
                    return Ok(());
                }
                fs::write(&path, key.to_armored()?)?;
                info!(
                    "imported key {} to {}",
                    key.fingerprint(),
                    path.display()
                );
                Ok(())
            }
            Keystore::Db => {
                let ts = txn.ts();
                ts.open_db(DbMode::Create)?;
                let data = key.to_bytes()?;
                ts.with_db_mut(|db| db.put_pubkey(key.fingerprint(), &data, replace))?;
                info!("imported key {} to packages database", key.fingerprint());
                Ok(())
            }
        }
    }

    /// Remove a key record. A missing record is an error.
    pub fn delete_key(&self, txn: &Txn, key: &PubKey) -> Result<()> {
        match self {
            Keystore::Fs => {
                let path = self.fs_key_path(txn, key);
                if !path.exists() {
                    return Err(Error::Keyring(format!(
                        "key {} not found in keystore",
                        key.fingerprint()
                    )));
                }
                fs::remove_file(&path)?;
                info!("deleted key {}", key.fingerprint());
                Ok(())
            }
            Keystore::Db => {
                let ts = txn.ts();
                ts.open_db(DbMode::ReadWrite)?;
                let existed =
                    ts.with_db_mut(|db| db.delete_pubkey(key.fingerprint()))?;
                if !existed {
                    return Err(Error::Keyring(format!(
                        "key {} not found in keystore",
                        key.fingerprint()
                    )));
                }
                info!("deleted key {}", key.fingerprint());
                Ok(())
            }
        }
    }

    fn fs_dir(&self, txn: &Txn) -> PathBuf {
        let ts = txn.ts();
        ts.root_dir().join(ts.dbpath()).join("pubkeys")
    }

    fn fs_key_path(&self, txn: &Txn, key: &PubKey) -> PathBuf {
        self.fs_dir(txn).join(format!("{}.asc", key.fingerprint()))
    }

    fn fs_read_all(&self, txn: &Txn) -> Result<Vec<Vec<u8>>> {
        let dir = self.fs_dir(txn);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut packets = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("asc") {
                packets.push(fs::read(&path)?);
            }
        }
        Ok(packets)
    }

    fn db_read_all(&self, txn: &Txn) -> Result<Vec<Vec<u8>>> {
        let ts = txn.ts();
        if !ts.db_is_open() {
            // No database yet means no stored keys
            if !crate::db::db_file(&ts.root_dir(), ts.dbpath()).exists() {
                return Ok(Vec::new());
            }
            ts.open_db(DbMode::ReadOnly)?;
        }
        ts.with_db_mut(|db| db.pubkeys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::testutil::generate_key;
    use crate::ts::txn::TxnMode;
    use crate::TransactionSet;
    use tempfile::TempDir;

    fn set_rooted_at(dir: &TempDir) -> TransactionSet {
        let ts = TransactionSet::create_with_settings(crate::settings::Settings::default());
        ts.set_root_dir(Some(dir.path())).unwrap();
        ts
    }

    #[test]
    fn test_from_config() {
        assert_eq!(Keystore::from_config(Some("fs")), Keystore::Fs);
        assert_eq!(Keystore::from_config(Some("db")), Keystore::Db);
        assert_eq!(Keystore::from_config(None), Keystore::Db);
        assert_eq!(Keystore::from_config(Some("bogus")), Keystore::Db);
    }

    #[test]
    fn test_fs_roundtrip() {
        let dir = TempDir::new().unwrap();
        let ts = set_rooted_at(&dir);
        let key = PubKey::parse(&generate_key("fs <fs@example.com>")).unwrap();

        let txn = ts.begin(TxnMode::Write).unwrap();
        Keystore::Fs.import_key(&txn, &key, false).unwrap();

        let keyring = Keyring::new();
        assert_eq!(Keystore::Fs.load_keys(&txn, &keyring).unwrap(), 1);
        assert!(keyring.lookup_fingerprint(key.fingerprint()).is_some());

        Keystore::Fs.delete_key(&txn, &key).unwrap();
        assert!(Keystore::Fs.delete_key(&txn, &key).is_err());
        txn.end();
    }

    #[test]
    fn test_db_roundtrip() {
        let dir = TempDir::new().unwrap();
        let ts = set_rooted_at(&dir);
        let key = PubKey::parse(&generate_key("db <db@example.com>")).unwrap();

        let txn = ts.begin(TxnMode::Write).unwrap();
        Keystore::Db.import_key(&txn, &key, false).unwrap();

        let keyring = Keyring::new();
        assert_eq!(Keystore::Db.load_keys(&txn, &keyring).unwrap(), 1);
        assert!(keyring.lookup_fingerprint(key.fingerprint()).is_some());

        Keystore::Db.delete_key(&txn, &key).unwrap();
        assert!(Keystore::Db.delete_key(&txn, &key).is_err());
        txn.end();
    }

    #[test]
    fn test_load_from_missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let ts = set_rooted_at(&dir);
        let keyring = Keyring::new();

        let txn = ts.begin(TxnMode::Read).unwrap();
        assert_eq!(Keystore::Fs.load_keys(&txn, &keyring).unwrap(), 0);
        assert_eq!(Keystore::Db.load_keys(&txn, &keyring).unwrap(), 0);
        txn.end();
    }
}
