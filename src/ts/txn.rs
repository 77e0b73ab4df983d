// src/ts/txn.rs

//! Transaction handles
//!
//! A transaction scopes lock ownership: `begin` resolves the lock path,
//! takes the per-root lock in the requested mode and, for writers, masks
//! the termination signals until `end`. The handle keeps its own reference
//! on the owning set, so a set reached through a live transaction cannot be
//! destroyed under it. Every mutating database operation runs under a write
//! transaction; keyring loads run under a read transaction.
//!
//! Handles are ended explicitly with `end` or implicitly on drop. They are
//! not reentrant: opening a second write transaction through a live one on
//! the same set is refused at the lock.

use crate::db::DbMode;
use crate::flags::{TransFlags, VerifyFlags};
use crate::header::Header;
use crate::keyring::{Modify, PubKey};
use crate::lock::LockMode;
use crate::signals;
use crate::ts::TransactionSet;
use crate::Result;
use nix::sys::signal::SigSet;
use std::path::PathBuf;
use tracing::{error, warn};

/// Transaction modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Shared access; other readers may run concurrently
    Read,
    /// Exclusive access; termination signals are masked while open
    Write,
}

impl From<TxnMode> for LockMode {
    fn from(mode: TxnMode) -> LockMode {
        match mode {
            TxnMode::Read => LockMode::Read,
            TxnMode::Write => LockMode::Write,
        }
    }
}

/// A scoped transaction on a set
pub struct Txn {
    ts: TransactionSet,
    mode: TxnMode,
    saved_mask: Option<SigSet>,
    ended: bool,
}

impl TransactionSet {
    /// Open a transaction, acquiring the per-root lock.
    ///
    /// The lock path is resolved lazily from the root directory and the
    /// configured override, falling back to the compiled-in default when
    /// the override is empty or still carries an unexpanded `%` marker.
    /// Failure to acquire the lock fails the call; the set is unchanged.
    pub fn begin(&self, mode: TxnMode) -> Result<Txn> {
        self.ensure_lock(&self.resolved_lock_path())?;
        self.acquire_lock(mode.into())?;

        let saved_mask = if mode == TxnMode::Write {
            match signals::mask_termination() {
                Ok(mask) => Some(mask),
                Err(e) => {
                    self.release_lock();
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Txn {
            ts: self.clone(),
            mode,
            saved_mask,
            ended: false,
        })
    }
}

impl Txn {
    /// The owning set.
    pub fn ts(&self) -> &TransactionSet {
        &self.ts
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn root_dir(&self) -> PathBuf {
        self.ts.root_dir()
    }

    /// Release the lock and, for writers, restore the signal mask saved at
    /// begin. Dropping the handle has the same effect.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.ts.release_lock();
        if let Some(mask) = self.saved_mask.take() {
            if let Err(e) = signals::restore_mask(&mask) {
                warn!("failed to restore signal mask: {}", e);
            }
        }
    }

    /// Persist a package header into the database.
    pub fn import_header(&self, header: &Header) -> Result<u32> {
        let ts = self.ts();
        ts.open_db(DbMode::Create)?;
        ts.with_db_mut(|db| db.add_header(header))
    }

    /// Import an OpenPGP public key.
    ///
    /// The packet is linted first; a fatal lint aborts the import and
    /// non-fatal diagnostics are logged. The keyring is force-loaded even
    /// when signature checking is disabled, since first keys are commonly
    /// imported exactly then. An existing key with the same fingerprint is
    /// merged; importing a key the ring already has is a success with no
    /// keystore write. In test mode the merge still runs but nothing is
    /// persisted.
    pub fn import_pubkey(&self, pkt: &[u8]) -> Result<()> {
        let ts = self.ts();

        match PubKey::lint(pkt) {
            Err(e) => {
                error!("{}", e);
                return Err(e);
            }
            Ok(lints) => {
                for lint in lints {
                    warn!("{}", lint);
                }
            }
        }

        let keyring = ts.keyring_force_load();
        let mut pubkey = PubKey::parse(pkt)?;

        let oldkey = keyring.lookup(&pubkey);
        if let Some(old) = &oldkey {
            match old.merge(&pubkey)? {
                // No new material; already have this key
                None => return Ok(()),
                Some(merged) => pubkey = merged,
            }
        }

        let replace = oldkey.is_some();
        match keyring.modify(pubkey.clone(), replace)? {
            Modify::Unchanged => Ok(()),
            Modify::Changed => {
                if ts.flags().contains(TransFlags::TEST) {
                    return Ok(());
                }
                ts.keystore().import_key(self, &pubkey, replace)
            }
        }
    }

    /// Delete a public key from the keystore.
    ///
    /// The keyring is force-loaded first, exactly as for import. In test
    /// mode this succeeds without touching the keystore; otherwise the
    /// keystore's own result is returned.
    pub fn delete_pubkey(&self, key: &PubKey) -> Result<()> {
        let ts = self.ts();
        let _keyring = ts.keyring_force_load();

        if ts.flags().contains(TransFlags::TEST) {
            return Ok(());
        }
        ts.keystore().delete_key(self, key)
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        self.finish();
    }
}

impl TransactionSet {
    /// Force the keyring into existence regardless of the signature
    /// verification policy, restoring the policy afterwards.
    pub(crate) fn keyring_force_load(&self) -> crate::keyring::Keyring {
        let oflags = self.set_vs_flags(self.vs_flags() - VerifyFlags::MASK_NO_SIGNATURES);
        let keyring = self.keyring(true);
        self.set_vs_flags(oflags);
        // With the no-signature bits cleared the load cannot be skipped
        keyring.unwrap_or_default()
    }

    /// Import a public key under a fresh write transaction.
    pub fn import_pubkey(&self, pkt: &[u8]) -> Result<()> {
        let txn = self.begin(TxnMode::Write)?;
        let rc = txn.import_pubkey(pkt);
        txn.end();
        rc
    }

    /// Delete a public key under a fresh write transaction.
    pub fn delete_pubkey(&self, key: &PubKey) -> Result<()> {
        let txn = self.begin(TxnMode::Write)?;
        let rc = txn.delete_pubkey(key);
        txn.end();
        rc
    }
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("mode", &self.mode)
            .field("ended", &self.ended)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set_rooted_at(dir: &TempDir) -> TransactionSet {
        let ts = TransactionSet::create_with_settings(crate::settings::Settings::default());
        ts.set_root_dir(Some(dir.path())).unwrap();
        ts
    }

    #[test]
    fn test_begin_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let ts = set_rooted_at(&dir);

        let txn = ts.begin(TxnMode::Read).unwrap();
        assert!(dir.path().join("var/lib/granary/.granary.lock").exists());
        txn.end();
    }

    #[test]
    fn test_begin_bumps_refcount() {
        let dir = TempDir::new().unwrap();
        let ts = set_rooted_at(&dir);
        let before = ts.ref_count();

        let txn = ts.begin(TxnMode::Read).unwrap();
        assert_eq!(ts.ref_count(), before + 1);
        txn.end();
        assert_eq!(ts.ref_count(), before);
    }

    #[test]
    fn test_write_masks_signals_until_end() {
        let dir = TempDir::new().unwrap();
        let ts = set_rooted_at(&dir);

        assert!(!signals::termination_masked());
        let txn = ts.begin(TxnMode::Write).unwrap();
        assert!(signals::termination_masked());
        txn.end();
        assert!(!signals::termination_masked());
    }

    #[test]
    fn test_read_does_not_mask_signals() {
        let dir = TempDir::new().unwrap();
        let ts = set_rooted_at(&dir);

        let txn = ts.begin(TxnMode::Read).unwrap();
        assert!(!signals::termination_masked());
        txn.end();
    }

    #[test]
    fn test_drop_releases_like_end() {
        let dir = TempDir::new().unwrap();
        let ts = set_rooted_at(&dir);

        {
            let _txn = ts.begin(TxnMode::Write).unwrap();
            assert!(signals::termination_masked());
        }
        assert!(!signals::termination_masked());

        // Lock is free again for another writer
        let txn = ts.begin(TxnMode::Write).unwrap();
        txn.end();
    }

    #[test]
    fn test_lock_path_override() {
        let dir = TempDir::new().unwrap();
        let ts = TransactionSet::create_with_settings({
            let mut s = crate::settings::Settings::default();
            s.lock_path = Some("run/lock/pkg.lock".to_string());
            s
        });
        ts.set_root_dir(Some(dir.path())).unwrap();

        let txn = ts.begin(TxnMode::Read).unwrap();
        assert!(dir.path().join("run/lock/pkg.lock").exists());
        txn.end();
    }

    #[test]
    fn test_unresolved_lock_path_falls_back() {
        let dir = TempDir::new().unwrap();
        let ts = TransactionSet::create_with_settings({
            let mut s = crate::settings::Settings::default();
            s.lock_path = Some("%{_lock_path}".to_string());
            s
        });
        ts.set_root_dir(Some(dir.path())).unwrap();

        let txn = ts.begin(TxnMode::Read).unwrap();
        assert!(dir.path().join("var/lib/granary/.granary.lock").exists());
        txn.end();
    }
}
