// src/lock.rs

//! Advisory file lock serialising package operations on a root
//!
//! Concurrent package operations on the same root are serialised through a
//! single lock file, by default `var/lib/granary/.granary.lock` under the
//! root. Readers take the lock shared, writers exclusive. Acquisition never
//! waits: a held lock fails the caller immediately and the high-level
//! operation is expected to abort.
//!
//! The lock object is long-lived. It is created the first time a
//! transaction is opened and survives until its owning set is destroyed;
//! each transaction acquires and releases the same object. Nested
//! read-under-read acquisitions are counted, and release is idempotent.

use crate::{Error, Result};
use fs2::FileExt;
use std::cell::Cell;
use std::fs::{DirBuilder, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock acquisition modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock; excludes writers only
    Read,
    /// Exclusive lock; excludes everyone
    Write,
}

/// A named advisory lock on a per-root path
#[derive(Debug)]
pub struct TransactionLock {
    file: File,
    path: PathBuf,
    descr: String,
    /// Whether the file was opened writable; read-only mounts still allow
    /// shared locks
    writable: bool,
    mode: Cell<Option<LockMode>>,
    depth: Cell<u32>,
}

impl TransactionLock {
    /// Open (creating as needed) the lock file. The containing directory is
    /// created mode 0755; failure to create it is tolerated here and
    /// surfaces as an open error only if the file itself cannot be opened.
    pub fn new(path: &Path, descr: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let mut builder = DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o755);
            }
            if let Err(e) = builder.create(parent) {
                debug!("cannot create lock directory {}: {}", parent.display(), e);
            }
        }

        let (file, writable) = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
        {
            Ok(f) => (f, true),
            // Unprivileged callers can still take read locks
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                (File::open(path)?, false)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            descr: descr.to_string(),
            writable,
            mode: Cell::new(None),
            depth: Cell::new(0),
        })
    }

    /// Try to acquire the lock without waiting.
    ///
    /// Nested acquisitions by the current holder are counted: a read fits
    /// under anything already held, a write fits under a held write.
    /// Upgrading a held read to a write is refused.
    pub fn acquire(&self, mode: LockMode) -> Result<()> {
        if self.depth.get() > 0 {
            if self.mode.get() == Some(LockMode::Read) && mode == LockMode::Write {
                return Err(Error::LockUnavailable(format!(
                    "cannot upgrade shared {} lock on {}",
                    self.descr,
                    self.path.display()
                )));
            }
            self.depth.set(self.depth.get() + 1);
            return Ok(());
        }

        if mode == LockMode::Write && !self.writable {
            return Err(Error::LockUnavailable(format!(
                "cannot get exclusive {} lock on read-only {}",
                self.descr,
                self.path.display()
            )));
        }

        let attempt = match mode {
            LockMode::Read => FileExt::try_lock_shared(&self.file),
            LockMode::Write => FileExt::try_lock_exclusive(&self.file),
        };
        match attempt {
            Ok(()) => {
                self.mode.set(Some(mode));
                self.depth.set(1);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Error::LockUnavailable(
                format!(
                    "waiting impossible: {} lock on {} is held by another process",
                    self.descr,
                    self.path.display()
                ),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Release one acquisition. Releasing an unheld lock is a no-op.
    pub fn release(&self) {
        let depth = self.depth.get();
        if depth == 0 {
            return;
        }
        self.depth.set(depth - 1);
        if depth == 1 {
            let _ = FileExt::unlock(&self.file);
            self.mode.set(None);
        }
    }

    pub fn is_held(&self) -> bool {
        self.depth.get() > 0
    }

    pub fn mode(&self) -> Option<LockMode> {
        self.mode.get()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransactionLock {
    fn drop(&mut self) {
        if self.depth.get() > 0 {
            let _ = FileExt::unlock(&self.file);
        }
    }
}
