// src/lib.rs

//! Granary Package Manager — transaction set core
//!
//! This crate is the in-process heart of the granary package manager: the
//! object that groups a batch of package installs and erases into one
//! coordinated operation against a rooted filesystem and a SQLite packages
//! database.
//!
//! # Architecture
//!
//! - **Transaction set**: configuration, reference-counted lifecycle,
//!   element membership, callbacks and statistics
//! - **Transactions**: reader/writer locking on a per-root lock file, with
//!   termination signals masked while a writer holds the lock
//! - **Keyring and keystore**: on-demand loading of the OpenPGP trust
//!   keyring from a filesystem or database backend, with merge-on-import
//! - **Database binding**: open/close with mode tracking, init, rebuild,
//!   verify, and label-keyed match iteration with a header check
//!
//! Dependency resolution, element ordering, file staging, scriptlet
//! execution and payload handling live in external collaborators; this
//! core exposes the membership, callback and plugin-hook surfaces they
//! drive.

pub mod db;
pub mod element;
mod error;
pub mod flags;
pub mod header;
pub mod keyring;
pub mod keystore;
pub mod label;
pub mod lock;
pub mod plugins;
pub mod pool;
pub mod settings;
pub mod signals;
pub mod stats;
pub mod ts;

pub use db::{DbIndex, DbMode, MatchIterator, PackageDb};
pub use element::{Element, ElementType};
pub use error::{Error, Result};
pub use flags::{ProblemFilter, TransFlags, VerifyFlags, VerifyLevel};
pub use header::Header;
pub use keyring::{Keyring, PubKey};
pub use keystore::Keystore;
pub use label::{LabelKeyError, parse_label_key};
pub use lock::{LockMode, TransactionLock};
pub use plugins::{FileDisposition, Plugin, PluginRegistry};
pub use pool::StringPool;
pub use settings::Settings;
pub use stats::{OpKind, OpStats};
pub use ts::iterator::TsIter;
pub use ts::txn::{Txn, TxnMode};
pub use ts::{
    CallbackArg, ChangeEvent, ChangeFn, NotifyEvent, NotifyFn, PendingTrigger, ScriptStream,
    SolveFn, TransactionSet,
};
