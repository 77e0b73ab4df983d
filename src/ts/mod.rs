// src/ts/mod.rs

//! The transaction set
//!
//! A transaction set groups a batch of package installs and erases into one
//! coordinated operation against a rooted filesystem and its packages
//! database. The set owns the database handle, the trust keyring and its
//! persistent keystore, the ordered element list, the cross-cutting
//! configuration, and the per-root lock that serialises concurrent package
//! operations.
//!
//! # Ownership
//!
//! Sets are handled by reference count: cloning a `TransactionSet` links a
//! new handle, dropping one unlinks it, and the last drop destroys the set.
//! Transactions and element iterators each keep their own handle, so the
//! set outlives them by construction. Sets are single-threaded; nothing in
//! here is `Send`.
//!
//! # Typical flow
//!
//! ```ignore
//! let ts = TransactionSet::create();
//! ts.set_root_dir(Some(Path::new("/mnt/sysimage")))?;
//! ts.open_db(DbMode::Create)?;
//! ts.import_pubkey(&key_bytes)?;
//! for (offset, header) in ts.init_iterator(DbIndex::Label, Some("bash(5.2-1)"))? {
//!     // ...
//! }
//! ts.close_db()?;
//! ```

pub mod iterator;
pub(crate) mod members;
pub mod txn;

use crate::db::{self, DbIndex, DbMode, MatchIterator, PackageDb};
use crate::element::Element;
use crate::flags::{ProblemFilter, TransFlags, VerifyFlags, VerifyLevel};
use crate::header::Header;
use crate::keyring::Keyring;
use crate::keystore::Keystore;
use crate::label::parse_label_key;
use crate::lock::{LockMode, TransactionLock};
use crate::plugins::PluginRegistry;
use crate::pool::StringPool;
use crate::settings::{DEFAULT_LOCK_PATH, Settings};
use crate::stats::{OpKind, OpSet, OpStats};
use crate::ts::iterator::TsIter;
use crate::ts::members::Members;
use crate::ts::txn::TxnMode;
use crate::{Error, Result};
use chrono::Utc;
use std::cell::{Cell, RefCell, RefMut};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{error, warn};

/// Reference-counted stream receiving scriptlet output
pub type ScriptStream = Rc<RefCell<dyn Write>>;

/// Progress callback events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    TransStart,
    TransProgress,
    TransStop,
    InstStart,
    InstProgress,
    InstStop,
    UninstStart,
    UninstProgress,
    UninstStop,
    ScriptStart,
    ScriptStop,
    ScriptError,
}

/// Membership change events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Added,
    Deleted,
}

/// Per-element argument handed to the notify callback. Style 0 passes the
/// header, any other style passes the element itself.
pub enum CallbackArg<'a> {
    Header(&'a Header),
    Element(&'a Element),
}

/// Progress callback: per-element argument, event, amount, total, caller key
pub type NotifyFn =
    Box<dyn FnMut(Option<CallbackArg<'_>>, NotifyEvent, u64, u64, Option<&str>)>;

/// Membership change callback: event, element, other element
pub type ChangeFn = Box<dyn FnMut(ChangeEvent, &Element, Option<&Element>) -> i32>;

/// Dependency solve callback; non-zero means "not found"
pub type SolveFn = Box<dyn FnMut(&str) -> i32>;

/// A trigger queued for a later run, opaque to this core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTrigger {
    /// Database offset of the package carrying the trigger
    pub offset: u32,
    /// Trigger index inside that package
    pub index: u32,
}

struct TsInner {
    settings: Settings,
    root_dir: RefCell<PathBuf>,
    db: RefCell<Option<PackageDb>>,
    db_mode: Cell<DbMode>,
    keyring: RefCell<Option<Keyring>>,
    keystore: Cell<Option<Keystore>>,
    vs_flags: Cell<VerifyFlags>,
    vfy_flags: Cell<VerifyFlags>,
    vfy_level: Cell<VerifyLevel>,
    trans_flags: Cell<TransFlags>,
    ignore_set: Cell<ProblemFilter>,
    color: Cell<u32>,
    pref_color: Cell<u32>,
    tid: Cell<u32>,
    override_time: Cell<Option<i64>>,
    script_stream: RefCell<Option<ScriptStream>>,
    notify: RefCell<Option<NotifyFn>>,
    notify_style: Cell<u32>,
    change: RefCell<Option<ChangeFn>>,
    solve: RefCell<Option<SolveFn>>,
    plugins: RefCell<Option<PluginRegistry>>,
    pending_triggers: RefCell<Vec<PendingTrigger>>,
    lock_path: RefCell<Option<PathBuf>>,
    lock: RefCell<Option<TransactionLock>>,
    min_writes: Cell<bool>,
    stats_enabled: Cell<bool>,
    ops: RefCell<OpSet>,
    members: RefCell<Members>,
}

/// A reference-counted handle on a transaction set
#[derive(Clone)]
pub struct TransactionSet {
    inner: Rc<TsInner>,
}

impl TransactionSet {
    /// Create a set with configuration read from the environment.
    ///
    /// The new set has a read-only database mode, no open database, no
    /// keyring, an empty element list and a running total timer. The
    /// transaction id is seeded from `SOURCE_DATE_EPOCH` when present,
    /// else from the wall clock.
    pub fn create() -> Self {
        Self::create_with_settings(Settings::from_env())
    }

    /// Create a set from explicit configuration.
    pub fn create_with_settings(settings: Settings) -> Self {
        let override_time = settings.source_date_epoch;
        let tid = override_time.unwrap_or_else(|| Utc::now().timestamp()) as u32;

        let mut ops = OpSet::new();
        ops.enter(OpKind::Total);

        let inner = TsInner {
            root_dir: RefCell::new(PathBuf::from("/")),
            db: RefCell::new(None),
            db_mode: Cell::new(DbMode::ReadOnly),
            keyring: RefCell::new(None),
            keystore: Cell::new(None),
            // The signature policy starts permissive; the package verify
            // flags come from configuration
            vs_flags: Cell::new(VerifyFlags::empty()),
            vfy_flags: Cell::new(settings.verify_flags),
            vfy_level: Cell::new(settings.verify_level),
            trans_flags: Cell::new(TransFlags::empty()),
            ignore_set: Cell::new(ProblemFilter::empty()),
            color: Cell::new(settings.color),
            pref_color: Cell::new(settings.prefer_color),
            tid: Cell::new(tid),
            override_time: Cell::new(override_time),
            script_stream: RefCell::new(None),
            notify: RefCell::new(None),
            notify_style: Cell::new(0),
            change: RefCell::new(None),
            solve: RefCell::new(None),
            plugins: RefCell::new(None),
            pending_triggers: RefCell::new(Vec::with_capacity(10)),
            lock_path: RefCell::new(None),
            lock: RefCell::new(None),
            min_writes: Cell::new(settings.minimize_writes),
            stats_enabled: Cell::new(settings.stats),
            ops: RefCell::new(ops),
            members: RefCell::new(Members::new()),
            settings,
        };

        Self {
            inner: Rc::new(inner),
        }
    }

    /// Number of live handles on this set.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    // ------------------------------------------------------------------
    // Root directory

    pub fn root_dir(&self) -> PathBuf {
        self.inner.root_dir.borrow().clone()
    }

    /// Set the root directory. `None` resets to `/`; a relative path is
    /// rejected and leaves the set unchanged.
    pub fn set_root_dir(&self, root: Option<&Path>) -> Result<()> {
        let root = match root {
            None => PathBuf::from("/"),
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => {
                return Err(Error::InvalidRoot(p.display().to_string()));
            }
        };
        *self.inner.root_dir.borrow_mut() = root;
        // The lock path derives from the root; re-resolve on next use
        *self.inner.lock_path.borrow_mut() = None;
        Ok(())
    }

    /// Database subdirectory under the root.
    pub fn dbpath(&self) -> &str {
        &self.inner.settings.dbpath
    }

    // ------------------------------------------------------------------
    // Database binding

    /// Open the database in `mode`. A handle already open in that mode is
    /// kept; any other handle is closed and reopened.
    pub fn open_db(&self, mode: DbMode) -> Result<()> {
        if let Some(db) = &*self.inner.db.borrow() {
            if db.mode() == mode {
                return Ok(());
            }
        }
        self.close_db()?;

        self.inner.db_mode.set(mode);
        match PackageDb::open(&self.root_dir(), self.dbpath(), mode) {
            Ok(db) => {
                *self.inner.db.borrow_mut() = Some(db);
                Ok(())
            }
            Err(e) => {
                error!(
                    "cannot open packages database in {}",
                    db::db_dir(&self.root_dir(), self.dbpath()).display()
                );
                Err(e)
            }
        }
    }

    /// Close the database, folding its operation counters into the set.
    pub fn close_db(&self) -> Result<()> {
        if let Some(db) = self.inner.db.borrow_mut().take() {
            let stats = db.stats();
            let mut ops = self.inner.ops.borrow_mut();
            ops.fold(OpKind::DbGet, &stats.get);
            ops.fold(OpKind::DbPut, &stats.put);
            ops.fold(OpKind::DbDel, &stats.del);
        }
        Ok(())
    }

    pub fn db_is_open(&self) -> bool {
        self.inner.db.borrow().is_some()
    }

    /// The mode the database was last opened with.
    pub fn db_mode(&self) -> DbMode {
        self.inner.db_mode.get()
    }

    /// Change the recorded database mode. Only permitted while no handle
    /// is open.
    pub fn set_db_mode(&self, mode: DbMode) -> Result<()> {
        if self.db_is_open() {
            return Err(Error::InvalidArgument(
                "cannot change mode of an open database".to_string(),
            ));
        }
        self.inner.db_mode.set(mode);
        Ok(())
    }

    pub(crate) fn with_db_mut<R>(
        &self,
        f: impl FnOnce(&mut PackageDb) -> Result<R>,
    ) -> Result<R> {
        match self.inner.db.borrow_mut().as_mut() {
            Some(db) => f(db),
            None => Err(Error::Database(
                "packages database is not open".to_string(),
            )),
        }
    }

    /// Create the database under a write transaction. `perms` is the mode
    /// of the created database directory.
    pub fn init_db(&self, perms: u32) -> Result<()> {
        let txn = self.begin(TxnMode::Write)?;
        let rc = PackageDb::init(&self.root_dir(), self.dbpath(), perms);
        txn.end();
        rc
    }

    /// Rebuild the database in place under a write transaction.
    ///
    /// Refused while elements are pending; a rebuild under queued work
    /// would invalidate their database offsets. Salvage mode is taken from
    /// configuration, and the header check rides along unless header
    /// verification is disabled.
    pub fn rebuild_db(&self) -> Result<()> {
        let pending = self.n_elements();
        if pending > 0 {
            return Err(Error::ElementsPending(pending));
        }

        let salvage = self.inner.settings.rebuild_salvage;
        let txn = self.begin(TxnMode::Write)?;
        self.close_db()?;

        let rc = if self.vs_flags().contains(VerifyFlags::NO_HEADER_CHECK) {
            db::rebuild(&self.root_dir(), self.dbpath(), salvage, None)
        } else {
            let ts = self.clone();
            let check = move |h: &Header| ts.header_check(h);
            db::rebuild(&self.root_dir(), self.dbpath(), salvage, Some(&check))
        };
        txn.end();
        rc
    }

    /// Verify the on-disk database structure under a read transaction.
    pub fn verify_db(&self) -> Result<()> {
        let txn = self.begin(TxnMode::Read)?;
        let rc = db::verify(&self.root_dir(), self.dbpath());
        txn.end();
        rc
    }

    /// Open a match iterator over a database index.
    ///
    /// Opens the database and loads the keyring as needed. A label key
    /// containing a parenthesised version group is translated through the
    /// label grammar first. The header check is bound to the iterator
    /// unless disabled by policy.
    pub fn init_iterator(&self, index: DbIndex, key: Option<&str>) -> Result<MatchIterator> {
        if !self.db_is_open() {
            self.open_db(self.db_mode())?;
        }
        if self.inner.keyring.borrow().is_none() {
            self.load_keyring();
        }

        let translated;
        let key = match (index, key) {
            (DbIndex::Label, Some(k)) if k.contains('(') => {
                translated = parse_label_key(k).inspect_err(|e| error!("{}", e))?;
                Some(translated.as_str())
            }
            (_, k) => k,
        };

        let rows = self.with_db_mut(|db| db.find(index, key))?;

        let check = if self.vs_flags().contains(VerifyFlags::NO_HEADER_CHECK) {
            None
        } else {
            let ts = self.clone();
            Some(Box::new(move |h: &Header| ts.header_check(h)) as db::HeaderCheck)
        };
        Ok(MatchIterator::new(rows, check))
    }

    /// Verify a header against the set's policy level.
    pub fn header_check(&self, header: &Header) -> Result<()> {
        let mut level = self.vfy_level();
        if self.vs_flags().contains(VerifyFlags::NO_HEADER_DIGEST) {
            level -= VerifyLevel::DIGEST;
        }
        header.check(level)
    }

    // ------------------------------------------------------------------
    // Keyring and keystore

    /// The selected keystore backend, resolved from configuration on first
    /// use.
    pub fn keystore(&self) -> Keystore {
        match self.inner.keystore.get() {
            Some(ks) => ks,
            None => {
                let ks = Keystore::from_config(self.inner.settings.keystore.as_deref());
                self.inner.keystore.set(Some(ks));
                ks
            }
        }
    }

    /// The trust keyring. With `autoload` the keyring is loaded from the
    /// keystore on first access; the returned handle shares the cached
    /// ring and may outlive this set's reference.
    pub fn keyring(&self, autoload: bool) -> Option<Keyring> {
        if self.inner.keyring.borrow().is_none() && autoload {
            self.load_keyring();
        }
        self.inner.keyring.borrow().clone()
    }

    /// Replace the cached keyring.
    pub fn set_keyring(&self, keyring: Option<Keyring>) {
        *self.inner.keyring.borrow_mut() = keyring;
    }

    /// Load the keyring from the keystore under a read transaction.
    ///
    /// A no-op while every signature verification bit is disabled: with
    /// signature checking fully off there is nothing to trust.
    fn load_keyring(&self) {
        if self
            .vs_flags()
            .contains(VerifyFlags::MASK_NO_SIGNATURES)
        {
            return;
        }
        let keystore = self.keystore();
        let keyring = Keyring::new();
        match self.begin(TxnMode::Read) {
            Ok(txn) => {
                if let Err(e) = keystore.load_keys(&txn, &keyring) {
                    warn!("failed to load keyring: {}", e);
                }
                txn.end();
            }
            Err(e) => warn!("cannot load keyring: {}", e),
        }
        *self.inner.keyring.borrow_mut() = Some(keyring);
    }

    // ------------------------------------------------------------------
    // Flags and colours

    pub fn vs_flags(&self) -> VerifyFlags {
        self.inner.vs_flags.get()
    }

    /// Set the signature verification flags, returning the previous value.
    pub fn set_vs_flags(&self, flags: VerifyFlags) -> VerifyFlags {
        self.inner.vs_flags.replace(flags)
    }

    pub fn vfy_flags(&self) -> VerifyFlags {
        self.inner.vfy_flags.get()
    }

    pub fn set_vfy_flags(&self, flags: VerifyFlags) -> VerifyFlags {
        self.inner.vfy_flags.replace(flags)
    }

    pub fn vfy_level(&self) -> VerifyLevel {
        self.inner.vfy_level.get()
    }

    pub fn set_vfy_level(&self, level: VerifyLevel) -> VerifyLevel {
        self.inner.vfy_level.replace(level)
    }

    pub fn flags(&self) -> TransFlags {
        self.inner.trans_flags.get()
    }

    pub fn set_flags(&self, flags: TransFlags) -> TransFlags {
        self.inner.trans_flags.replace(flags)
    }

    pub fn filter_flags(&self) -> ProblemFilter {
        self.inner.ignore_set.get()
    }

    pub fn set_filter_flags(&self, filter: ProblemFilter) -> ProblemFilter {
        self.inner.ignore_set.replace(filter)
    }

    pub fn color(&self) -> u32 {
        self.inner.color.get()
    }

    pub fn set_color(&self, color: u32) -> u32 {
        self.inner.color.replace(color)
    }

    pub fn pref_color(&self) -> u32 {
        self.inner.pref_color.get()
    }

    pub fn set_pref_color(&self, color: u32) -> u32 {
        self.inner.pref_color.replace(color)
    }

    pub fn min_writes(&self) -> bool {
        self.inner.min_writes.get()
    }

    pub fn set_min_writes(&self, min_writes: bool) -> bool {
        self.inner.min_writes.replace(min_writes)
    }

    // ------------------------------------------------------------------
    // Time and identity

    pub fn tid(&self) -> u32 {
        self.inner.tid.get()
    }

    pub fn set_tid(&self, tid: u32) -> u32 {
        self.inner.tid.replace(tid)
    }

    /// Current time in seconds. With an override active (from
    /// `SOURCE_DATE_EPOCH`) the override is returned and then advanced by
    /// `step`, giving deterministic, monotonic timestamps.
    pub fn get_time(&self, step: i64) -> i64 {
        match self.inner.override_time.get() {
            None => Utc::now().timestamp(),
            Some(t) => {
                self.inner.override_time.set(Some(t + step));
                t
            }
        }
    }

    // ------------------------------------------------------------------
    // List configuration

    pub fn netshared_paths(&self) -> Vec<String> {
        self.inner.settings.netshared_paths.clone()
    }

    pub fn install_langs(&self) -> Vec<String> {
        self.inner.settings.install_langs.clone()
    }

    // ------------------------------------------------------------------
    // Scriptlet stream

    pub fn script_stream(&self) -> Option<ScriptStream> {
        self.inner.script_stream.borrow().clone()
    }

    pub fn set_script_stream(&self, stream: Option<ScriptStream>) {
        *self.inner.script_stream.borrow_mut() = stream;
    }

    // ------------------------------------------------------------------
    // Callbacks

    pub fn set_notify_callback(&self, notify: Option<NotifyFn>) {
        *self.inner.notify.borrow_mut() = notify;
    }

    /// Notify style: 0 passes the element's header to the callback, any
    /// other value passes the element itself.
    pub fn notify_style(&self) -> u32 {
        self.inner.notify_style.get()
    }

    pub fn set_notify_style(&self, style: u32) {
        self.inner.notify_style.set(style);
    }

    /// Dispatch a progress event. Callbacks must not reenter the callback
    /// surface of the same set.
    pub fn notify(
        &self,
        element: Option<&Element>,
        event: NotifyEvent,
        amount: u64,
        total: u64,
    ) {
        let mut slot = self.inner.notify.borrow_mut();
        if let Some(notify) = slot.as_mut() {
            let arg = element.map(|e| {
                if self.inner.notify_style.get() == 0 {
                    CallbackArg::Header(e.header())
                } else {
                    CallbackArg::Element(e)
                }
            });
            let key = element.and_then(|e| e.key());
            notify(arg, event, amount, total, key);
        }
    }

    pub fn set_change_callback(&self, change: Option<ChangeFn>) {
        *self.inner.change.borrow_mut() = change;
    }

    /// Dispatch a membership change event. Returns the callback's result,
    /// or 0 when no callback is installed.
    pub fn notify_change(
        &self,
        event: ChangeEvent,
        element: &Element,
        other: Option<&Element>,
    ) -> i32 {
        let mut slot = self.inner.change.borrow_mut();
        match slot.as_mut() {
            Some(change) => change(event, element, other),
            None => 0,
        }
    }

    pub fn set_solve_callback(&self, solve: Option<SolveFn>) {
        *self.inner.solve.borrow_mut() = solve;
    }

    /// Ask the external solver for a dependency. Non-zero means not found;
    /// with no solver installed everything is not found.
    pub fn solve(&self, dep: &str) -> i32 {
        let mut slot = self.inner.solve.borrow_mut();
        match slot.as_mut() {
            Some(solve) => solve(dep),
            None => 1,
        }
    }

    // ------------------------------------------------------------------
    // Elements

    /// Add an install element. The package name is interned in the shared
    /// pool and the element is indexed for the solver; an `Added` change
    /// event is dispatched.
    pub fn add_install(&self, header: Header, key: Option<&str>) -> Result<Element> {
        if header.name.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot add element with empty package name".to_string(),
            ));
        }
        let element = {
            let mut members = self.inner.members.borrow_mut();
            let name = members.pool().intern(&header.name);
            let element = Element::install(name, header, key);
            members.add(element.clone());
            element
        };
        self.notify_change(ChangeEvent::Added, &element, None);
        Ok(element)
    }

    /// Add an erase element for the database record at `db_offset`. The
    /// offset joins the removed set; an `Added` change event is dispatched.
    pub fn add_erase(&self, header: Header, db_offset: u32) -> Result<Element> {
        if header.name.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot add element with empty package name".to_string(),
            ));
        }
        let element = {
            let mut members = self.inner.members.borrow_mut();
            let name = members.pool().intern(&header.name);
            let element = Element::erase(name, header, db_offset);
            members.add(element.clone());
            element
        };
        self.notify_change(ChangeEvent::Added, &element, None);
        Ok(element)
    }

    pub fn n_elements(&self) -> usize {
        self.inner.members.borrow().order.len()
    }

    /// The element at `index`, bounds-checked.
    pub fn element(&self, index: usize) -> Option<Element> {
        self.inner.members.borrow().order.get(index).cloned()
    }

    /// Forward iterator over the element order.
    pub fn iter(&self) -> TsIter {
        TsIter::new(self)
    }

    /// Install elements registered under `name`, for the external solver.
    pub fn added_with_name(&self, name: &str) -> Vec<Element> {
        self.inner.members.borrow().added_with_name(name)
    }

    /// Database offsets currently marked for erase.
    pub fn removed_offsets(&self) -> Vec<u32> {
        self.inner.members.borrow().removed.iter().copied().collect()
    }

    /// Capabilities this implementation provides by itself.
    pub fn builtin_provides(&self) -> Vec<String> {
        self.inner.members.borrow_mut().builtin_caps()
    }

    /// The shared string pool, created on first demand. The pool survives
    /// `empty` and is dropped only with the set.
    pub fn pool(&self) -> StringPool {
        self.inner.members.borrow_mut().pool()
    }

    /// Drop solver state: per-element dependency caches, the added-package
    /// index and the built-in capability cache. Elements stay queued.
    pub fn clean(&self) {
        self.inner.members.borrow_mut().clean();
    }

    /// Remove every element, dispatching one `Deleted` change event per
    /// element. Erase bookkeeping is cleared; the string pool is kept.
    pub fn empty(&self) {
        self.clean();
        let taken = self.inner.members.borrow_mut().take_all();
        for element in &taken {
            self.notify_change(ChangeEvent::Deleted, element, None);
        }
    }

    // ------------------------------------------------------------------
    // Plugins and triggers

    /// The plugin registry, created on first access.
    pub fn plugins(&self) -> RefMut<'_, PluginRegistry> {
        let slot = self.inner.plugins.borrow_mut();
        RefMut::map(slot, |p| p.get_or_insert_with(PluginRegistry::new))
    }

    /// Queue a trigger for a later run.
    pub fn defer_trigger(&self, trigger: PendingTrigger) {
        self.inner.pending_triggers.borrow_mut().push(trigger);
    }

    /// Drain the queued triggers.
    pub fn take_pending_triggers(&self) -> Vec<PendingTrigger> {
        std::mem::take(&mut *self.inner.pending_triggers.borrow_mut())
    }

    // ------------------------------------------------------------------
    // Statistics

    pub fn op_stats(&self, kind: OpKind) -> OpStats {
        self.inner.ops.borrow().get(kind)
    }

    pub fn op_enter(&self, kind: OpKind) {
        self.inner.ops.borrow_mut().enter(kind);
    }

    pub fn op_exit(&self, kind: OpKind, bytes: u64) {
        self.inner.ops.borrow_mut().exit(kind, bytes);
    }

    /// Whether the statistics table is dumped at destruction. Defaults to
    /// the one-shot environment read at create time.
    pub fn stats_enabled(&self) -> bool {
        self.inner.stats_enabled.get()
    }

    pub fn set_stats_enabled(&self, enabled: bool) {
        self.inner.stats_enabled.set(enabled);
    }

    // ------------------------------------------------------------------
    // Lock plumbing for transactions

    fn resolved_lock_path(&self) -> PathBuf {
        if let Some(path) = &*self.inner.lock_path.borrow() {
            return path.clone();
        }
        let configured = self.inner.settings.lock_path.as_deref();
        let relative = match configured {
            Some(p) if !p.is_empty() && !p.starts_with('%') => p,
            _ => DEFAULT_LOCK_PATH,
        };
        let path = self.root_dir().join(relative.trim_start_matches('/'));
        *self.inner.lock_path.borrow_mut() = Some(path.clone());
        path
    }

    pub(crate) fn ensure_lock(&self, path: &Path) -> Result<()> {
        let mut lock = self.inner.lock.borrow_mut();
        if lock.is_none() {
            *lock = Some(TransactionLock::new(path, "transaction")?);
        }
        Ok(())
    }

    pub(crate) fn acquire_lock(&self, mode: LockMode) -> Result<()> {
        match &*self.inner.lock.borrow() {
            Some(lock) => lock.acquire(mode),
            None => Err(Error::LockUnavailable(
                "transaction lock was never created".to_string(),
            )),
        }
    }

    pub(crate) fn release_lock(&self) {
        if let Some(lock) = &*self.inner.lock.borrow() {
            lock.release();
        }
    }

    /// The lock file path, once a transaction has resolved it.
    pub fn lock_path(&self) -> Option<PathBuf> {
        self.inner.lock_path.borrow().clone()
    }
}

impl Default for TransactionSet {
    fn default() -> Self {
        Self::create()
    }
}

impl std::fmt::Debug for TransactionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSet")
            .field("root_dir", &self.root_dir())
            .field("db_mode", &self.db_mode())
            .field("n_elements", &self.n_elements())
            .field("tid", &self.tid())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl Drop for TsInner {
    fn drop(&mut self) {
        // No change events during teardown
        *self.change.borrow_mut() = None;
        *self.notify.borrow_mut() = None;

        self.members.borrow_mut().destroy();

        if let Some(db) = self.db.borrow_mut().take() {
            let stats = db.stats();
            let mut ops = self.ops.borrow_mut();
            ops.fold(OpKind::DbGet, &stats.get);
            ops.fold(OpKind::DbPut, &stats.put);
            ops.fold(OpKind::DbDel, &stats.del);
        }

        let mut ops = self.ops.borrow_mut();
        ops.exit(OpKind::Total, 0);
        if self.stats_enabled.get() {
            ops.dump();
        }
    }
}
