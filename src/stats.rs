// src/stats.rs

//! Per-operation timing and volume counters
//!
//! Every transaction set carries a fixed table of counters, one slot per
//! operation kind. The database handle keeps its own get/put/delete slots
//! which are folded into the owning set's table when the handle closes.
//! When statistics are enabled the table is dumped to stderr at set
//! destruction.

use std::time::Instant;

/// Operation kinds tracked by a transaction set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Total,
    Check,
    Order,
    Verify,
    Fingerprint,
    Install,
    Erase,
    Scriptlets,
    Compress,
    Uncompress,
    Digest,
    Signature,
    DbAdd,
    DbRemove,
    DbGet,
    DbPut,
    DbDel,
}

impl OpKind {
    pub const COUNT: usize = 17;

    pub const ALL: [OpKind; Self::COUNT] = [
        OpKind::Total,
        OpKind::Check,
        OpKind::Order,
        OpKind::Verify,
        OpKind::Fingerprint,
        OpKind::Install,
        OpKind::Erase,
        OpKind::Scriptlets,
        OpKind::Compress,
        OpKind::Uncompress,
        OpKind::Digest,
        OpKind::Signature,
        OpKind::DbAdd,
        OpKind::DbRemove,
        OpKind::DbGet,
        OpKind::DbPut,
        OpKind::DbDel,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|k| *k == self).unwrap_or(0)
    }

    fn label(self) -> &'static str {
        match self {
            OpKind::Total => "total",
            OpKind::Check => "check",
            OpKind::Order => "order",
            OpKind::Verify => "verify",
            OpKind::Fingerprint => "fingerprint",
            OpKind::Install => "install",
            OpKind::Erase => "erase",
            OpKind::Scriptlets => "scriptlets",
            OpKind::Compress => "compress",
            OpKind::Uncompress => "uncompress",
            OpKind::Digest => "digest",
            OpKind::Signature => "signature",
            OpKind::DbAdd => "dbadd",
            OpKind::DbRemove => "dbremove",
            OpKind::DbGet => "dbget",
            OpKind::DbPut => "dbput",
            OpKind::DbDel => "dbdel",
        }
    }
}

/// A single counter slot: invocation count, bytes moved, elapsed time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub count: u32,
    pub bytes: u64,
    pub micros: u64,
}

impl OpStats {
    pub fn fold(&mut self, other: &OpStats) {
        self.count += other.count;
        self.bytes += other.bytes;
        self.micros += other.micros;
    }
}

/// The per-set counter table with running timers
#[derive(Debug, Default)]
pub struct OpSet {
    ops: [OpStats; OpKind::COUNT],
    started: [Option<Instant>; OpKind::COUNT],
}

impl OpSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing an operation. A second enter before exit restarts it.
    pub fn enter(&mut self, kind: OpKind) {
        self.started[kind.index()] = Some(Instant::now());
    }

    /// Stop timing and accumulate elapsed time plus `bytes` into the slot.
    pub fn exit(&mut self, kind: OpKind, bytes: u64) {
        let ix = kind.index();
        let micros = self.started[ix]
            .take()
            .map(|t| t.elapsed().as_micros() as u64)
            .unwrap_or(0);
        self.ops[ix].count += 1;
        self.ops[ix].bytes += bytes;
        self.ops[ix].micros += micros;
    }

    /// Fold an externally accumulated slot into the table.
    pub fn fold(&mut self, kind: OpKind, stats: &OpStats) {
        self.ops[kind.index()].fold(stats);
    }

    pub fn get(&self, kind: OpKind) -> OpStats {
        self.ops[kind.index()]
    }

    /// Dump non-empty slots to stderr, one line per operation.
    pub fn dump(&self) {
        const SCALE: u64 = 1_000_000;
        for kind in OpKind::ALL {
            let op = self.get(kind);
            if op.count == 0 {
                continue;
            }
            eprintln!(
                "   {:<12} {:6} {:6}.{:06} MB {:6}.{:06} secs",
                kind.label(),
                op.count,
                op.bytes / SCALE,
                op.bytes % SCALE,
                op.micros / SCALE,
                op.micros % SCALE
            );
        }
    }
}
