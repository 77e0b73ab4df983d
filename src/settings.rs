// src/settings.rs

//! Environment-derived configuration
//!
//! All tunables are read once when a transaction set is created; later
//! changes to the environment do not affect an existing set. Paths are
//! interpreted relative to the set's root directory.

use crate::flags::{VerifyFlags, VerifyLevel};
use std::env;
use tracing::warn;

/// Database directory under the root when `GRANARY_DBPATH` is unset
pub const DEFAULT_DBPATH: &str = "var/lib/granary";

/// Lock file under the root when `GRANARY_LOCK_PATH` is unset or unusable
pub const DEFAULT_LOCK_PATH: &str = "var/lib/granary/.granary.lock";

/// Database file name inside the dbpath directory
pub const DB_FILE_NAME: &str = "packages.sqlite";

/// Snapshot of the environment taken at set creation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Raw keystore selector (`fs` or `db`); resolved on first keystore use
    pub keystore: Option<String>,
    /// Raw lock path override, if any
    pub lock_path: Option<String>,
    /// Database subdirectory under the root
    pub dbpath: String,
    pub rebuild_salvage: bool,
    pub verify_flags: VerifyFlags,
    pub verify_level: VerifyLevel,
    pub color: u32,
    pub prefer_color: u32,
    pub netshared_paths: Vec<String>,
    pub install_langs: Vec<String>,
    pub minimize_writes: bool,
    pub stats: bool,
    /// `SOURCE_DATE_EPOCH`, when present and parseable
    pub source_date_epoch: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keystore: None,
            lock_path: None,
            dbpath: DEFAULT_DBPATH.to_string(),
            rebuild_salvage: false,
            verify_flags: VerifyFlags::empty(),
            verify_level: VerifyLevel::default(),
            color: 0,
            prefer_color: 2,
            netshared_paths: Vec::new(),
            install_langs: Vec::new(),
            minimize_writes: false,
            stats: false,
            source_date_epoch: None,
        }
    }
}

impl Settings {
    /// Read every tunable from the environment in one shot.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            keystore: non_empty(env::var("GRANARY_KEYSTORE").ok()),
            lock_path: env::var("GRANARY_LOCK_PATH").ok(),
            dbpath: non_empty(env::var("GRANARY_DBPATH").ok()).unwrap_or(defaults.dbpath),
            rebuild_salvage: numeric("GRANARY_REBUILD_SALVAGE") != 0,
            verify_flags: VerifyFlags::from_bits_truncate(
                numeric("GRANARY_VERIFY_FLAGS") as u32
            ),
            verify_level: verify_level_from_env(),
            color: numeric("GRANARY_TRANSACTION_COLOR") as u32,
            prefer_color: match numeric("GRANARY_PREFER_COLOR") {
                0 => defaults.prefer_color,
                n => n as u32,
            },
            netshared_paths: split_list(env::var("GRANARY_NETSHARED_PATH").ok()),
            install_langs: install_langs_from_env(),
            minimize_writes: numeric("GRANARY_MINIMIZE_WRITES") > 0,
            stats: numeric("GRANARY_STATS") != 0,
            source_date_epoch: env::var("SOURCE_DATE_EPOCH")
                .ok()
                .and_then(|v| v.trim().parse::<i64>().ok()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Parse a numeric environment variable, treating absent or garbage as zero.
fn numeric(name: &str) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

/// Split a colon-delimited list, dropping empty entries.
fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn verify_level_from_env() -> VerifyLevel {
    match env::var("GRANARY_VERIFY_LEVEL").ok().as_deref() {
        Some("all") => VerifyLevel::SIGNATURE | VerifyLevel::DIGEST,
        Some("signature") => VerifyLevel::SIGNATURE,
        Some("digest") => VerifyLevel::DIGEST,
        Some("none") => VerifyLevel::empty(),
        Some("") | None => VerifyLevel::default(),
        Some(other) => {
            warn!("invalid package verify level {}", other);
            VerifyLevel::default()
        }
    }
}

/// The install-language list, where a literal `all` anywhere clears it:
/// installing every language is the same as not filtering at all.
fn install_langs_from_env() -> Vec<String> {
    let langs = split_list(env::var("GRANARY_INSTALL_LANGS").ok());
    if langs.iter().any(|l| l == "all") {
        Vec::new()
    } else {
        langs
    }
}
