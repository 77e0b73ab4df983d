// src/db/schema.rs

//! SQLite schema for the packages database

use crate::Result;
use rusqlite::Connection;
use tracing::debug;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Create the full schema on a fresh database.
pub fn create(conn: &Connection) -> Result<()> {
    debug!("creating packages schema version {}", SCHEMA_VERSION);

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Installed package headers; offset is the stable record identity
        CREATE TABLE IF NOT EXISTS packages (
            offset INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            release TEXT NOT NULL,
            label TEXT NOT NULL,
            header TEXT NOT NULL,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_packages_name ON packages(name);
        CREATE INDEX IF NOT EXISTS idx_packages_label ON packages(label);

        -- Trusted OpenPGP public keys (database-backed keystore)
        CREATE TABLE IF NOT EXISTS pubkeys (
            fingerprint TEXT PRIMARY KEY,
            data BLOB NOT NULL,
            imported_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        ",
    )?;

    let have: Option<i32> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .ok();
    if have.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

/// Read the schema version recorded in a database.
pub fn version(conn: &Connection) -> Result<i32> {
    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);
    Ok(version)
}
