// src/db/mod.rs

//! Packages database binding
//!
//! The database lives under the set's root at `<dbpath>/packages.sqlite`
//! and stores package headers as JSON records addressed by a stable integer
//! offset, plus the trusted public keys for the database-backed keystore.
//!
//! The handle tracks the mode it was opened with and counts get/put/delete
//! traffic; the owning transaction set folds those counters into its own
//! statistics when the handle closes. Rebuild and verify are whole-file
//! operations performed on a closed database.

pub mod schema;

use crate::header::Header;
use crate::settings::DB_FILE_NAME;
use crate::stats::OpStats;
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags, params};
use std::fs::{self, DirBuilder};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a database handle was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbMode {
    #[default]
    ReadOnly,
    ReadWrite,
    /// Read-write, creating the database and its directory as needed
    Create,
}

/// Database indexes a lookup can address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbIndex {
    /// Exact package name
    Name,
    /// Human-readable label: name, name-version or name-version-release
    Label,
    /// Record offset
    Offset,
}

/// Per-handle operation counters, folded into the set on close
#[derive(Debug, Clone, Copy, Default)]
pub struct DbOpStats {
    pub get: OpStats,
    pub put: OpStats,
    pub del: OpStats,
}

impl DbOpStats {
    fn record(slot: &mut OpStats, bytes: u64, started: Instant) {
        slot.count += 1;
        slot.bytes += bytes;
        slot.micros += started.elapsed().as_micros() as u64;
    }
}

/// An open packages database
#[derive(Debug)]
pub struct PackageDb {
    conn: Connection,
    path: PathBuf,
    mode: DbMode,
    stats: DbOpStats,
}

/// Resolve the database file path for a root and dbpath.
pub fn db_file(root: &Path, dbpath: &str) -> PathBuf {
    root.join(dbpath).join(DB_FILE_NAME)
}

/// Resolve the database directory for a root and dbpath.
pub fn db_dir(root: &Path, dbpath: &str) -> PathBuf {
    root.join(dbpath)
}

impl PackageDb {
    /// Open the database under `root` in the requested mode.
    pub fn open(root: &Path, dbpath: &str, mode: DbMode) -> Result<Self> {
        let path = db_file(root, dbpath);

        let conn = match mode {
            DbMode::ReadOnly => {
                Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?
            }
            DbMode::ReadWrite => {
                Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_WRITE)?
            }
            DbMode::Create => {
                create_db_dir(root, dbpath, 0o755)?;
                let conn = Connection::open_with_flags(
                    &path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
                )?;
                schema::create(&conn)?;
                conn
            }
        };

        debug!("opened packages database {} ({:?})", path.display(), mode);
        Ok(Self {
            conn,
            path,
            mode,
            stats: DbOpStats::default(),
        })
    }

    /// Create a fresh database and its directory with the given permissions.
    pub fn init(root: &Path, dbpath: &str, perms: u32) -> Result<()> {
        create_db_dir(root, dbpath, perms)?;
        let path = db_file(root, dbpath);
        let conn = Connection::open(&path)?;
        schema::create(&conn)?;
        info!("initialized packages database {}", path.display());
        Ok(())
    }

    pub fn mode(&self) -> DbMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn stats(&self) -> DbOpStats {
        self.stats
    }

    /// Store a header, returning its record offset.
    pub fn add_header(&mut self, header: &Header) -> Result<u32> {
        let started = Instant::now();
        let record = serde_json::to_string(header)
            .map_err(|e| Error::Database(format!("cannot encode header: {}", e)))?;
        self.conn.execute(
            "INSERT INTO packages (name, version, release, label, header) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                header.name,
                header.version,
                header.release,
                header.label(),
                record
            ],
        )?;
        let offset = self.conn.last_insert_rowid() as u32;
        DbOpStats::record(&mut self.stats.put, record.len() as u64, started);
        Ok(offset)
    }

    /// Remove the record at `offset`. Returns whether it existed.
    pub fn delete_header(&mut self, offset: u32) -> Result<bool> {
        let started = Instant::now();
        let n = self
            .conn
            .execute("DELETE FROM packages WHERE offset = ?1", params![offset])?;
        DbOpStats::record(&mut self.stats.del, 0, started);
        Ok(n > 0)
    }

    /// Fetch the header at `offset`.
    pub fn header(&mut self, offset: u32) -> Result<Option<Header>> {
        let started = Instant::now();
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT header FROM packages WHERE offset = ?1",
                params![offset],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        let bytes = row.as_ref().map(|r| r.len() as u64).unwrap_or(0);
        DbOpStats::record(&mut self.stats.get, bytes, started);
        row.map(|r| decode_header(&r)).transpose()
    }

    /// Look up records by index. A `None` key returns every record in
    /// offset order.
    pub fn find(&mut self, index: DbIndex, key: Option<&str>) -> Result<Vec<(u32, Header)>> {
        let started = Instant::now();
        let (sql, bound_key) = match (index, key) {
            (_, None) => (
                "SELECT offset, header FROM packages ORDER BY offset",
                None,
            ),
            (DbIndex::Name, Some(k)) => (
                "SELECT offset, header FROM packages WHERE name = ?1 ORDER BY offset",
                Some(k.to_string()),
            ),
            (DbIndex::Label, Some(k)) => (
                "SELECT offset, header FROM packages WHERE name = ?1 OR label = ?1 \
                 OR (name || '-' || version) = ?1 ORDER BY offset",
                Some(k.to_string()),
            ),
            (DbIndex::Offset, Some(k)) => {
                let offset: u32 = k
                    .parse()
                    .map_err(|_| Error::InvalidArgument(format!("bad record offset: {}", k)))?;
                return Ok(self
                    .header(offset)?
                    .map(|h| vec![(offset, h)])
                    .unwrap_or_default());
            }
        };

        let mut rows = Vec::new();
        let mut bytes = 0u64;
        {
            let mut stmt = self.conn.prepare(sql)?;
            let mapped = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(u32, String)> {
                Ok((row.get(0)?, row.get(1)?))
            };
            let found: Vec<(u32, String)> = match &bound_key {
                Some(k) => stmt
                    .query_map(params![k], mapped)?
                    .collect::<rusqlite::Result<_>>()?,
                None => stmt
                    .query_map([], mapped)?
                    .collect::<rusqlite::Result<_>>()?,
            };
            for (offset, record) in found {
                bytes += record.len() as u64;
                rows.push((offset, decode_header(&record)?));
            }
        }
        DbOpStats::record(&mut self.stats.get, bytes, started);
        Ok(rows)
    }

    /// Number of package records.
    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Persist a public key. With `replace` set an existing record for the
    /// fingerprint is overwritten; otherwise an existing record is left
    /// alone. Returns whether the store changed.
    pub fn put_pubkey(&mut self, fingerprint: &str, data: &[u8], replace: bool) -> Result<bool> {
        let started = Instant::now();
        let n = if replace {
            self.conn.execute(
                "INSERT INTO pubkeys (fingerprint, data) VALUES (?1, ?2) \
                 ON CONFLICT(fingerprint) DO UPDATE SET data = excluded.data",
                params![fingerprint, data],
            )?
        } else {
            self.conn.execute(
                "INSERT OR IGNORE INTO pubkeys (fingerprint, data) VALUES (?1, ?2)",
                params![fingerprint, data],
            )?
        };
        DbOpStats::record(&mut self.stats.put, data.len() as u64, started);
        Ok(n > 0)
    }

    /// Remove a public key record. Returns whether it existed.
    pub fn delete_pubkey(&mut self, fingerprint: &str) -> Result<bool> {
        let started = Instant::now();
        let n = self.conn.execute(
            "DELETE FROM pubkeys WHERE fingerprint = ?1",
            params![fingerprint],
        )?;
        DbOpStats::record(&mut self.stats.del, 0, started);
        Ok(n > 0)
    }

    /// All stored public key records.
    pub fn pubkeys(&mut self) -> Result<Vec<Vec<u8>>> {
        let started = Instant::now();
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM pubkeys ORDER BY fingerprint")?;
        let keys: Vec<Vec<u8>> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        let bytes: u64 = keys.iter().map(|k| k.len() as u64).sum();
        DbOpStats::record(&mut self.stats.get, bytes, started);
        Ok(keys)
    }

    /// Number of stored public keys.
    pub fn pubkey_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pubkeys", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

/// Header check applied while a match iterator drains
pub type HeaderCheck = Box<dyn Fn(&Header) -> Result<()>>;

/// Cursor over the records a lookup matched. When a header check is bound,
/// records failing it are skipped with a warning rather than returned.
pub struct MatchIterator {
    rows: std::vec::IntoIter<(u32, Header)>,
    check: Option<HeaderCheck>,
}

impl MatchIterator {
    pub(crate) fn new(rows: Vec<(u32, Header)>, check: Option<HeaderCheck>) -> Self {
        Self {
            rows: rows.into_iter(),
            check,
        }
    }
}

impl Iterator for MatchIterator {
    type Item = (u32, Header);

    fn next(&mut self) -> Option<Self::Item> {
        for (offset, header) in self.rows.by_ref() {
            if let Some(check) = &self.check {
                if let Err(e) = check(&header) {
                    warn!("skipping record {} ({}): {}", offset, header, e);
                    continue;
                }
            }
            return Some((offset, header));
        }
        None
    }
}

fn decode_header(record: &str) -> Result<Header> {
    serde_json::from_str(record)
        .map_err(|e| Error::Database(format!("cannot decode header record: {}", e)))
}

fn create_db_dir(root: &Path, dbpath: &str, perms: u32) -> Result<()> {
    let dir = db_dir(root, dbpath);
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(perms);
    }
    #[cfg(not(unix))]
    let _ = perms;
    builder.create(&dir)?;
    Ok(())
}

/// Rebuild the database at rest: copy every decodable record into a fresh
/// file and swap it into place. `check` vets each header on the way over;
/// records that fail it are dropped with a warning. In salvage mode
/// undecodable records are dropped too instead of failing the rebuild.
pub fn rebuild(
    root: &Path,
    dbpath: &str,
    salvage: bool,
    check: Option<&dyn Fn(&Header) -> Result<()>>,
) -> Result<()> {
    let src_path = db_file(root, dbpath);
    if !src_path.exists() {
        return Err(Error::Database(format!(
            "no packages database to rebuild in {}",
            db_dir(root, dbpath).display()
        )));
    }
    let tmp_path = src_path.with_extension("sqlite.rebuild");
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }

    {
        let src = Connection::open_with_flags(&src_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let dst = Connection::open(&tmp_path)?;
        schema::create(&dst)?;

        let mut kept = 0u64;
        let mut dropped = 0u64;

        let mut stmt = src.prepare(
            "SELECT offset, name, version, release, label, header \
             FROM packages ORDER BY offset",
        )?;
        let rows: Vec<(u32, String, String, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        for (offset, name, version, release, label, record) in rows {
            let header = match decode_header(&record) {
                Ok(h) => h,
                Err(e) if salvage => {
                    warn!("dropping undecodable record {}: {}", offset, e);
                    dropped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(check) = check {
                if let Err(e) = check(&header) {
                    warn!("dropping record {} ({}): {}", offset, header, e);
                    dropped += 1;
                    continue;
                }
            }
            // Offsets are preserved; erase bookkeeping references them
            dst.execute(
                "INSERT INTO packages (offset, name, version, release, label, header) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![offset, name, version, release, label, record],
            )?;
            kept += 1;
        }

        let mut key_stmt = src.prepare("SELECT fingerprint, data FROM pubkeys")?;
        let keys: Vec<(String, Vec<u8>)> = key_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        for (fingerprint, data) in keys {
            dst.execute(
                "INSERT INTO pubkeys (fingerprint, data) VALUES (?1, ?2)",
                params![fingerprint, data],
            )?;
        }

        info!(
            "rebuilt packages database: {} records kept, {} dropped",
            kept, dropped
        );
    }

    fs::rename(&tmp_path, &src_path)?;
    Ok(())
}

/// Verify the on-disk structure of a closed database.
pub fn verify(root: &Path, dbpath: &str) -> Result<()> {
    let path = db_file(root, dbpath);
    let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let status: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if status != "ok" {
        return Err(Error::Database(format!(
            "integrity check failed for {}: {}",
            path.display(),
            status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DBPATH: &str = "var/lib/granary";

    fn open_fresh(root: &Path) -> PackageDb {
        PackageDb::open(root, DBPATH, DbMode::Create).unwrap()
    }

    #[test]
    fn test_open_create_and_reopen_readonly() {
        let dir = TempDir::new().unwrap();
        {
            let db = open_fresh(dir.path());
            assert_eq!(db.mode(), DbMode::Create);
        }
        let db = PackageDb::open(dir.path(), DBPATH, DbMode::ReadOnly).unwrap();
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_open_readonly_missing_fails() {
        let dir = TempDir::new().unwrap();
        assert!(PackageDb::open(dir.path(), DBPATH, DbMode::ReadOnly).is_err());
    }

    #[test]
    fn test_add_get_delete_header() {
        let dir = TempDir::new().unwrap();
        let mut db = open_fresh(dir.path());

        let header = Header::new("bash", "5.2", "1").seal();
        let offset = db.add_header(&header).unwrap();

        let loaded = db.header(offset).unwrap().unwrap();
        assert_eq!(loaded, header);

        assert!(db.delete_header(offset).unwrap());
        assert!(!db.delete_header(offset).unwrap());
        assert!(db.header(offset).unwrap().is_none());
    }

    #[test]
    fn test_find_by_name_and_label() {
        let dir = TempDir::new().unwrap();
        let mut db = open_fresh(dir.path());

        db.add_header(&Header::new("bash", "5.2", "1").seal()).unwrap();
        db.add_header(&Header::new("sed", "4.9", "2").seal()).unwrap();

        assert_eq!(db.find(DbIndex::Name, Some("bash")).unwrap().len(), 1);
        assert_eq!(db.find(DbIndex::Label, Some("bash")).unwrap().len(), 1);
        assert_eq!(db.find(DbIndex::Label, Some("bash-5.2")).unwrap().len(), 1);
        assert_eq!(
            db.find(DbIndex::Label, Some("bash-5.2-1")).unwrap().len(),
            1
        );
        assert!(db.find(DbIndex::Label, Some("bash-9")).unwrap().is_empty());
        assert_eq!(db.find(DbIndex::Name, None).unwrap().len(), 2);
    }

    #[test]
    fn test_find_by_offset() {
        let dir = TempDir::new().unwrap();
        let mut db = open_fresh(dir.path());
        let offset = db.add_header(&Header::new("bash", "5.2", "1").seal()).unwrap();

        let found = db.find(DbIndex::Offset, Some(&offset.to_string())).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, offset);
        assert!(db.find(DbIndex::Offset, Some("not-a-number")).is_err());
    }

    #[test]
    fn test_stats_count_traffic() {
        let dir = TempDir::new().unwrap();
        let mut db = open_fresh(dir.path());

        db.add_header(&Header::new("bash", "5.2", "1").seal()).unwrap();
        db.find(DbIndex::Name, Some("bash")).unwrap();

        let stats = db.stats();
        assert_eq!(stats.put.count, 1);
        assert!(stats.put.bytes > 0);
        assert_eq!(stats.get.count, 1);
    }

    #[test]
    fn test_pubkey_records() {
        let dir = TempDir::new().unwrap();
        let mut db = open_fresh(dir.path());

        assert!(db.put_pubkey("ABCD", b"key material", false).unwrap());
        assert!(!db.put_pubkey("ABCD", b"other material", false).unwrap());
        assert_eq!(db.pubkeys().unwrap(), vec![b"key material".to_vec()]);

        assert!(db.put_pubkey("ABCD", b"other material", true).unwrap());
        assert_eq!(db.pubkeys().unwrap(), vec![b"other material".to_vec()]);

        assert!(db.delete_pubkey("ABCD").unwrap());
        assert!(!db.delete_pubkey("ABCD").unwrap());
        assert_eq!(db.pubkey_count().unwrap(), 0);
    }

    #[test]
    fn test_rebuild_preserves_offsets() {
        let dir = TempDir::new().unwrap();
        let first;
        let second;
        {
            let mut db = open_fresh(dir.path());
            first = db.add_header(&Header::new("bash", "5.2", "1").seal()).unwrap();
            second = db.add_header(&Header::new("sed", "4.9", "2").seal()).unwrap();
            db.delete_header(first).unwrap();
        }

        rebuild(dir.path(), DBPATH, false, None).unwrap();

        let mut db = PackageDb::open(dir.path(), DBPATH, DbMode::ReadOnly).unwrap();
        assert_eq!(db.count().unwrap(), 1);
        assert_eq!(db.header(second).unwrap().unwrap().name, "sed");
    }

    #[test]
    fn test_rebuild_check_drops_bad_records() {
        let dir = TempDir::new().unwrap();
        {
            let mut db = open_fresh(dir.path());
            db.add_header(&Header::new("good", "1", "1").seal()).unwrap();
            db.add_header(&Header::new("bad", "1", "1")).unwrap();
        }

        let check = |h: &Header| h.check(crate::flags::VerifyLevel::DIGEST);
        rebuild(dir.path(), DBPATH, false, Some(&check)).unwrap();

        let db = PackageDb::open(dir.path(), DBPATH, DbMode::ReadOnly).unwrap();
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_rebuild_missing_db_fails() {
        let dir = TempDir::new().unwrap();
        assert!(rebuild(dir.path(), DBPATH, false, None).is_err());
    }

    #[test]
    fn test_verify() {
        let dir = TempDir::new().unwrap();
        {
            open_fresh(dir.path());
        }
        verify(dir.path(), DBPATH).unwrap();
    }
}
