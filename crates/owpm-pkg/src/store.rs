//! The persisted lock store (`<name>.owpmlock`).
//!
//! A lock store is a SQLite database holding one `lock` table and stamped
//! with [`SCHEMA_VERSION`] through `PRAGMA user_version`. Stores with any
//! other stamp are rejected; they are never migrated.

use rusqlite::{params, Connection, Row};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

/// The only lock store layout this engine reads or writes.
pub const SCHEMA_VERSION: i64 = 1;

/// File extension of lock stores.
pub const STORE_EXT: &str = "owpmlock";

const CREATE_SCHEMA: &str = "
    CREATE TABLE lock (
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        digest TEXT NOT NULL UNIQUE,
        is_dev INTEGER NOT NULL,
        is_dep INTEGER NOT NULL
    );
";

const UPSERT: &str = "
    INSERT INTO lock (name, version, digest, is_dev, is_dep)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(digest) DO UPDATE SET
        name = CASE WHEN (excluded.version = '*', excluded.name, excluded.version)
            < (lock.version = '*', lock.name, lock.version)
            THEN excluded.name ELSE lock.name END,
        version = CASE WHEN (excluded.version = '*', excluded.name, excluded.version)
            < (lock.version = '*', lock.name, lock.version)
            THEN excluded.version ELSE lock.version END,
        is_dev = lock.is_dev AND excluded.is_dev,
        is_dep = lock.is_dep AND excluded.is_dep
";

/// Errors that can occur when working with a lock store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("lock store not found: {0}")]
    NotFound(String),

    #[error("lock store schema version {found} is not supported (expected {expected})")]
    SchemaVersionMismatch { found: i64, expected: i64 },

    #[error("lock store database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One locked package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockEntry {
    /// Package name.
    pub name: String,
    /// Resolved release, or `*` when the latest artifact was locked.
    pub version: String,
    /// Content digest; unique within a store.
    pub digest: String,
    /// Only needed for development.
    pub is_dev: bool,
    /// Pulled in by another package rather than declared.
    pub is_dep: bool,
}

impl LockEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            version: row.get(1)?,
            digest: row.get(2)?,
            is_dev: row.get(3)?,
            is_dep: row.get(4)?,
        })
    }
}

impl std::fmt::Display for LockEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}':{} ({})", self.name, self.version, self.digest)
    }
}

/// An open lock store.
///
/// Every statement goes through one connection behind a mutex, so a store
/// can be shared by the workers of a lock build.
#[derive(Debug)]
pub struct LockStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl LockStore {
    /// Create a fresh, empty store, replacing whatever was at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        Self::delete(path)?;

        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!(path = %path.display(), "created lock store");

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing store and check its schema version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }

        let store = Self {
            path: path.to_path_buf(),
            conn: Mutex::new(Connection::open(path)?),
        };
        let found = store.schema_version()?;
        if found != SCHEMA_VERSION {
            return Err(StoreError::SchemaVersionMismatch {
                found,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(store)
    }

    /// Remove a store file. Missing files are not an error.
    pub fn delete(path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let mut journal = path.as_os_str().to_owned();
        journal.push("-journal");

        for file in [path.to_path_buf(), PathBuf::from(journal)] {
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Path of the store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The schema version stamped into the file.
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let version = self
            .connection()
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(version)
    }

    /// Insert an entry, merging it into any row with the same digest.
    ///
    /// A merged row is runtime if either side is, and declared if either side
    /// is. Name and version come from the preferred side: a concrete version
    /// over `*`, then the smaller name and version. The row therefore does
    /// not depend on insert order. Returns true if a new row was written.
    pub fn insert(&self, entry: &LockEntry) -> Result<bool, StoreError> {
        let conn = self.connection();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM lock WHERE digest = ?1)",
            [&entry.digest],
            |row| row.get(0),
        )?;
        conn.execute(
            UPSERT,
            params![
                entry.name,
                entry.version,
                entry.digest,
                entry.is_dev,
                entry.is_dep
            ],
        )?;
        Ok(!exists)
    }

    /// Every locked package.
    pub fn select_all(&self) -> Result<Vec<LockEntry>, StoreError> {
        self.select("")
    }

    /// Packages needed at runtime, declared or pulled in.
    pub fn select_non_dev(&self) -> Result<Vec<LockEntry>, StoreError> {
        self.select("WHERE is_dev = 0")
    }

    /// Declared runtime packages; what a publish build installs.
    pub fn select_non_dev_non_dep(&self) -> Result<Vec<LockEntry>, StoreError> {
        self.select("WHERE is_dev = 0 AND is_dep = 0")
    }

    /// Every declared package; what a development build installs.
    pub fn select_non_dep(&self) -> Result<Vec<LockEntry>, StoreError> {
        self.select("WHERE is_dep = 0")
    }

    /// Close the connection, flushing it to disk.
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    fn select(&self, filter: &str) -> Result<Vec<LockEntry>, StoreError> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT name, version, digest, is_dev, is_dep FROM lock {filter} ORDER BY name, version"
        ))?;
        let entries = stmt
            .query_map([], LockEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
