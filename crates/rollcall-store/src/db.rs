//! SQLite connection setup and schema.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS students (
    id TEXT PRIMARY KEY,
    roll TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    image_path TEXT NOT NULL,
    embedding BLOB NOT NULL,
    model_version TEXT,
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    roll TEXT NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'present',
    day TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    recorded_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attendance_roll_day ON attendance(roll, day);
CREATE INDEX IF NOT EXISTS idx_attendance_recorded ON attendance(recorded_ms);
";

/// Shared handle to the rollcall database (students + attendance tables).
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let db = Self {
            conn: Connection::open(path)?,
        };
        db.apply_pragmas()?;
        db.conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.conn.execute_batch(SCHEMA_SQL)?;
        Ok(db)
    }

    fn apply_pragmas(&self) -> Result<(), StoreError> {
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::trace!(journal_mode = %mode, "journal mode set");

        // A committed attendance row must survive power loss.
        self.conn.pragma_update(None, "synchronous", "FULL")?;
        self.conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Write transaction that takes the database write lock up front, so a
    /// check-then-insert cannot interleave with another writer.
    pub(crate) fn write_txn(&self) -> Result<Transaction<'_>, rusqlite::Error> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
    }
}

/// True for UNIQUE / PRIMARY KEY violations.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
