//! Metadata database
//!
//! SQLite persistence for users, sessions and storage entry metadata.
//! File contents live on disk under each user's storage root; this database
//! only records what the store has published.

pub mod entries;
pub mod sessions;
pub mod users;

use log::info;
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;

use crate::error::DatabaseError;

pub use sessions::SessionRecord;
pub use users::UserRecord;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    password_hash TEXT NOT NULL,
    quota_limit INTEGER NOT NULL DEFAULT 0,
    quota_used INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

CREATE TABLE IF NOT EXISTS entries (
    owner TEXT NOT NULL,
    path TEXT NOT NULL,
    parent TEXT NOT NULL,
    kind TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    modified INTEGER NOT NULL,
    version TEXT NOT NULL,
    PRIMARY KEY (owner, path)
);

CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries(owner, parent);
"#;

/// Shared handle to the metadata database
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create or open the database file
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        info!("Opened metadata database {}", path.display());
        Self::with_connection(conn)
    }

    /// Database that lives only as long as the handle
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

pub(crate) fn to_sql_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_file_database_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite");
        Database::open(&path).unwrap();
        assert!(path.exists());
        // Reopening an existing schema is a no-op
        Database::open(&path).unwrap();
    }

    #[test]
    fn sql_conversions_clamp() {
        assert_eq!(to_sql_u64(u64::MAX), i64::MAX);
        assert_eq!(from_sql_u64(-5), 0);
        assert_eq!(from_sql_u64(42), 42);
    }
}
