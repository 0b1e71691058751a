//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees
//! that migrations are run before any other operation.
//!
//! Concurrent native-level writes to an embedded SQLite file are unsafe on
//! at least one target platform, so a `Database` is never shared: it is
//! moved into the [`crate::StoreHandle`] worker task and all access goes
//! through that task's FIFO queue.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::StoreError;
use crate::migrations;
use crate::Result;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data
    /// directory:
    /// - Linux:   `~/.local/share/pigeon/pigeon.db`
    /// - macOS:   `~/Library/Application Support/com.pigeon.pigeon/pigeon.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\pigeon\pigeon\data\pigeon.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "pigeon", "pigeon").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("pigeon.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for transactions or ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
    }

    #[test]
    fn reopen_preserves_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        drop(Database::open_at(&path).unwrap());
        // Second open must not re-run migrations or fail on existing tables.
        Database::open_at(&path).expect("reopen should succeed");
    }
}
