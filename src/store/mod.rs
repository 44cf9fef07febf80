//! SQLite storage
//!
//! Every unit of work opens its own [`Connection`], so concurrent requests
//! never share one. The database runs in WAL mode: readers do not block the
//! single writer, and a transaction whose snapshot went stale before it
//! could write fails with `SQLITE_BUSY`, which surfaces as
//! [`RegistryError::Conflict`](crate::RegistryError::Conflict).

mod migrations;
mod registry;

pub use registry::VersionedRegistry;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Handle on a registry database file
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Store {
    /// Open (creating if needed) the database at `path` and apply migrations
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let store = Self { path, busy_timeout };
        let mut conn = store.connect()?;
        migrations::run(&mut conn)?;

        tracing::debug!(path = %store.path.display(), "registry database ready");
        Ok(store)
    }

    /// Open the database described by the configuration
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::open(config.resolved_path(), Duration::from_millis(config.busy_timeout_ms))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new connection with foreign keys enforced
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.db");

        let store = Store::open(&path, Duration::from_millis(100)).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_connections_enforce_foreign_keys() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("registry.db"), Duration::from_millis(100)).unwrap();
        let conn = store.connect().unwrap();

        let enabled: bool = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert!(enabled);

        let orphan = conn.execute(
            "INSERT INTO package_versions (package_id, version, created_at, updated_at)
             VALUES (999, 1, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(orphan.is_err());
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.db");
        Store::open(&path, Duration::from_millis(100)).unwrap();
        let store = Store::open(&path, Duration::from_millis(100)).unwrap();

        let conn = store.connect().unwrap();
        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
