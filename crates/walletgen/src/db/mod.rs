//! SQLite storage for per-user wallet metadata.
//!
//! A single rusqlite connection sits behind a cloneable [`Database`] handle;
//! every access goes through [`Database::with_conn`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

pub mod migrations;
pub mod wallet_repo;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Shared handle to the profile database. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the database file, enables WAL and migrates it.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::run_all(&conn)?;

        log::info!("Profile database opened at {}", path.display());
        Ok(Self::wrap(conn))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// `profiles.db` under the platform data directory, when there is one.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("walletgen").join("profiles.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("profiles.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_clones_share_connection() {
        let db = Database::open_in_memory().unwrap();
        let other = db.clone();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO wallets (user_id, chain, address, derivation_path, created_at)
                 VALUES (1, 'ETH', '0xabc', 'm/44''/60''/0''/0/0', 0)",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let count: u32 = other
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM wallets", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_default_path_name() {
        if let Some(path) = default_database_path() {
            assert!(path.ends_with("walletgen/profiles.db"));
        }
    }
}
