//! Schema migrations for the profile database.
//!
//! Applied versions are recorded in `_migrations`; each step runs at most
//! once, in order, inside its own transaction.

use rusqlite::Connection;

use super::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_wallets_table",
        sql: "CREATE TABLE IF NOT EXISTS wallets (
                user_id INTEGER NOT NULL,
                chain TEXT NOT NULL,
                address TEXT NOT NULL,
                derivation_path TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, chain, address)
            );",
    },
    Migration {
        version: 2,
        description: "index_wallets_by_user_created",
        sql: "CREATE INDEX IF NOT EXISTS idx_wallets_user_created
                ON wallets (user_id, created_at DESC);",
    },
];

/// Applies every migration newer than the recorded version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        log::info!(
            "Applying profile migration v{}: {}",
            migration.version,
            migration.description
        );
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(conn: &Connection) -> u32 {
        conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_fresh_db_gets_every_migration() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        assert_eq!(applied(&conn), MIGRATIONS.len() as u32);

        let tables: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'wallets'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn test_rerun_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(applied(&conn), MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_versions_are_ascending() {
        let versions: Vec<u32> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }
}
