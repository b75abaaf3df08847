//! Queries for the `wallets` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A stored wallet row. Never holds key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRow {
    pub user_id: i64,
    pub chain: String,
    pub address: String,
    pub derivation_path: String,
    /// Unix seconds.
    pub created_at: i64,
}

impl WalletRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            chain: row.get("chain")?,
            address: row.get("address")?,
            derivation_path: row.get("derivation_path")?,
            created_at: row.get("created_at")?,
        })
    }
}

const INSERT_SQL: &str = "INSERT OR IGNORE INTO wallets
    (user_id, chain, address, derivation_path, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5)";

/// Inserts one row. Returns `false` when it was already present.
pub fn insert(db: &Database, row: &WalletRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            INSERT_SQL,
            params![
                row.user_id,
                row.chain,
                row.address,
                row.derivation_path,
                row.created_at
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Inserts rows in one transaction. Returns how many were new.
pub fn insert_many(db: &Database, rows: &[WalletRow]) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(INSERT_SQL)?;
            for row in rows {
                inserted += stmt.execute(params![
                    row.user_id,
                    row.chain,
                    row.address,
                    row.derivation_path,
                    row.created_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    })
}

/// Rows for a user, newest first, optionally limited to one chain.
pub fn list(
    db: &Database,
    user_id: i64,
    chain: Option<&str>,
) -> Result<Vec<WalletRow>, DatabaseError> {
    db.with_conn(|conn| {
        let rows = match chain {
            Some(chain) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM wallets WHERE user_id = ?1 AND chain = ?2
                     ORDER BY created_at DESC, rowid DESC",
                )?;
                let rows = stmt
                    .query_map(params![user_id, chain], WalletRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM wallets WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC",
                )?;
                let rows = stmt
                    .query_map(params![user_id], WalletRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}

/// `(chain, count)` pairs for a user, by chain name.
pub fn count_by_chain(db: &Database, user_id: i64) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT chain, COUNT(*) FROM wallets WHERE user_id = ?1
             GROUP BY chain ORDER BY chain",
        )?;
        let rows = stmt
            .query_map(params![user_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes every row of a user. Returns the number removed.
pub fn delete_for_user(db: &Database, user_id: i64) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| Ok(conn.execute("DELETE FROM wallets WHERE user_id = ?1", params![user_id])?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user_id: i64, chain: &str, address: &str, created_at: i64) -> WalletRow {
        WalletRow {
            user_id,
            chain: chain.to_string(),
            address: address.to_string(),
            derivation_path: "m/0".to_string(),
            created_at,
        }
    }

    #[test]
    fn test_insert_ignores_duplicates() {
        let db = Database::open_in_memory().unwrap();
        assert!(insert(&db, &row(1, "ETH", "0x1", 10)).unwrap());
        assert!(!insert(&db, &row(1, "ETH", "0x1", 11)).unwrap());
        assert!(insert(&db, &row(2, "ETH", "0x1", 11)).unwrap());
    }

    #[test]
    fn test_insert_many_counts_new_rows() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &row(1, "BTC", "bc1a", 1)).unwrap();
        let batch = vec![row(1, "BTC", "bc1a", 2), row(1, "BTC", "bc1b", 2), row(1, "SOL", "So1", 3)];
        assert_eq!(insert_many(&db, &batch).unwrap(), 2);
        assert_eq!(list(&db, 1, None).unwrap().len(), 3);
    }

    #[test]
    fn test_list_newest_first_and_filtered() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &row(1, "ETH", "0xold", 1)).unwrap();
        insert(&db, &row(1, "ETH", "0xnew", 5)).unwrap();
        insert(&db, &row(1, "TON", "UQx", 3)).unwrap();

        let all: Vec<String> = list(&db, 1, None).unwrap().into_iter().map(|r| r.address).collect();
        assert_eq!(all, vec!["0xnew", "UQx", "0xold"]);

        let eth = list(&db, 1, Some("ETH")).unwrap();
        assert_eq!(eth.len(), 2);
        assert!(list(&db, 2, None).unwrap().is_empty());
    }

    #[test]
    fn test_count_and_delete() {
        let db = Database::open_in_memory().unwrap();
        insert_many(
            &db,
            &[row(1, "ETH", "a", 1), row(1, "ETH", "b", 1), row(1, "XRP", "r", 1), row(2, "ETH", "c", 1)],
        )
        .unwrap();

        assert_eq!(
            count_by_chain(&db, 1).unwrap(),
            vec![("ETH".to_string(), 2), ("XRP".to_string(), 1)]
        );
        assert_eq!(delete_for_user(&db, 1).unwrap(), 3);
        assert!(count_by_chain(&db, 1).unwrap().is_empty());
        assert_eq!(count_by_chain(&db, 2).unwrap().len(), 1);
    }
}
