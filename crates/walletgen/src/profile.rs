//! Per-user record of generated wallets: chain, address and path only.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::chain::Chain;
use crate::db::wallet_repo::{self, WalletRow};
use crate::db::{Database, DatabaseError};
use crate::derive::WalletInfo;

/// Non-sensitive part of a generated wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub chain: Chain,
    pub address: String,
    pub derivation_path: String,
}

impl From<&WalletInfo> for ProfileEntry {
    fn from(wallet: &WalletInfo) -> Self {
        Self {
            chain: wallet.chain,
            address: wallet.address.clone(),
            derivation_path: wallet.derivation_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedWallet {
    pub chain: Chain,
    pub address: String,
    pub derivation_path: String,
    pub created_at: DateTime<Utc>,
}

/// What bulk jobs need from a profile store.
pub trait WalletProfiles: Send + Sync {
    /// Saves `entries` for `owner`, returning how many were new.
    fn add_many(&self, owner: i64, entries: &[ProfileEntry]) -> Result<usize, DatabaseError>;
}

/// Discards everything.
pub struct NoopProfiles;

impl WalletProfiles for NoopProfiles {
    fn add_many(&self, _owner: i64, _entries: &[ProfileEntry]) -> Result<usize, DatabaseError> {
        Ok(0)
    }
}

#[derive(Clone)]
pub struct ProfileStore {
    db: Database,
}

impl ProfileStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::from_database(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    /// Saves one entry. Returns `false` if the user already had it.
    pub fn add(&self, owner: i64, entry: &ProfileEntry) -> Result<bool, DatabaseError> {
        wallet_repo::insert(&self.db, &to_row(owner, entry, Utc::now().timestamp()))
    }

    pub fn add_many(&self, owner: i64, entries: &[ProfileEntry]) -> Result<usize, DatabaseError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().timestamp();
        let rows: Vec<WalletRow> = entries.iter().map(|e| to_row(owner, e, now)).collect();
        wallet_repo::insert_many(&self.db, &rows)
    }

    /// Saved wallets, newest first. Rows for chains this build does not
    /// know are skipped.
    pub fn list(&self, owner: i64, chain: Option<Chain>) -> Result<Vec<SavedWallet>, DatabaseError> {
        let rows = wallet_repo::list(&self.db, owner, chain.map(|c| c.symbol()))?;
        Ok(rows.into_iter().filter_map(from_row).collect())
    }

    pub fn count_by_chain(&self, owner: i64) -> Result<Vec<(Chain, u64)>, DatabaseError> {
        let counts = wallet_repo::count_by_chain(&self.db, owner)?;
        Ok(counts
            .into_iter()
            .filter_map(|(symbol, n)| symbol.parse::<Chain>().ok().map(|c| (c, n)))
            .collect())
    }

    /// Forgets every wallet of `owner`.
    pub fn clear(&self, owner: i64) -> Result<usize, DatabaseError> {
        let removed = wallet_repo::delete_for_user(&self.db, owner)?;
        log::info!("Cleared {} profile entries for user {}", removed, owner);
        Ok(removed)
    }
}

impl WalletProfiles for ProfileStore {
    fn add_many(&self, owner: i64, entries: &[ProfileEntry]) -> Result<usize, DatabaseError> {
        ProfileStore::add_many(self, owner, entries)
    }
}

fn to_row(owner: i64, entry: &ProfileEntry, created_at: i64) -> WalletRow {
    WalletRow {
        user_id: owner,
        chain: entry.chain.symbol().to_string(),
        address: entry.address.clone(),
        derivation_path: entry.derivation_path.clone(),
        created_at,
    }
}

fn from_row(row: WalletRow) -> Option<SavedWallet> {
    let chain = match row.chain.parse::<Chain>() {
        Ok(chain) => chain,
        Err(e) => {
            log::warn!("Skipping profile row: {}", e);
            return None;
        }
    };
    Some(SavedWallet {
        chain,
        address: row.address,
        derivation_path: row.derivation_path,
        created_at: DateTime::<Utc>::from_timestamp(row.created_at, 0).unwrap_or_default(),
    })
}
