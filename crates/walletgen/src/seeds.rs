//! One-time reveal cache for freshly generated mnemonics.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use secrecy::SecretString;

pub const DEFAULT_SEED_TTL: Duration = Duration::from_secs(180);

/// Holds each user's latest mnemonic until it is taken or expires.
///
/// Only the newest mnemonic per user is kept; a second `put` replaces it.
#[derive(Clone)]
pub struct SeedCache {
    inner: Cache<i64, Arc<SecretString>>,
}

impl SeedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().time_to_live(ttl).max_capacity(100_000).build(),
        }
    }

    pub fn put(&self, user: i64, mnemonic: SecretString) {
        self.inner.insert(user, Arc::new(mnemonic));
    }

    /// Removes and returns the user's mnemonic. A second call returns `None`.
    pub fn take(&self, user: i64) -> Option<Arc<SecretString>> {
        self.inner.remove(&user)
    }

    /// Live entries. Runs pending maintenance first so expired ones are gone.
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SeedCache {
    fn default() -> Self {
        Self::new(DEFAULT_SEED_TTL)
    }
}
