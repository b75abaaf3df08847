//! Single-wallet generation for interactive use.

use std::collections::HashSet;
use std::sync::Arc;

use secrecy::SecretString;

use crate::chain::Chain;
use crate::derive::Deriver;
use crate::error::{Result, WalletGenError};
use crate::limits::RateLimiter;
use crate::profile::{ProfileEntry, WalletProfiles};
use crate::seeds::SeedCache;

/// A generated wallet as shown to its owner. The mnemonic is revealed
/// separately, once, through [`WalletService::reveal_seed`].
pub type GeneratedWallet = ProfileEntry;

pub struct WalletService {
    deriver: Arc<dyn Deriver>,
    profiles: Arc<dyn WalletProfiles>,
    seeds: SeedCache,
    limiter: RateLimiter,
    admins: HashSet<i64>,
}

impl WalletService {
    pub fn new(
        deriver: Arc<dyn Deriver>,
        profiles: Arc<dyn WalletProfiles>,
        seeds: SeedCache,
        limiter: RateLimiter,
        admins: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            deriver,
            profiles,
            seeds,
            limiter,
            admins: admins.into_iter().collect(),
        }
    }

    pub fn generate(&self, user: i64, chain: Chain) -> Result<GeneratedWallet> {
        if !self.admins.contains(&user) {
            self.limiter.check(user).map_err(|retry| WalletGenError::RateLimited {
                retry_after_secs: retry.as_secs() + u64::from(retry.subsec_nanos() > 0),
            })?;
        }

        let wallet = self.deriver.derive(chain)?;
        let entry = ProfileEntry::from(&wallet);

        if let Err(e) = self.profiles.add_many(user, std::slice::from_ref(&entry)) {
            log::warn!("Failed to save {} wallet to profile of user {}: {}", chain, user, e);
        }
        self.seeds.put(user, SecretString::from(wallet.mnemonic));

        log::info!(
            "Generated {} wallet {} for user {}",
            chain,
            short_address(&entry.address),
            user
        );
        Ok(entry)
    }

    /// Returns the user's last mnemonic once; later calls get `None`.
    pub fn reveal_seed(&self, user: i64) -> Option<Arc<SecretString>> {
        self.seeds.take(user)
    }
}

/// First six and last four characters, for logs.
pub(crate) fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 12 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
