//! Wallet derivation: mnemonic, path and address for one chain.
//!
//! [`Deriver`] is the seam the job worker and the single-wallet service call
//! through. [`Bip39Deriver`] is the production implementation; tests swap in
//! deterministic fakes.

mod encoding;
mod slip10;

use std::fmt;

use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroizing;

use crate::chain::Chain;
use crate::error::DeriveError;

/// A freshly generated wallet.
#[derive(Clone)]
pub struct WalletInfo {
    pub chain: Chain,
    pub derivation_path: String,
    pub address: String,
    pub mnemonic: String,
}

impl fmt::Debug for WalletInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletInfo")
            .field("chain", &self.chain)
            .field("derivation_path", &self.derivation_path)
            .field("address", &self.address)
            .field("mnemonic", &"<redacted>")
            .finish()
    }
}

/// Produces one new wallet per call.
pub trait Deriver: Send + Sync {
    fn derive(&self, chain: Chain) -> Result<WalletInfo, DeriveError>;
}

/// 12-word BIP-39 mnemonics with BIP-32 / SLIP-10 address derivation.
pub struct Bip39Deriver {
    secp: Secp256k1<All>,
}

impl Bip39Deriver {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    /// Builds the wallet for a given 16-byte entropy instead of drawing it.
    pub fn derive_from_entropy(
        &self,
        chain: Chain,
        entropy: &[u8],
    ) -> Result<WalletInfo, DeriveError> {
        let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy)
            .map_err(|e| DeriveError::Mnemonic(e.to_string()))?;
        let seed = Zeroizing::new(mnemonic.to_seed(""));
        let address = self.address(chain, &seed[..])?;

        Ok(WalletInfo {
            chain,
            derivation_path: chain.derivation_path().to_string(),
            address,
            mnemonic: mnemonic.to_string(),
        })
    }

    fn address(&self, chain: Chain, seed: &[u8]) -> Result<String, DeriveError> {
        let path = chain.derivation_path();

        if chain.is_ed25519() {
            let secret = slip10::derive_ed25519(seed, path)?;
            let public = SigningKey::from_bytes(&secret).verifying_key().to_bytes();
            return match chain {
                Chain::Sol => Ok(bs58::encode(public).into_string()),
                Chain::Ton => Ok(encoding::ton_address(&public)),
                other => Err(DeriveError::UnsupportedChain(other)),
            };
        }

        let public = self.secp256k1_public_key(seed, path)?;
        let address = match chain {
            c if c.is_evm() => {
                encoding::eip55(&encoding::evm_account(&public.serialize_uncompressed()))
            }
            Chain::Btc => encoding::segwit_v0("bc", &encoding::hash160(&public.serialize()))?,
            Chain::Ltc => encoding::segwit_v0("ltc", &encoding::hash160(&public.serialize()))?,
            Chain::Doge => encoding::base58check(
                0x1e,
                &encoding::hash160(&public.serialize()),
                bs58::Alphabet::BITCOIN,
            ),
            Chain::Tron => encoding::base58check(
                0x41,
                &encoding::evm_account(&public.serialize_uncompressed()),
                bs58::Alphabet::BITCOIN,
            ),
            Chain::Xrp => encoding::base58check(
                0x00,
                &encoding::hash160(&public.serialize()),
                bs58::Alphabet::RIPPLE,
            ),
            other => return Err(DeriveError::UnsupportedChain(other)),
        };
        Ok(address)
    }

    fn secp256k1_public_key(&self, seed: &[u8], path: &str) -> Result<PublicKey, DeriveError> {
        let path: DerivationPath = path
            .parse()
            .map_err(|e: bip32::Error| DeriveError::KeyDerivation(e.to_string()))?;
        let child = XPrv::derive_from_path(seed, &path)
            .map_err(|e| DeriveError::KeyDerivation(e.to_string()))?;
        let secret = SecretKey::from_slice(&child.private_key().to_bytes())
            .map_err(|e| DeriveError::KeyDerivation(e.to_string()))?;
        Ok(PublicKey::from_secret_key(&self.secp, &secret))
    }
}

impl Default for Bip39Deriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Deriver for Bip39Deriver {
    fn derive(&self, chain: Chain) -> Result<WalletInfo, DeriveError> {
        let mut entropy = Zeroizing::new([0u8; 16]);
        OsRng.fill_bytes(&mut entropy[..]);
        self.derive_from_entropy(chain, &entropy[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_ENTROPY: [u8; 16] = [0u8; 16];
    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon \
                           abandon abandon abandon abandon abandon about";

    #[test]
    fn test_eth_reference_address() {
        let wallet = Bip39Deriver::new()
            .derive_from_entropy(Chain::Eth, &ZERO_ENTROPY)
            .unwrap();
        assert_eq!(wallet.mnemonic, ABANDON);
        assert_eq!(wallet.derivation_path, "m/44'/60'/0'/0/0");
        assert_eq!(wallet.address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
    }

    #[test]
    fn test_btc_reference_address() {
        let wallet = Bip39Deriver::new()
            .derive_from_entropy(Chain::Btc, &ZERO_ENTROPY)
            .unwrap();
        assert_eq!(wallet.address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
    }

    #[test]
    fn test_evm_chains_share_address() {
        let deriver = Bip39Deriver::new();
        let eth = deriver.derive_from_entropy(Chain::Eth, &ZERO_ENTROPY).unwrap();
        for chain in [Chain::Base, Chain::Bsc, Chain::Polygon, Chain::Avaxc] {
            let other = deriver.derive_from_entropy(chain, &ZERO_ENTROPY).unwrap();
            assert_eq!(other.address, eth.address);
            assert_eq!(other.chain, chain);
        }
    }

    #[test]
    fn test_address_prefixes() {
        let deriver = Bip39Deriver::new();
        let cases = [
            (Chain::Ltc, "ltc1q"),
            (Chain::Doge, "D"),
            (Chain::Tron, "T"),
            (Chain::Xrp, "r"),
            (Chain::Ton, "UQ"),
        ];
        for (chain, prefix) in cases {
            let wallet = deriver.derive_from_entropy(chain, &ZERO_ENTROPY).unwrap();
            assert!(
                wallet.address.starts_with(prefix),
                "{chain} address {} should start with {prefix}",
                wallet.address
            );
        }
    }

    #[test]
    fn test_sol_address_is_base58_pubkey() {
        let wallet = Bip39Deriver::new()
            .derive_from_entropy(Chain::Sol, &ZERO_ENTROPY)
            .unwrap();
        let raw = bs58::decode(&wallet.address).into_vec().unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn test_random_wallets_differ() {
        let deriver = Bip39Deriver::new();
        let a = deriver.derive(Chain::Eth).unwrap();
        let b = deriver.derive(Chain::Eth).unwrap();
        assert_ne!(a.mnemonic, b.mnemonic);
        assert_ne!(a.address, b.address);
        assert_eq!(a.mnemonic.split_whitespace().count(), 12);
    }

    #[test]
    fn test_bad_entropy_is_mnemonic_error() {
        let err = Bip39Deriver::new()
            .derive_from_entropy(Chain::Eth, &[0u8; 3])
            .unwrap_err();
        assert!(matches!(err, DeriveError::Mnemonic(_)));
    }

    #[test]
    fn test_debug_redacts_mnemonic() {
        let wallet = Bip39Deriver::new()
            .derive_from_entropy(Chain::Eth, &ZERO_ENTROPY)
            .unwrap();
        let rendered = format!("{wallet:?}");
        assert!(!rendered.contains("abandon"));
        assert!(rendered.contains("<redacted>"));
    }
}
