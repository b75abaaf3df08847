//! SLIP-10 key derivation for ed25519 (hardened steps only).

use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::error::DeriveError;

type HmacSha512 = Hmac<Sha512>;

const HARDENED: u32 = 0x8000_0000;

/// Derives the 32-byte ed25519 secret at `path` from a BIP-39 seed.
pub fn derive_ed25519(seed: &[u8], path: &str) -> Result<Zeroizing<[u8; 32]>, DeriveError> {
    let mut parts = path.split('/');
    if parts.next() != Some("m") {
        return Err(DeriveError::KeyDerivation(format!(
            "path '{path}' must start with 'm'"
        )));
    }

    let (mut key, mut chain_code) = split(hmac(b"ed25519 seed", &[seed])?);

    for part in parts {
        let trimmed = part.trim_end_matches('\'').trim_end_matches('h');
        if trimmed.len() == part.len() {
            return Err(DeriveError::KeyDerivation(format!(
                "ed25519 only supports hardened steps, got '{part}'"
            )));
        }
        let index: u32 = trimmed
            .parse()
            .map_err(|_| DeriveError::KeyDerivation(format!("invalid path index '{part}'")))?;
        if index >= HARDENED {
            return Err(DeriveError::KeyDerivation(format!(
                "path index '{part}' out of range"
            )));
        }

        let hardened = (index | HARDENED).to_be_bytes();
        let (child_key, child_chain) =
            split(hmac(&chain_code[..], &[&[0u8][..], &key[..], &hardened[..]])?);
        key = child_key;
        chain_code = child_chain;
    }

    Ok(key)
}

fn hmac(key: &[u8], parts: &[&[u8]]) -> Result<Zeroizing<[u8; 64]>, DeriveError> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| DeriveError::KeyDerivation(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = Zeroizing::new([0u8; 64]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn split(bytes: Zeroizing<[u8; 64]>) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
    let mut left = Zeroizing::new([0u8; 32]);
    let mut right = Zeroizing::new([0u8; 32]);
    left.copy_from_slice(&bytes[..32]);
    right.copy_from_slice(&bytes[32..]);
    (left, right)
}
