//! Address encodings shared by the chain-specific derivations.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bech32::{ToBase32, Variant};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};

use crate::error::DeriveError;

/// Code hash of the v4r2 wallet contract.
const TON_WALLET_V4R2_CODE_HASH: [u8; 32] = [
    0xfe, 0xb5, 0xff, 0x68, 0x20, 0xe2, 0xff, 0x0d, 0x94, 0x83, 0xe7, 0xe0, 0xd6, 0x2c, 0x81, 0x7d,
    0x84, 0x67, 0x89, 0xfb, 0x4a, 0xe5, 0x80, 0xc8, 0x78, 0x86, 0x6d, 0x95, 0x9d, 0xab, 0xd5, 0xc0,
];
const TON_WALLET_ID: u32 = 698_983_191;
const TON_NON_BOUNCEABLE: u8 = 0x51;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// RIPEMD160(SHA256(data)).
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// Base58Check with a single version byte.
pub fn base58check(version: u8, payload: &[u8], alphabet: &'static bs58::Alphabet) -> String {
    let mut data = Vec::with_capacity(1 + payload.len() + 4);
    data.push(version);
    data.extend_from_slice(payload);
    let checksum = double_sha256(&data);
    data.extend_from_slice(&checksum[..4]);
    bs58::encode(data).with_alphabet(alphabet).into_string()
}

/// Native SegWit v0 address for a 20-byte key hash.
pub fn segwit_v0(hrp: &str, program: &[u8]) -> Result<String, DeriveError> {
    let version = bech32::u5::try_from_u8(0)
        .map_err(|e| DeriveError::Encoding(format!("bech32 witness version: {e}")))?;
    let mut data = Vec::with_capacity(1 + 32);
    data.push(version);
    data.extend(program.to_base32());
    bech32::encode(hrp, data, Variant::Bech32)
        .map_err(|e| DeriveError::Encoding(format!("bech32 encode failed: {e}")))
}

/// EIP-55 mixed-case checksum of a 20-byte address, `0x` prefixed.
pub fn eip55(address: &[u8]) -> String {
    let lower = hex::encode(address);
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(2 + lower.len());
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Last 20 bytes of keccak256 over an uncompressed key without its 0x04 tag.
pub fn evm_account(uncompressed: &[u8; 65]) -> [u8; 20] {
    let hash = keccak256(&uncompressed[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

/// CRC16/XMODEM as used by user-friendly TON addresses.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Non-bounceable workchain-0 address of a v4r2 wallet owned by `public_key`.
///
/// The account id is hashed from the contract code hash, wallet id and key
/// rather than from a serialised state-init cell.
pub fn ton_address(public_key: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(TON_WALLET_V4R2_CODE_HASH);
    hasher.update(TON_WALLET_ID.to_be_bytes());
    hasher.update(public_key);
    let account: [u8; 32] = hasher.finalize().into();

    let mut data = Vec::with_capacity(36);
    data.push(TON_NON_BOUNCEABLE);
    data.push(0x00);
    data.extend_from_slice(&account);
    let crc = crc16_xmodem(&data);
    data.extend_from_slice(&crc.to_be_bytes());
    URL_SAFE_NO_PAD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16_xmodem(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_eip55_reference_vector() {
        let raw = hex::decode("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(eip55(&raw), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn test_segwit_reference_vector() {
        let program = hex::decode("751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        assert_eq!(
            segwit_v0("bc", &program).unwrap(),
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        );
    }

    #[test]
    fn test_base58check_zero_hash() {
        let addr = base58check(0x00, &[0u8; 20], bs58::Alphabet::BITCOIN);
        assert_eq!(addr, "1111111111111111111114oLvT2");
    }

    #[test]
    fn test_version_prefixes() {
        let payload = [0x42u8; 20];
        assert!(base58check(0x1e, &payload, bs58::Alphabet::BITCOIN).starts_with('D'));
        assert!(base58check(0x41, &payload, bs58::Alphabet::BITCOIN).starts_with('T'));
        assert!(base58check(0x00, &payload, bs58::Alphabet::RIPPLE).starts_with('r'));
    }

    #[test]
    fn test_ton_address_shape() {
        let addr = ton_address(&[7u8; 32]);
        assert_eq!(addr.len(), 48);
        assert!(addr.starts_with("UQ"));
        assert!(!addr.contains('+') && !addr.contains('/'));
    }
}
