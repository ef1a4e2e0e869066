//! P2PKH address derivation from ECDSA public keys
//!
//! Turns a 65-byte uncompressed public key into the 25-byte Base58Check
//! payload: version byte, HASH160 of the key, and a 4-byte double-SHA-256
//! checksum.

use crate::crypto::hash::{double_sha256, hash160};
use thiserror::Error;

/// Version byte prepended to P2PKH payloads (0x00 for mainnet)
pub const P2PKH_VERSION: u8 = 0x00;

/// Errors that can occur during address derivation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("empty public key")]
    EmptyKey,
    /// Compressed keys (leading 0x02/0x03) are not handled by this deriver
    #[error("unsupported public key format: leading byte {0:#04x}")]
    UnsupportedKey(u8),
}

/// Derive the 25-byte P2PKH payload from an uncompressed ECDSA public key.
///
/// The key must start with `0x04`. The payload is
/// `version || hash160(key) || checksum`, where the checksum is the first
/// 4 bytes of `double_sha256(version || hash160(key))`.
pub fn p2pkh_payload(pubkey: &[u8]) -> Result<[u8; 25], AddressError> {
    let first = *pubkey.first().ok_or(AddressError::EmptyKey)?;
    if first != 0x04 {
        return Err(AddressError::UnsupportedKey(first));
    }

    let mut payload = [0u8; 25];
    payload[0] = P2PKH_VERSION;
    payload[1..21].copy_from_slice(&hash160(pubkey));

    let checksum = double_sha256(&payload[..21]);
    payload[21..].copy_from_slice(&checksum[..4]);
    Ok(payload)
}

/// Derive the Base58Check address string of an uncompressed public key
pub fn p2pkh_address(pubkey: &[u8]) -> Result<String, AddressError> {
    let payload = p2pkh_payload(pubkey)?;
    Ok(bs58::encode(payload).into_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Public key from the genesis block's coinbase output
    const GENESIS_PUBKEY_HEX: &str = "04678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5f";

    #[test]
    fn test_genesis_pubkey_payload() {
        let pubkey = hex::decode(GENESIS_PUBKEY_HEX).unwrap();
        let payload = p2pkh_payload(&pubkey).unwrap();
        assert_eq!(
            hex::encode(payload),
            "0062e907b15cbf27d5425399ebf6f0fb50ebb88f18c29b7d93"
        );
        assert_eq!(
            hex::encode(&payload[1..21]),
            "62e907b15cbf27d5425399ebf6f0fb50ebb88f18"
        );
    }

    #[test]
    fn test_genesis_pubkey_address() {
        let pubkey = hex::decode(GENESIS_PUBKEY_HEX).unwrap();
        let address = p2pkh_address(&pubkey).unwrap();
        assert_eq!(address, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
        assert!(address.starts_with('1'));
    }

    #[test]
    fn test_compressed_key_unsupported() {
        let mut compressed = vec![0x02];
        compressed.extend_from_slice(&[0x11; 32]);
        assert_eq!(
            p2pkh_payload(&compressed),
            Err(AddressError::UnsupportedKey(0x02))
        );

        compressed[0] = 0x03;
        assert_eq!(
            p2pkh_payload(&compressed),
            Err(AddressError::UnsupportedKey(0x03))
        );
    }

    #[test]
    fn test_empty_key() {
        assert_eq!(p2pkh_payload(&[]), Err(AddressError::EmptyKey));
    }
}
