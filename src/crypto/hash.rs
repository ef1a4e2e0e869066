//! Cryptographic hashing utilities
//!
//! Provides the SHA-256 based hashing functions used for transaction IDs,
//! message checksums, and address derivation.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
/// Used for transaction IDs and message checksums
pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256(&sha256(data))
}

/// Computes double SHA-256 and returns it as a fixed 32-byte array
pub fn double_sha256_array(data: &[u8]) -> [u8; 32] {
    let digest = double_sha256(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Computes HASH160: RIPEMD-160 of SHA-256
/// Used for P2PKH address derivation
pub fn hash160(data: &[u8]) -> Vec<u8> {
    let mut ripemd = Ripemd160::new();
    ripemd.update(sha256(data));
    ripemd.finalize().to_vec()
}

/// Returns a reversed copy of the input; the original is untouched.
/// Converts between internal and display byte order for hashes.
pub fn reverse_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.reverse();
    out
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Computes double SHA-256 hash and returns it as a hex string
pub fn double_sha256_hex(data: &[u8]) -> String {
    hex::encode(double_sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let data = b"hello world";
        let hash = sha256(data);
        assert_eq!(hash.len(), 32);
        assert_eq!(
            sha256_hex(data),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_double_sha256() {
        let data = b"hello world";
        let hash = double_sha256(data);
        assert_eq!(hash.len(), 32);
        assert_eq!(double_sha256_array(data).to_vec(), hash);
        // First 4 bytes of dSHA256("") are the well-known empty checksum
        assert_eq!(&double_sha256(b"")[..4], &[0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn test_hash160() {
        let hash = hash160(b"hello world");
        assert_eq!(hash.len(), 20);
    }

    #[test]
    fn test_reverse_bytes() {
        let data = vec![0x01, 0x02, 0x03];
        let reversed = reverse_bytes(&data);
        assert_eq!(reversed, vec![0x03, 0x02, 0x01]);
        // Original untouched
        assert_eq!(data, vec![0x01, 0x02, 0x03]);
        assert_eq!(reverse_bytes(&reversed), data);
    }
}
