//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 / double SHA-256 / HASH160 hashing
//! - Byte-order reversal for hash display
//! - P2PKH address derivation (Base58Check)

pub mod address;
pub mod hash;

pub use address::{p2pkh_address, p2pkh_payload, AddressError, P2PKH_VERSION};
pub use hash::{
    double_sha256, double_sha256_array, double_sha256_hex, hash160, reverse_bytes, sha256,
    sha256_hex,
};
