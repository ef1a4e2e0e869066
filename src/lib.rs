//! Chainwatch: a Bitcoin peer-to-peer node skeleton in Rust
//!
//! This crate provides two independent subsystems:
//! - A consensus transaction codec: decode legacy and SegWit transactions
//!   from any cursored byte source, re-encode them, and compute txids
//! - A peer supervisor: maintain a bounded set of outbound Bitcoin peers
//!   with handshakes, message dispatch, and liveness-based banning
//!
//! # Example
//!
//! ```rust
//! use chainwatch::codec::{SliceReader, Transaction};
//!
//! // Decode a transaction and print its txid in display order
//! let raw = hex::decode(
//!     "01000000010102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f2\
//!      0000000001976a914000000000000000000000000000000000000000088acffffffff0200\
//!      f2052a010000001976a914aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa88ac00f9029\
//!      5000000001976a914bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb88ac00000000",
//! )
//! .unwrap();
//! let mut reader = SliceReader::new(&raw);
//! let tx = Transaction::decode(&mut reader).unwrap();
//! println!("txid: {}", tx.txid_hex());
//! ```

pub mod codec;
pub mod crypto;
pub mod network;

// Re-export commonly used types
pub use codec::{ByteSource, CodecError, SliceReader, Transaction, TxInput, TxOutput};
pub use crypto::{double_sha256, hash160, p2pkh_address, reverse_bytes};
pub use network::{Message, Network, NetworkConfig, PeerHandle};
