//! Bitcoin consensus transaction codec
//!
//! This module provides:
//! - A cursored byte-reader capability ([`ByteSource`]) the decoder consumes
//! - CompactSize varint encoding
//! - Transaction decoding (legacy and SegWit-extended serialization)
//! - Non-witness re-encoding and txid computation

pub mod cursor;
pub mod transaction;
pub mod varint;

pub use cursor::{ByteSource, CursorError, SliceReader};
pub use transaction::{
    CodecError, Transaction, TxInput, TxOutput, COINBASE_PREV_INDEX, SEQUENCE_FINAL,
};
pub use varint::encode_varint;
