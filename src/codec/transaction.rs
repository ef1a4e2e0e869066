//! Transaction decoding, re-encoding, and txid computation
//!
//! Implements the Bitcoin consensus transaction serialization:
//!
//! ```text
//! Basic format:
//!   int32   version
//!   vector  inputs
//!   vector  outputs
//!   uint32  locktime
//!
//! Extended (SegWit) format:
//!   int32   version
//!   u8      marker = 0x00
//!   u8      flag (!= 0, usually 0x01)
//!   vector  inputs
//!   vector  outputs
//!   if flag & 1: witness stack per input
//!   uint32  locktime
//! ```
//!
//! The txid is the double SHA-256 of the non-witness encoding; witness data
//! never enters the txid preimage.

use crate::codec::cursor::{ByteSource, CursorError};
use crate::codec::varint::encode_varint;
use crate::crypto::{double_sha256_array, reverse_bytes};
use std::sync::OnceLock;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Sequence number that marks an input as final
pub const SEQUENCE_FINAL: u32 = 0xFFFFFFFF;

/// Previous-output index used by the coinbase input
pub const COINBASE_PREV_INDEX: u32 = 0xFFFFFFFF;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The byte source ran out of data mid-transaction
    #[error("truncated transaction: {0}")]
    UnexpectedEof(#[from] CursorError),
    /// SegWit marker present but the flag byte is zero
    #[error("segwit marker present but flag byte is zero")]
    MalformedSegwit,
    /// Coinbase-shape invariant violated: `prev_index == 0xFFFFFFFF` must
    /// pair with an all-zero `prev_hash`, and vice versa
    #[error("invalid coinbase shape: prev_index {prev_index:#010x}, prev_hash {prev_hash}")]
    InvalidCoinbase { prev_index: u32, prev_hash: String },
}

// =============================================================================
// Transaction Input
// =============================================================================

/// Transaction input (reference to a previous output)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Hash of the previous transaction (internal byte order)
    pub prev_hash: [u8; 32],
    /// Index of the output in the previous transaction
    pub prev_index: u32,
    /// Unlocking script
    pub script: Vec<u8>,
    /// Sequence number
    pub sequence: u32,
    /// Witness stack (empty for non-witness inputs)
    pub witness: Vec<Vec<u8>>,
}

impl TxInput {
    /// Check if this is the synthetic coinbase input
    pub fn is_coinbase(&self) -> bool {
        self.prev_index == COINBASE_PREV_INDEX
    }

    /// Append the non-witness encoding of this input
    fn encode_into(&self, bin: &mut Vec<u8>) {
        bin.extend_from_slice(&self.prev_hash);
        bin.extend_from_slice(&self.prev_index.to_le_bytes());
        bin.extend_from_slice(&encode_varint(self.script.len() as u64));
        bin.extend_from_slice(&self.script);
        bin.extend_from_slice(&self.sequence.to_le_bytes());
    }
}

// =============================================================================
// Transaction Output
// =============================================================================

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Position within the enclosing transaction (0-based)
    pub index: u32,
    /// Amount in satoshis (kept signed to match the serialization source)
    pub value: i64,
    /// Locking script
    pub script: Vec<u8>,
}

impl TxOutput {
    /// Append the encoding of this output
    fn encode_into(&self, bin: &mut Vec<u8>) {
        bin.extend_from_slice(&self.value.to_le_bytes());
        bin.extend_from_slice(&encode_varint(self.script.len() as u64));
        bin.extend_from_slice(&self.script);
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A decoded Bitcoin transaction.
///
/// Treated as immutable after construction: the txid is computed on first
/// request and cached, so mutating inputs or outputs afterwards would break
/// hash correctness.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction version
    pub version: i32,
    /// Transaction inputs
    pub inputs: Vec<TxInput>,
    /// Transaction outputs
    pub outputs: Vec<TxOutput>,
    /// Locktime: block height or timestamp when the tx becomes valid
    pub locktime: u32,
    /// Whether the extended serialization carried witness data
    pub witness_present: bool,
    /// Memoized txid (internal byte order)
    txid: OnceLock<[u8; 32]>,
}

impl Clone for Transaction {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            locktime: self.locktime,
            witness_present: self.witness_present,
            txid: self.txid.clone(),
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        // The txid cache is derived state and never participates in equality
        self.version == other.version
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.locktime == other.locktime
            && self.witness_present == other.witness_present
    }
}

impl Eq for Transaction {}

impl Transaction {
    /// Create a transaction from parts
    pub fn new(version: i32, inputs: Vec<TxInput>, outputs: Vec<TxOutput>, locktime: u32) -> Self {
        let witness_present = inputs.iter().any(|i| !i.witness.is_empty());
        Self {
            version,
            inputs,
            outputs,
            locktime,
            witness_present,
            txid: OnceLock::new(),
        }
    }

    /// Decode a transaction from a byte source.
    ///
    /// The cursor must be positioned at the start of the transaction; it is
    /// left on the byte after `locktime`.
    pub fn decode<R: ByteSource>(src: &mut R) -> Result<Self, CodecError> {
        let version = src.read_i32()?;

        // Look for the extended-format marker without consuming it
        let mut flag: u8 = 0;
        let extended = src.peek(1)?[0] == 0x00;
        if extended {
            src.read_byte()?; // marker (0x00)
            flag = src.read_byte()?;
            if flag == 0 {
                return Err(CodecError::MalformedSegwit);
            }
            if flag & !0x01 != 0 {
                log::debug!("unknown witness flag bits set: {:#04x}", flag);
            }
        }

        let input_count = src.read_varint()?;
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            let prev_hash = src.read_array::<32>()?;
            let prev_index = src.read_u32()?;
            let zero_hash = prev_hash == [0u8; 32];
            if (prev_index == COINBASE_PREV_INDEX) != zero_hash {
                return Err(CodecError::InvalidCoinbase {
                    prev_index,
                    prev_hash: hex::encode(prev_hash),
                });
            }
            let script_len = src.read_varint()?;
            let script = src.read_bytes(script_len as usize)?;
            let sequence = src.read_u32()?;
            if prev_index == COINBASE_PREV_INDEX && sequence != SEQUENCE_FINAL {
                log::warn!("coinbase input sequence != 0xFFFFFFFF: {:#010x}", sequence);
            }
            inputs.push(TxInput {
                prev_hash,
                prev_index,
                script,
                sequence,
                witness: Vec::new(),
            });
        }

        let output_count = src.read_varint()?;
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for i in 0..output_count {
            let value = src.read_u64()? as i64;
            let script_len = src.read_varint()?;
            let script = src.read_bytes(script_len as usize)?;
            outputs.push(TxOutput {
                index: i as u32,
                value,
                script,
            });
        }

        let witness_present = extended && (flag & 1) == 1;
        if witness_present {
            for input in &mut inputs {
                let stack_size = src.read_varint()?;
                let mut witness = Vec::with_capacity(stack_size.min(1024) as usize);
                for _ in 0..stack_size {
                    let item_len = src.read_varint()?;
                    witness.push(src.read_bytes(item_len as usize)?);
                }
                input.witness = witness;
            }
        }

        let locktime = src.read_u32()?;
        if locktime != 0 {
            log::debug!("locktime is not 0: {}", locktime);
        }

        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
            witness_present,
            txid: OnceLock::new(),
        })
    }

    /// Check if any input carries witness data
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// Encode in the non-witness (txid preimage) form
    pub fn encode_non_witness(&self) -> Vec<u8> {
        let mut bin = Vec::new();
        bin.extend_from_slice(&self.version.to_le_bytes());
        bin.extend_from_slice(&encode_varint(self.inputs.len() as u64));
        for input in &self.inputs {
            input.encode_into(&mut bin);
        }
        bin.extend_from_slice(&encode_varint(self.outputs.len() as u64));
        for output in &self.outputs {
            output.encode_into(&mut bin);
        }
        bin.extend_from_slice(&self.locktime.to_le_bytes());
        bin
    }

    /// Encode in the extended form when witness data is present.
    ///
    /// A transaction without witness data uses the basic form, so its wtxid
    /// equals its txid.
    pub fn encode_with_witness(&self) -> Vec<u8> {
        if !self.has_witness() {
            return self.encode_non_witness();
        }
        let mut bin = Vec::new();
        bin.extend_from_slice(&self.version.to_le_bytes());
        bin.push(0x00); // marker
        bin.push(0x01); // flag
        bin.extend_from_slice(&encode_varint(self.inputs.len() as u64));
        for input in &self.inputs {
            input.encode_into(&mut bin);
        }
        bin.extend_from_slice(&encode_varint(self.outputs.len() as u64));
        for output in &self.outputs {
            output.encode_into(&mut bin);
        }
        for input in &self.inputs {
            bin.extend_from_slice(&encode_varint(input.witness.len() as u64));
            for item in &input.witness {
                bin.extend_from_slice(&encode_varint(item.len() as u64));
                bin.extend_from_slice(item);
            }
        }
        bin.extend_from_slice(&self.locktime.to_le_bytes());
        bin
    }

    /// Transaction identifier in internal byte order.
    ///
    /// Computed from the non-witness encoding on first request, then cached.
    pub fn txid(&self) -> [u8; 32] {
        *self
            .txid
            .get_or_init(|| double_sha256_array(&self.encode_non_witness()))
    }

    /// Witness transaction identifier in internal byte order
    pub fn wtxid(&self) -> [u8; 32] {
        if !self.has_witness() {
            return self.txid();
        }
        double_sha256_array(&self.encode_with_witness())
    }

    /// Txid in display order (reversed bytes, hex)
    pub fn txid_hex(&self) -> String {
        hex::encode(reverse_bytes(&self.txid()))
    }

    /// Wtxid in display order (reversed bytes, hex)
    pub fn wtxid_hex(&self) -> String {
        hex::encode(reverse_bytes(&self.wtxid()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SliceReader;
    use crate::crypto::double_sha256;

    /// Legacy 1-in/2-out transaction: version 1, prev_index 0,
    /// sequence 0xFFFFFFFF, locktime 0.
    const LEGACY_TX_HEX: &str = "01000000010102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20000000001976a914000000000000000000000000000000000000000088acffffffff0200f2052a010000001976a914aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa88ac00f90295000000001976a914bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb88ac00000000";

    /// Display-order txid of `LEGACY_TX_HEX` (double SHA-256, reversed)
    const LEGACY_TXID: &str = "71e706fe52069118972adad7399290900f3737bb98c1a9f6dfbe1e0d553633a2";

    /// SegWit 1-in/1-out transaction: marker/flag 0x00 0x01, two witness
    /// items, locktime 0x1234.
    const SEGWIT_TX_HEX: &str = "0200000000010144444444444444444444444444444444444444444444444444444444444444440100000000feffffff0115cd5b07000000001600145555555555555555555555555555555555555555024730442222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222222012102333333333333333333333333333333333333333333333333333333333333333334120000";

    /// Internal-order digests of `SEGWIT_TX_HEX`
    const SEGWIT_TXID_INTERNAL: &str =
        "d8f4a1ef411b1a95a69529acbff564ac60d13cd7ff6abf6e6db66d48b16dba7c";
    const SEGWIT_WTXID_INTERNAL: &str =
        "40af150814239b32ca928c88cb4f67b30e110d1b09e2bd3d96849cd7eebce464";

    /// Coinbase transaction with a non-final sequence (0x12345678)
    const COINBASE_TX_HEX: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff0a03abcdef2f746573742f785634120140be4025000000001976a914aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa88ac00000000";

    fn decode_hex_tx(hex_tx: &str) -> Result<Transaction, CodecError> {
        let bytes = hex::decode(hex_tx).unwrap();
        let mut reader = SliceReader::new(&bytes);
        Transaction::decode(&mut reader)
    }

    #[test]
    fn test_legacy_transaction_decode() {
        let bytes = hex::decode(LEGACY_TX_HEX).unwrap();
        let mut reader = SliceReader::new(&bytes);
        let tx = Transaction::decode(&mut reader).unwrap();

        assert_eq!(tx.version, 1);
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.locktime, 0);
        assert!(!tx.witness_present);
        assert!(!tx.has_witness());
        assert_eq!(tx.inputs[0].prev_index, 0);
        assert_eq!(tx.inputs[0].sequence, SEQUENCE_FINAL);
        assert_eq!(tx.outputs[0].index, 0);
        assert_eq!(tx.outputs[0].value, 5_000_000_000);
        assert_eq!(tx.outputs[1].index, 1);
        assert_eq!(tx.outputs[1].value, 2_500_000_000);
        // Cursor sits on the byte after locktime
        assert_eq!(reader.remaining(), 0);

        assert_eq!(tx.txid_hex(), LEGACY_TXID);
    }

    #[test]
    fn test_legacy_round_trip() {
        let bytes = hex::decode(LEGACY_TX_HEX).unwrap();
        let tx = decode_hex_tx(LEGACY_TX_HEX).unwrap();

        // Re-encoding reproduces the input bytes exactly
        assert_eq!(tx.encode_non_witness(), bytes);

        // decode(encode(T)) == T
        let encoded = tx.encode_non_witness();
        let mut reader = SliceReader::new(&encoded);
        let again = Transaction::decode(&mut reader).unwrap();
        assert_eq!(again, tx);
    }

    #[test]
    fn test_txid_is_double_sha_of_preimage() {
        let tx = decode_hex_tx(LEGACY_TX_HEX).unwrap();
        let digest = double_sha256(&tx.encode_non_witness());
        assert_eq!(tx.txid().to_vec(), digest);
        // Memoized value stays stable across calls
        assert_eq!(tx.txid(), tx.txid());
    }

    #[test]
    fn test_segwit_transaction_decode() {
        let bytes = hex::decode(SEGWIT_TX_HEX).unwrap();
        let mut reader = SliceReader::new(&bytes);
        let tx = Transaction::decode(&mut reader).unwrap();

        assert!(tx.witness_present);
        assert!(tx.has_witness());
        assert_eq!(tx.version, 2);
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].witness.len(), 2);
        assert_eq!(tx.inputs[0].witness[0].len(), 71);
        assert_eq!(tx.inputs[0].witness[1].len(), 33);
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 123_456_789);
        assert_eq!(tx.locktime, 0x1234);
        assert_eq!(reader.remaining(), 0);

        // Txid comes from the non-witness encoding and differs from wtxid
        assert_eq!(hex::encode(tx.txid()), SEGWIT_TXID_INTERNAL);
        assert_eq!(hex::encode(tx.wtxid()), SEGWIT_WTXID_INTERNAL);
        assert_ne!(tx.txid(), tx.wtxid());

        // The extended encoding reproduces the input bytes
        assert_eq!(tx.encode_with_witness(), bytes);
    }

    #[test]
    fn test_segwit_witness_round_trip() {
        let tx = decode_hex_tx(SEGWIT_TX_HEX).unwrap();
        let encoded = tx.encode_with_witness();
        let mut reader = SliceReader::new(&encoded);
        let again = Transaction::decode(&mut reader).unwrap();
        assert_eq!(again, tx);
        assert_eq!(again.inputs[0].witness, tx.inputs[0].witness);
    }

    #[test]
    fn test_segwit_zero_flag_is_malformed() {
        // version | marker 0x00 | flag 0x00
        let bytes = hex::decode("010000000000").unwrap();
        let mut reader = SliceReader::new(&bytes);
        assert_eq!(
            Transaction::decode(&mut reader),
            Err(CodecError::MalformedSegwit)
        );
    }

    #[test]
    fn test_coinbase_decodes_with_nonfinal_sequence() {
        let tx = decode_hex_tx(COINBASE_TX_HEX).unwrap();
        assert_eq!(tx.inputs.len(), 1);
        assert!(tx.inputs[0].is_coinbase());
        assert_eq!(tx.inputs[0].prev_hash, [0u8; 32]);
        assert_eq!(tx.inputs[0].sequence, 0x12345678);
        assert_eq!(
            hex::encode(tx.txid()),
            "513c79fac38fb28cbc776216fa18d23cd77555f1770924bce4fb01eb78c3f3c9"
        );
    }

    #[test]
    fn test_coinbase_shape_violations() {
        // prev_index 0xFFFFFFFF with a non-zero prev_hash
        let mut bad = Vec::new();
        bad.extend_from_slice(&1i32.to_le_bytes());
        bad.push(0x01); // one input
        bad.extend_from_slice(&[0x11; 32]);
        bad.extend_from_slice(&COINBASE_PREV_INDEX.to_le_bytes());
        let mut reader = SliceReader::new(&bad);
        assert!(matches!(
            Transaction::decode(&mut reader),
            Err(CodecError::InvalidCoinbase { .. })
        ));

        // zero prev_hash with an ordinary prev_index
        let mut bad = Vec::new();
        bad.extend_from_slice(&1i32.to_le_bytes());
        bad.push(0x01);
        bad.extend_from_slice(&[0u8; 32]);
        bad.extend_from_slice(&7u32.to_le_bytes());
        let mut reader = SliceReader::new(&bad);
        assert!(matches!(
            Transaction::decode(&mut reader),
            Err(CodecError::InvalidCoinbase { .. })
        ));
    }

    #[test]
    fn test_truncated_script_is_eof() {
        // Input script length claims 0xFFFF bytes but the buffer ends early
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(0x01); // one input
        bytes.extend_from_slice(&[0x22; 32]);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&[0xFD, 0xFF, 0xFF]); // script_len = 0xFFFF
        bytes.extend_from_slice(&[0x00; 8]); // far fewer than 0xFFFF bytes
        let mut reader = SliceReader::new(&bytes);
        assert!(matches!(
            Transaction::decode(&mut reader),
            Err(CodecError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_constructed_transaction_round_trip() {
        let tx = Transaction::new(
            2,
            vec![TxInput {
                prev_hash: [0xAB; 32],
                prev_index: 3,
                script: vec![0x51],
                sequence: 0xFFFFFFFE,
                witness: Vec::new(),
            }],
            vec![TxOutput {
                index: 0,
                value: 42,
                script: vec![0x6A],
            }],
            500_000_001,
        );
        let encoded = tx.encode_non_witness();
        let mut reader = SliceReader::new(&encoded);
        let decoded = Transaction::decode(&mut reader).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.txid(), tx.txid());
    }
}
