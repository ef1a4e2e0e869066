//! Cursored byte reader consumed by the transaction decoder
//!
//! The decoder only depends on the narrow [`ByteSource`] capability, so it
//! can be driven from a memory buffer, a block file, or a network stream.
//! All fixed-width reads are little-endian, matching the Bitcoin consensus
//! serialization.

use thiserror::Error;

/// Errors produced by a byte source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("unexpected end of input: needed {needed} more bytes, {remaining} available")]
    UnexpectedEof { needed: usize, remaining: usize },
}

/// A cursored reader over a byte stream.
///
/// `peek` and `read_bytes` are the primitives; the fixed-width and
/// CompactSize readers are provided on top of them. Every short read
/// surfaces [`CursorError::UnexpectedEof`] instead of panicking.
pub trait ByteSource {
    /// Return the next `n` bytes without advancing the cursor.
    fn peek(&self, n: usize) -> Result<Vec<u8>, CursorError>;

    /// Read and consume the next `n` bytes.
    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, CursorError>;

    /// Read a fixed-size array of bytes.
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CursorError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Read a single byte.
    fn read_byte(&mut self) -> Result<u8, CursorError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a little-endian u16.
    fn read_u16(&mut self) -> Result<u16, CursorError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian u32.
    fn read_u32(&mut self) -> Result<u32, CursorError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian u64.
    fn read_u64(&mut self) -> Result<u64, CursorError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian i32.
    fn read_i32(&mut self) -> Result<i32, CursorError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    /// Read a Bitcoin CompactSize varint.
    ///
    /// First byte `b`: values below `0xFD` are the value itself; `0xFD`,
    /// `0xFE` and `0xFF` prefix a little-endian u16, u32 or u64.
    fn read_varint(&mut self) -> Result<u64, CursorError> {
        let prefix = self.read_byte()?;
        match prefix {
            0xFF => self.read_u64(),
            0xFE => Ok(u64::from(self.read_u32()?)),
            0xFD => Ok(u64::from(self.read_u16()?)),
            b => Ok(u64::from(b)),
        }
    }
}

/// In-memory [`ByteSource`] over a byte slice
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl ByteSource for SliceReader<'_> {
    fn peek(&self, n: usize) -> Result<Vec<u8>, CursorError> {
        if n > self.remaining() {
            return Err(CursorError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        Ok(self.data[self.pos..self.pos + n].to_vec())
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, CursorError> {
        let bytes = self.peek(n)?;
        self.pos += n;
        Ok(bytes)
    }
}
