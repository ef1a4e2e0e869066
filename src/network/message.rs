//! Bitcoin P2P wire messages and framing
//!
//! Every message on the wire carries a 24-byte header:
//!
//! ```text
//! +------------+--------------+---------------+-------------+
//! | magic (4)  | command (12) | length (4 LE) | checksum (4)|
//! +------------+--------------+---------------+-------------+
//! | payload (variable)                                      |
//! +---------------------------------------------------------+
//! ```
//!
//! The checksum is the first 4 bytes of double SHA-256 of the payload.
//! [`FrameCodec`] implements length-delimited framing over this header for
//! use with `tokio_util::codec::Framed`.

use crate::codec::{encode_varint, ByteSource, CursorError, SliceReader};
use crate::crypto::double_sha256;
use bytes::{Buf, BufMut, BytesMut};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Network magic for Bitcoin mainnet (F9 BE B4 D9 on the wire)
pub const MAINNET_MAGIC: u32 = 0xD9B4BEF9;

/// Protocol version advertised in the handshake
pub const PROTOCOL_VERSION: i32 = 70015;

/// User agent advertised in the handshake
pub const USER_AGENT: &str = "/CW:01/";

/// Default Bitcoin P2P port
pub const DEFAULT_PORT: u16 = 8333;

/// Message header length: magic + command + length + checksum
pub const HEADER_LEN: usize = 24;

/// Upper bound on accepted payload sizes
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Maximum number of entries accepted in one `addr` message
pub const MAX_ADDR_PER_MESSAGE: u64 = 1000;

bitflags::bitflags! {
    /// Service bits advertised in `version` and `addr` messages
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ServiceFlags: u64 {
        /// Full node able to serve the complete chain
        const NODE_NETWORK = 1;
        /// Node supports segregated witness
        const NODE_WITNESS = 1 << 3;
        /// Node serves only recent blocks
        const NODE_NETWORK_LIMITED = 1 << 10;
    }
}

/// Wire message errors
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid network magic: {found:#010x}")]
    InvalidMagic { found: u32 },
    #[error("payload checksum mismatch: header {header}, computed {computed}")]
    ChecksumMismatch { header: String, computed: String },
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("malformed payload: {0}")]
    Malformed(#[from] CursorError),
    #[error("addr message with {0} entries exceeds the per-message limit")]
    TooManyAddresses(u64),
}

// =============================================================================
// Commands
// =============================================================================

/// P2P command, carried as 12 zero-padded ASCII bytes in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Version,
    Verack,
    Ping,
    Pong,
    Addr,
    GetAddr,
    /// Unrecognized command, raw header bytes preserved
    Unknown([u8; 12]),
}

impl Command {
    /// Header encoding of this command
    pub fn as_bytes(&self) -> [u8; 12] {
        let name: &[u8] = match self {
            Command::Version => b"version",
            Command::Verack => b"verack",
            Command::Ping => b"ping",
            Command::Pong => b"pong",
            Command::Addr => b"addr",
            Command::GetAddr => b"getaddr",
            Command::Unknown(raw) => return *raw,
        };
        let mut out = [0u8; 12];
        out[..name.len()].copy_from_slice(name);
        out
    }

    /// Parse a command from its header bytes
    pub fn from_bytes(raw: &[u8; 12]) -> Self {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(12);
        match &raw[..end] {
            b"version" => Command::Version,
            b"verack" => Command::Verack,
            b"ping" => Command::Ping,
            b"pong" => Command::Pong,
            b"addr" => Command::Addr,
            b"getaddr" => Command::GetAddr,
            _ => Command::Unknown(*raw),
        }
    }

    /// Command name for logging
    pub fn name(&self) -> String {
        match self {
            Command::Unknown(raw) => {
                let end = raw.iter().position(|&b| b == 0).unwrap_or(12);
                String::from_utf8_lossy(&raw[..end]).into_owned()
            }
            other => String::from_utf8_lossy(&other.as_bytes())
                .trim_end_matches('\0')
                .to_string(),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A framed P2P message: command plus raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(command: Command, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    /// Build a `version` message from its payload
    pub fn version(payload: &VersionPayload) -> Self {
        Self::new(Command::Version, payload.encode())
    }

    pub fn verack() -> Self {
        Self::new(Command::Verack, Vec::new())
    }

    pub fn getaddr() -> Self {
        Self::new(Command::GetAddr, Vec::new())
    }

    /// Build a `ping` with a random nonce
    pub fn ping() -> Self {
        Self::ping_with_nonce(rand::thread_rng().gen())
    }

    pub fn ping_with_nonce(nonce: u64) -> Self {
        Self::new(Command::Ping, nonce.to_le_bytes().to_vec())
    }

    /// Build the `pong` answering a ping nonce
    pub fn pong(nonce: u64) -> Self {
        Self::new(Command::Pong, nonce.to_le_bytes().to_vec())
    }
}

/// First 4 bytes of double SHA-256 of the payload
pub fn payload_checksum(payload: &[u8]) -> [u8; 4] {
    let digest = double_sha256(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Parse the 8-byte nonce of a `ping`/`pong` payload
pub fn parse_nonce(payload: &[u8]) -> Result<u64, MessageError> {
    let mut reader = SliceReader::new(payload);
    Ok(reader.read_u64()?)
}

// =============================================================================
// Network addresses
// =============================================================================

/// Network address as carried in `version` and `addr` payloads:
/// services, 16-byte IPv6-mapped IP, big-endian port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddr {
    pub services: ServiceFlags,
    pub ip: IpAddr,
    pub port: u16,
}

impl NetAddr {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            services: ServiceFlags::empty(),
            ip,
            port,
        }
    }

    /// All-zero address used when the sender address is unknown
    pub fn unspecified() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.services.bits().to_le_bytes());
        let octets = match self.ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        out.extend_from_slice(&octets);
        out.extend_from_slice(&self.port.to_be_bytes());
    }

    fn decode_from<R: ByteSource>(src: &mut R) -> Result<Self, CursorError> {
        let services = ServiceFlags::from_bits_retain(src.read_u64()?);
        let v6 = Ipv6Addr::from(src.read_array::<16>()?);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        let port = u16::from_be_bytes(src.read_array()?);
        Ok(Self { services, ip, port })
    }
}

/// One entry of an `addr` message: last-seen time plus address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrEntry {
    pub time: u32,
    pub addr: NetAddr,
}

/// Parse an `addr` payload into its entries
pub fn parse_addr_payload(payload: &[u8]) -> Result<Vec<AddrEntry>, MessageError> {
    let mut reader = SliceReader::new(payload);
    let count = reader.read_varint()?;
    if count > MAX_ADDR_PER_MESSAGE {
        return Err(MessageError::TooManyAddresses(count));
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let time = reader.read_u32()?;
        let addr = NetAddr::decode_from(&mut reader)?;
        entries.push(AddrEntry { time, addr });
    }
    Ok(entries)
}

/// Encode an `addr` payload
pub fn encode_addr_payload(entries: &[AddrEntry]) -> Vec<u8> {
    let mut out = encode_varint(entries.len() as u64);
    for entry in entries {
        out.extend_from_slice(&entry.time.to_le_bytes());
        entry.addr.encode_into(&mut out);
    }
    out
}

// =============================================================================
// Version payload
// =============================================================================

/// Payload of the `version` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    pub version: i32,
    pub services: ServiceFlags,
    pub timestamp: i64,
    pub receiver: NetAddr,
    pub sender: NetAddr,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl VersionPayload {
    /// Build the version we announce to a peer
    pub fn new(
        version: i32,
        services: ServiceFlags,
        user_agent: &str,
        receiver: SocketAddr,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            version,
            services,
            timestamp,
            receiver: NetAddr::from_socket_addr(receiver),
            sender: NetAddr::unspecified(),
            nonce: rand::thread_rng().gen(),
            user_agent: user_agent.to_string(),
            start_height: 0,
            relay: true,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.services.bits().to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        self.receiver.encode_into(&mut out);
        self.sender.encode_into(&mut out);
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&encode_varint(self.user_agent.len() as u64));
        out.extend_from_slice(self.user_agent.as_bytes());
        out.extend_from_slice(&self.start_height.to_le_bytes());
        out.push(u8::from(self.relay));
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = SliceReader::new(payload);
        let version = reader.read_i32()?;
        let services = ServiceFlags::from_bits_retain(reader.read_u64()?);
        let timestamp = reader.read_u64()? as i64;
        let receiver = NetAddr::decode_from(&mut reader)?;
        let sender = NetAddr::decode_from(&mut reader)?;
        let nonce = reader.read_u64()?;
        let ua_len = reader.read_varint()?;
        let user_agent = String::from_utf8_lossy(&reader.read_bytes(ua_len as usize)?).into_owned();
        let start_height = reader.read_i32()?;
        // The relay flag is absent in pre-BIP37 versions
        let relay = match reader.remaining() {
            0 => true,
            _ => reader.read_byte()? != 0,
        };
        Ok(Self {
            version,
            services,
            timestamp,
            receiver,
            sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

// =============================================================================
// Frame codec
// =============================================================================

/// Message codec for Bitcoin header framing
pub struct FrameCodec;

impl Encoder<Message> for FrameCodec {
    type Error = MessageError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MessageError::PayloadTooLarge(item.payload.len()));
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u32_le(MAINNET_MAGIC);
        dst.put_slice(&item.command.as_bytes());
        dst.put_u32_le(item.payload.len() as u32);
        dst.put_slice(&payload_checksum(&item.payload));
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = MessageError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if magic != MAINNET_MAGIC {
            return Err(MessageError::InvalidMagic { found: magic });
        }

        let len = u32::from_le_bytes([src[16], src[17], src[18], src[19]]) as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(MessageError::PayloadTooLarge(len));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let mut raw_command = [0u8; 12];
        raw_command.copy_from_slice(&src[4..16]);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&src[20..24]);

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).to_vec();

        let computed = payload_checksum(&payload);
        if computed != checksum {
            return Err(MessageError::ChecksumMismatch {
                header: hex::encode(checksum),
                computed: hex::encode(computed),
            });
        }

        Ok(Some(Message {
            command: Command::from_bytes(&raw_command),
            payload,
        }))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let mut codec = FrameCodec;
        let msg = Message::ping_with_nonce(12345);

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN + 8);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_needs_more_data() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Message::ping_with_nonce(7), &mut buf)
            .unwrap();

        let mut partial = BytesMut::from(&buf[..HEADER_LEN + 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec.encode(Message::verack(), &mut buf).unwrap();
        buf[0] = 0x00;

        assert!(matches!(
            codec.decode(&mut buf),
            Err(MessageError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Message::new(Command::Ping, b"hello".to_vec()), &mut buf)
            .unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        assert!(matches!(
            codec.decode(&mut buf),
            Err(MessageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_known_checksums() {
        // dSHA256("")[..4] and dSHA256("hello")[..4]
        assert_eq!(payload_checksum(&[]), [0x5d, 0xf6, 0xe0, 0xe2]);
        assert_eq!(payload_checksum(b"hello"), [0x95, 0x95, 0xc9, 0xdf]);
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::from_bytes(&Command::Version.as_bytes()), Command::Version);
        assert_eq!(Command::from_bytes(&Command::GetAddr.as_bytes()), Command::GetAddr);

        let mut raw = [0u8; 12];
        raw[..6].copy_from_slice(b"verack");
        assert_eq!(Command::from_bytes(&raw), Command::Verack);

        let mut unknown = [0u8; 12];
        unknown[..7].copy_from_slice(b"headers");
        let cmd = Command::from_bytes(&unknown);
        assert_eq!(cmd, Command::Unknown(unknown));
        assert_eq!(cmd.name(), "headers");
    }

    #[test]
    fn test_version_payload_round_trip() {
        let payload = VersionPayload::new(
            PROTOCOL_VERSION,
            ServiceFlags::empty(),
            USER_AGENT,
            "203.0.113.7:8333".parse().unwrap(),
        );
        let decoded = VersionPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded.user_agent, "/CW:01/");
        assert_eq!(decoded.receiver.port, 8333);
    }

    #[test]
    fn test_addr_payload_round_trip() {
        let entries = vec![
            AddrEntry {
                time: 1_700_000_000,
                addr: NetAddr {
                    services: ServiceFlags::NODE_NETWORK,
                    ip: "198.51.100.4".parse().unwrap(),
                    port: 8333,
                },
            },
            AddrEntry {
                time: 1_700_000_060,
                addr: NetAddr {
                    services: ServiceFlags::empty(),
                    ip: "2001:db8::1".parse().unwrap(),
                    port: 18333,
                },
            },
        ];
        let payload = encode_addr_payload(&entries);
        let parsed = parse_addr_payload(&payload).unwrap();
        assert_eq!(parsed, entries);
        assert_eq!(parsed[0].addr.ip, "198.51.100.4".parse::<IpAddr>().unwrap());
        assert_eq!(parsed[1].addr.port, 18333);
    }

    #[test]
    fn test_addr_payload_entry_limit() {
        let mut payload = encode_varint(MAX_ADDR_PER_MESSAGE + 1);
        payload.extend_from_slice(&[0u8; 30]);
        assert!(matches!(
            parse_addr_payload(&payload),
            Err(MessageError::TooManyAddresses(_))
        ));
    }

    #[test]
    fn test_ping_nonce() {
        let msg = Message::ping_with_nonce(0xDEADBEEF);
        assert_eq!(parse_nonce(&msg.payload).unwrap(), 0xDEADBEEF);
        assert!(parse_nonce(&[0x01]).is_err());
    }
}
