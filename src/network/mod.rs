//! P2P networking module
//!
//! Provides outbound peer networking for the node skeleton.
//!
//! # Features
//! - Bitcoin wire message framing (magic, command, checksum)
//! - Version/verack handshakes
//! - Bounded peer set with candidate promotion
//! - Liveness watchdog with banning
//! - Address gossip intake (`addr` messages)

pub mod message;
pub mod peer;
pub mod supervisor;

pub use message::{
    encode_addr_payload, parse_addr_payload, parse_nonce, payload_checksum, AddrEntry, Command,
    FrameCodec, Message, MessageError, NetAddr, ServiceFlags, VersionPayload, DEFAULT_PORT,
    HEADER_LEN, MAINNET_MAGIC, MAX_ADDR_PER_MESSAGE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
    USER_AGENT,
};
pub use peer::{Peer, PeerError, PeerHandle};
pub use supervisor::{
    authority, CallbackResult, Network, NetworkConfig, NetworkError, OnMessage,
};
