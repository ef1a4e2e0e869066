//! Peer connection and framer operations
//!
//! A [`Peer`] owns one outbound TCP connection wrapped in Bitcoin message
//! framing. It performs the `version`/`verack` handshake and exposes the
//! message-level operations the supervisor dispatches on. A [`PeerHandle`]
//! is the cheap clone handed to callbacks and writers: it carries the
//! peer's identity and the bounded outbound queue.

use crate::network::message::{
    parse_nonce, Command, FrameCodec, Message, MessageError, ServiceFlags, VersionPayload,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] MessageError),
    #[error("peer disconnected")]
    Disconnected,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("outbound queue full")]
    QueueFull,
}

/// An outbound peer connection with message framing
pub struct Peer {
    addr: SocketAddr,
    conn: Framed<TcpStream, FrameCodec>,
}

impl Peer {
    /// Dial a peer with a bounded connect timeout and TCP keepalive enabled
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self, PeerError> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_keepalive(true)?;
        let stream = tokio::time::timeout(connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| PeerError::ConnectTimeout)??;
        Ok(Self {
            addr,
            conn: Framed::new(stream, FrameCodec),
        })
    }

    /// Remote address of this connection
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send one framed message
    pub async fn send(&mut self, msg: Message) -> Result<(), PeerError> {
        self.conn.send(msg).await?;
        Ok(())
    }

    /// Wait for the next framed message
    pub async fn await_message(&mut self) -> Result<Message, PeerError> {
        match self.conn.next().await {
            Some(Ok(msg)) => Ok(msg),
            Some(Err(e)) => Err(e.into()),
            None => Err(PeerError::Disconnected),
        }
    }

    /// Run the `version`/`verack` handshake.
    ///
    /// Sends our version, acknowledges the peer's, and returns the peer's
    /// version payload once both version and verack have been observed.
    pub async fn handshake(
        &mut self,
        version: i32,
        services: ServiceFlags,
        user_agent: &str,
        deadline: Duration,
    ) -> Result<VersionPayload, PeerError> {
        tokio::time::timeout(deadline, self.handshake_exchange(version, services, user_agent))
            .await
            .map_err(|_| PeerError::HandshakeTimeout)?
    }

    async fn handshake_exchange(
        &mut self,
        version: i32,
        services: ServiceFlags,
        user_agent: &str,
    ) -> Result<VersionPayload, PeerError> {
        let ours = VersionPayload::new(version, services, user_agent, self.addr);
        self.send(Message::version(&ours)).await?;

        let mut remote_version: Option<VersionPayload> = None;
        let mut got_verack = false;
        let remote = loop {
            let msg = self.await_message().await?;
            match msg.command {
                Command::Version => {
                    let payload = VersionPayload::decode(&msg.payload)?;
                    self.send(Message::verack()).await?;
                    if got_verack {
                        break payload;
                    }
                    remote_version = Some(payload);
                }
                Command::Verack => {
                    got_verack = true;
                    if let Some(payload) = remote_version.take() {
                        break payload;
                    }
                }
                other => {
                    log::debug!("{}: ignoring {} during handshake", self.addr, other.name());
                }
            }
        };
        Ok(remote)
    }

    /// Split into independently owned write and read halves.
    ///
    /// Used at promotion time: the reader feeds the per-peer handler, the
    /// writer drains the outbound queue.
    pub fn split(
        self,
    ) -> (
        SplitSink<Framed<TcpStream, FrameCodec>, Message>,
        SplitStream<Framed<TcpStream, FrameCodec>>,
    ) {
        self.conn.split()
    }
}

/// Handle for identifying a peer and enqueueing outbound messages
#[derive(Clone)]
pub struct PeerHandle {
    /// Table key (`host:port`, IPv6 bracketed)
    pub authority: String,
    /// Remote socket address
    pub addr: SocketAddr,
    tx: mpsc::Sender<Message>,
}

impl PeerHandle {
    pub(crate) fn new(authority: String, addr: SocketAddr, tx: mpsc::Sender<Message>) -> Self {
        Self {
            authority,
            addr,
            tx,
        }
    }

    /// Enqueue a message without waiting; fails when the queue is full
    pub fn enqueue(&self, msg: Message) -> Result<(), PeerError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PeerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PeerError::Disconnected,
        })
    }

    /// Enqueue a message, waiting for queue space
    pub async fn send(&self, msg: Message) -> Result<(), PeerError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| PeerError::Disconnected)
    }

    /// Answer a `ping` payload by enqueueing the matching `pong`
    pub fn handle_ping(&self, payload: &[u8]) -> Result<(), PeerError> {
        let nonce = parse_nonce(payload)?;
        self.enqueue(Message::pong(nonce))
    }
}
