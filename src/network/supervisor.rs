//! Peer supervisor
//!
//! Maintains a bounded set of outbound peers. Candidates enter through
//! [`Network::add_peer`], a scheduler loop ([`Network::watch`]) promotes
//! them past the handshake up to `max_peers`, and every active peer gets a
//! handler task (message dispatch), a writer task (outbound queue), and a
//! watchdog task (liveness deadline). A peer that stays silent past the
//! deadline is banned for the process lifetime.
//!
//! All three address tables live behind one lock; handler tasks and the
//! scheduler never mutate them without it.

use crate::network::message::{parse_addr_payload, Command, FrameCodec, Message, ServiceFlags};
use crate::network::message::{DEFAULT_PORT, PROTOCOL_VERSION, USER_AGENT};
use crate::network::peer::{Peer, PeerError, PeerHandle};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

/// Result of the user message callback; an error tears down the peer
pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// User callback invoked for every inbound message, in receive order.
/// Context travels as a closure capture.
pub type OnMessage = Arc<dyn Fn(&PeerHandle, &Message) -> CallbackResult + Send + Sync>;

/// Supervisor errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("already connected to that peer ({0})")]
    AlreadyConnected(String),
    #[error("peer banned ({0})")]
    Banned(String),
    #[error("dial failed for {addr}: {source}")]
    DialFailed {
        addr: String,
        #[source]
        source: PeerError,
    },
    #[error("candidate table full ({0} entries)")]
    CandidateTableFull(usize),
}

/// Supervisor configuration
#[derive(Clone)]
pub struct NetworkConfig {
    /// Maximum number of active peers
    pub max_peers: usize,
    /// Bound on the candidate table
    pub max_candidates: usize,
    /// Protocol version announced in the handshake
    pub protocol_version: i32,
    /// Services announced in the handshake
    pub services: ServiceFlags,
    /// User agent announced in the handshake
    pub user_agent: String,
    /// Port assumed for address strings without one
    pub default_port: u16,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Deadline for a whole handshake exchange
    pub handshake_timeout: Duration,
    /// Liveness deadline; silent peers are banned past it
    pub liveness_timeout: Duration,
    /// Scheduler tick interval
    pub tick_interval: Duration,
    /// Outbound queue capacity per peer
    pub outbound_queue: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let max_peers = 10;
        Self {
            max_peers,
            max_candidates: max_peers * 10,
            protocol_version: PROTOCOL_VERSION,
            services: ServiceFlags::empty(),
            user_agent: USER_AGENT.to_string(),
            default_port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(60),
            tick_interval: Duration::from_secs(10),
            outbound_queue: 10_000,
        }
    }
}

/// The three address tables, mutated only under one lock
#[derive(Default)]
struct PeerTables {
    /// Active peers past the handshake
    peers: HashMap<String, PeerHandle>,
    /// Connected candidates awaiting promotion
    candidates: HashMap<String, Peer>,
    /// Addresses rejected for the process lifetime
    banned: HashSet<String>,
}

/// Why the watchdog tears a peer down
enum Eviction {
    /// Handler finished (read error, callback error, or clean close)
    Remove,
    /// Liveness deadline expired
    Ban,
}

/// The peer supervisor
pub struct Network {
    config: NetworkConfig,
    tables: RwLock<PeerTables>,
    on_message: OnMessage,
}

/// Table key for an address: `host:port`, IPv6 bracketed
pub fn authority(ip: IpAddr, port: u16) -> String {
    SocketAddr::new(ip, port).to_string()
}

impl Network {
    pub fn new(config: NetworkConfig, on_message: OnMessage) -> Arc<Self> {
        Arc::new(Self {
            config,
            tables: RwLock::new(PeerTables::default()),
            on_message,
        })
    }

    /// Dial a peer and insert it as a candidate.
    ///
    /// Fails with [`NetworkError::AlreadyConnected`] for known addresses,
    /// [`NetworkError::Banned`] for banned ones, and
    /// [`NetworkError::DialFailed`] on connect errors. The candidate table
    /// is bounded; see [`NetworkConfig::max_candidates`].
    pub async fn add_peer(&self, ip: IpAddr, port: u16) -> Result<(), NetworkError> {
        let authority = authority(ip, port);
        self.admission_check(&authority).await?;

        let addr = SocketAddr::new(ip, port);
        let peer = Peer::connect(addr, self.config.connect_timeout)
            .await
            .map_err(|source| NetworkError::DialFailed {
                addr: authority.clone(),
                source,
            })?;

        // Re-check under the write lock: tables may have moved during the dial
        let mut tables = self.tables.write().await;
        if tables.peers.contains_key(&authority) || tables.candidates.contains_key(&authority) {
            return Err(NetworkError::AlreadyConnected(authority));
        }
        if tables.banned.contains(&authority) {
            return Err(NetworkError::Banned(authority));
        }
        if tables.candidates.len() >= self.config.max_candidates {
            return Err(NetworkError::CandidateTableFull(tables.candidates.len()));
        }
        log::info!("new candidate peer: {}", authority);
        tables.candidates.insert(authority, peer);
        Ok(())
    }

    /// Cheap pre-dial admission check
    async fn admission_check(&self, authority: &str) -> Result<(), NetworkError> {
        let tables = self.tables.read().await;
        if tables.peers.contains_key(authority) || tables.candidates.contains_key(authority) {
            return Err(NetworkError::AlreadyConnected(authority.to_string()));
        }
        if tables.banned.contains(authority) {
            return Err(NetworkError::Banned(authority.to_string()));
        }
        if tables.candidates.len() >= self.config.max_candidates {
            return Err(NetworkError::CandidateTableFull(tables.candidates.len()));
        }
        Ok(())
    }

    /// Scheduler loop: promote candidates on every tick, forever
    pub async fn watch(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            ticker.tick().await;
            Arc::clone(&self).tick().await;
        }
    }

    /// One scheduler pass: promote candidates while below `max_peers`.
    ///
    /// A failed handshake is logged and leaves the candidate for the next
    /// tick.
    pub async fn tick(self: Arc<Self>) {
        let keys: Vec<String> = {
            let tables = self.tables.read().await;
            tables.candidates.keys().cloned().collect()
        };

        for key in keys {
            let mut peer = {
                let mut tables = self.tables.write().await;
                if tables.peers.len() >= self.config.max_peers {
                    break;
                }
                match tables.candidates.remove(&key) {
                    Some(peer) => peer,
                    None => continue,
                }
            };

            let result = peer
                .handshake(
                    self.config.protocol_version,
                    self.config.services,
                    &self.config.user_agent,
                    self.config.handshake_timeout,
                )
                .await;
            match result {
                Ok(remote) => {
                    log::info!(
                        "peer {} connected: version={}, agent={}",
                        key,
                        remote.version,
                        remote.user_agent
                    );
                    Arc::clone(&self).promote(key, peer).await;
                }
                Err(e) => {
                    log::warn!("handshake with {} failed: {}", key, e);
                    let mut tables = self.tables.write().await;
                    tables.candidates.insert(key, peer);
                }
            }
        }
    }

    /// Move a handshaken candidate into the active table and spawn its
    /// handler, writer, and watchdog tasks
    async fn promote(self: Arc<Self>, authority: String, peer: Peer) {
        let (queue_tx, queue_rx) = mpsc::channel(self.config.outbound_queue);
        let handle = PeerHandle::new(authority.clone(), peer.addr(), queue_tx);

        {
            let mut tables = self.tables.write().await;
            if tables.peers.contains_key(&authority) {
                log::warn!("peer {} already active, dropping duplicate", authority);
                return;
            }
            tables.peers.insert(authority.clone(), handle.clone());
        }

        // Ask for more addresses right away; replies flow back as `addr`
        if let Err(e) = handle.enqueue(Message::getaddr()) {
            log::warn!("failed to enqueue getaddr for {}: {}", authority, e);
        }

        let (liveness_tx, liveness_rx) = mpsc::channel::<()>(1);
        let (writer, reader) = peer.split();

        let writer_task = tokio::spawn(write_loop(writer, queue_rx));
        let handler_task = tokio::spawn(Arc::clone(&self).read_loop(reader, handle, liveness_tx));
        tokio::spawn(self.watchdog(authority, handler_task, writer_task, liveness_rx));
    }

    /// Per-peer handler: dispatch inbound messages in receive order
    async fn read_loop(
        self: Arc<Self>,
        mut reader: SplitStream<Framed<TcpStream, FrameCodec>>,
        handle: PeerHandle,
        liveness_tx: mpsc::Sender<()>,
    ) {
        let reason = loop {
            match reader.next().await {
                Some(Ok(msg)) => {
                    log::debug!("received {} from {}", msg.command.name(), handle.authority);
                    match msg.command {
                        Command::Addr => match parse_addr_payload(&msg.payload) {
                            Ok(entries) => {
                                for entry in entries {
                                    if let Err(e) =
                                        self.add_peer(entry.addr.ip, entry.addr.port).await
                                    {
                                        log::debug!("candidate rejected: {}", e);
                                    }
                                }
                            }
                            Err(e) => {
                                log::warn!("bad addr payload from {}: {}", handle.authority, e)
                            }
                        },
                        Command::Ping => {
                            if let Err(e) = handle.handle_ping(&msg.payload) {
                                log::warn!("ping from {} not answered: {}", handle.authority, e);
                            }
                        }
                        _ => {}
                    }
                    if let Err(e) = (self.on_message)(&handle, &msg) {
                        break format!("message callback failed: {}", e);
                    }
                    let _ = liveness_tx.try_send(());
                }
                Some(Err(e)) => break format!("read error: {}", e),
                None => break "connection closed".to_string(),
            }
        };
        log::warn!("peer {} handler stopped: {}", handle.authority, reason);
        // Dropping liveness_tx wakes the watchdog, which removes the peer
    }

    /// Per-peer watchdog: enforce the liveness deadline and centralize
    /// teardown of the handler and writer tasks
    async fn watchdog(
        self: Arc<Self>,
        authority: String,
        handler: JoinHandle<()>,
        writer: JoinHandle<()>,
        mut liveness_rx: mpsc::Receiver<()>,
    ) {
        let eviction = loop {
            match tokio::time::timeout(self.config.liveness_timeout, liveness_rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => break Eviction::Remove,
                Err(_) => break Eviction::Ban,
            }
        };
        handler.abort();
        writer.abort();

        let mut tables = self.tables.write().await;
        tables.peers.remove(&authority);
        if let Eviction::Ban = eviction {
            log::warn!(
                "{:?} passed without receiving any message from {}; banning",
                self.config.liveness_timeout,
                authority
            );
            tables.banned.insert(authority);
        }
    }

    /// Number of active peers
    pub async fn peer_count(&self) -> usize {
        self.tables.read().await.peers.len()
    }

    /// Number of pending candidates
    pub async fn candidate_count(&self) -> usize {
        self.tables.read().await.candidates.len()
    }

    /// Whether an address is banned
    pub async fn is_banned(&self, authority: &str) -> bool {
        self.tables.read().await.banned.contains(authority)
    }

    /// Authorities of all active peers
    pub async fn connected_peers(&self) -> Vec<String> {
        self.tables.read().await.peers.keys().cloned().collect()
    }

    /// Handle of an active peer, if present
    pub async fn peer_handle(&self, authority: &str) -> Option<PeerHandle> {
        self.tables.read().await.peers.get(authority).cloned()
    }

    /// Enqueue a message to every active peer
    pub async fn broadcast(&self, msg: Message) {
        let handles: Vec<PeerHandle> = {
            let tables = self.tables.read().await;
            tables.peers.values().cloned().collect()
        };
        for handle in handles {
            if let Err(e) = handle.enqueue(msg.clone()) {
                log::warn!("failed to enqueue for {}: {}", handle.authority, e);
            }
        }
    }
}

/// Writer task: drain the outbound queue into the socket in enqueue order
async fn write_loop(
    mut writer: SplitSink<Framed<TcpStream, FrameCodec>, Message>,
    mut queue_rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = queue_rx.recv().await {
        if writer.send(msg).await.is_err() {
            break;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
