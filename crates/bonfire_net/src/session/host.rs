//! Host side of a session
//!
//! Accepts joiner streams, assigns peer ids, relays traffic, and keeps the
//! session discoverable: a periodic self-announcement broadcast plus a
//! responder answering active probes with a unicast announcement.

use crate::config::NetConfig;
use crate::discovery::PROBE_TOKEN;
use crate::error::NetError;
use crate::protocol::{AnnouncePayload, Envelope, WelcomePayload};
use crate::session::SessionEvent;
use crate::PeerId;
use dashmap::DashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Write side of one connected peer. Lines pushed here are flushed by the
/// peer's writer task; dropping the sender closes the stream.
struct PeerLink {
    tx: mpsc::UnboundedSender<String>,
}

/// A hosted session: TCP listener, announcement channel, probe responder,
/// and the table of connected peers.
pub struct HostSession {
    config: NetConfig,
    peers: Arc<DashMap<PeerId, PeerLink>>,
    local_addr: SocketAddr,
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl HostSession {
    /// Bind the session listener and start the discovery side-channels.
    ///
    /// The returned receiver carries connection lifecycle and message
    /// events; the consuming thread drains it once per tick. Discovery
    /// socket failures degrade (logged, session still opens); only the
    /// session listener itself is required.
    pub async fn open(
        config: NetConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), NetError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.session_port))
            .await
            .map_err(|source| NetError::Bind {
                role: "session",
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| NetError::Bind {
            role: "session",
            source,
        })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cancel, cancelled) = watch::channel(false);
        let peers: Arc<DashMap<PeerId, PeerLink>> = Arc::new(DashMap::new());
        let mut tasks = Vec::new();

        info!(name = %config.server_name, %local_addr, "session open");

        tasks.push(tokio::spawn(accept_loop(
            listener,
            config.clone(),
            local_addr.port(),
            peers.clone(),
            event_tx,
            cancelled.clone(),
        )));

        // Announcement channel: periodic broadcast of current ServerInfo.
        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(socket) => {
                if let Err(e) = socket.set_broadcast(true) {
                    warn!("announce socket rejected broadcast mode: {e}");
                }
                tasks.push(tokio::spawn(announce_loop(
                    socket,
                    config.clone(),
                    local_addr.port(),
                    peers.clone(),
                    cancelled.clone(),
                )));
            }
            Err(e) => warn!("announce socket bind failed, session will not self-announce: {e}"),
        }

        // Probe responder: answers active discovery queries.
        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.query_port)).await {
            Ok(socket) => tasks.push(tokio::spawn(query_responder(
                socket,
                config.clone(),
                local_addr.port(),
                peers.clone(),
                cancelled,
            ))),
            Err(e) => warn!("query socket bind failed, session not probeable: {e}"),
        }

        Ok((
            Self {
                config,
                peers,
                local_addr,
                cancel,
                tasks,
            },
            event_rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn occupancy(&self) -> u32 {
        self.peers.len() as u32
    }

    /// Current discoverable descriptor, minus the transport-supplied
    /// address.
    pub fn server_info(&self) -> AnnouncePayload {
        AnnouncePayload {
            name: self.config.server_name.clone(),
            port: self.local_addr.port(),
            occupancy: self.occupancy(),
            max_occupancy: self.config.max_peers,
        }
    }

    /// Connection-status text for the UI surface.
    pub fn status(&self) -> String {
        format!(
            "Hosting '{}' on port {} ({}/{} peers)",
            self.config.server_name,
            self.local_addr.port(),
            self.occupancy(),
            self.config.max_peers
        )
    }

    /// Send to every connected peer. Best-effort: a dead peer's frame is
    /// dropped and its reader handles the disconnect.
    pub fn broadcast(&self, envelope: &Envelope) {
        let line = envelope.encode();
        for entry in self.peers.iter() {
            if entry.value().tx.send(line.clone()).is_err() {
                debug!(peer = %entry.key(), "dropping frame for departing peer");
            }
        }
    }

    /// Relay helper: send to every peer except the originator.
    pub fn broadcast_except(&self, skip: PeerId, envelope: &Envelope) {
        let line = envelope.encode();
        for entry in self.peers.iter() {
            if *entry.key() == skip {
                continue;
            }
            if entry.value().tx.send(line.clone()).is_err() {
                debug!(peer = %entry.key(), "dropping frame for departing peer");
            }
        }
    }

    pub fn send_to(&self, peer: PeerId, envelope: &Envelope) -> Result<(), NetError> {
        let link = self.peers.get(&peer).ok_or(NetError::UnknownPeer(peer))?;
        link.tx
            .send(envelope.encode())
            .map_err(|_| NetError::UnknownPeer(peer))
    }

    /// Close the listener, the discovery side-channels, and every peer
    /// stream. In-flight sends are best-effort.
    pub async fn shutdown(mut self) {
        let _ = self.cancel.send(true);
        self.peers.clear();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("session closed");
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: NetConfig,
    session_port: u16,
    peers: Arc<DashMap<PeerId, PeerLink>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    mut cancelled: watch::Receiver<bool>,
) {
    // Never reused within the process lifetime, even after disconnects.
    let mut next_peer_id = 1u64;
    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if peers.len() as u32 >= config.max_peers {
                        warn!(%addr, "session full, refusing connection");
                        continue;
                    }
                    let id = PeerId(next_peer_id);
                    next_peer_id += 1;
                    register_peer(
                        stream,
                        addr,
                        id,
                        &config,
                        session_port,
                        &peers,
                        &event_tx,
                        cancelled.clone(),
                    );
                }
                Err(e) => {
                    if *cancelled.borrow() {
                        break;
                    }
                    warn!("accept failed: {e}");
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn register_peer(
    stream: TcpStream,
    addr: SocketAddr,
    id: PeerId,
    config: &NetConfig,
    session_port: u16,
    peers: &Arc<DashMap<PeerId, PeerLink>>,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
    cancelled: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%addr, "set_nodelay failed: {e}");
    }
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(peer_writer(id, write_half, rx));

    // First frame on the stream: the peer's assigned identifier.
    let welcome = Envelope::welcome(&WelcomePayload {
        peer_id: id,
        server_name: config.server_name.clone(),
    });
    let _ = tx.send(welcome.encode());

    peers.insert(id, PeerLink { tx });
    info!(peer = %id, %addr, port = session_port, "peer connected");
    let _ = event_tx.send(SessionEvent::PeerConnected(id));

    tokio::spawn(peer_reader(
        id,
        read_half,
        peers.clone(),
        event_tx.clone(),
        cancelled,
    ));
}

async fn peer_writer(
    id: PeerId,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            debug!(peer = %id, "write failed, closing stream: {e}");
            break;
        }
    }
}

async fn peer_reader(
    id: PeerId,
    read_half: OwnedReadHalf,
    peers: Arc<DashMap<PeerId, PeerLink>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match Envelope::decode(&line) {
                    Ok(mut envelope) => {
                        // The stream, not the payload, says who this is.
                        envelope.sender = id;
                        let _ = event_tx.send(SessionEvent::Message { from: id, envelope });
                    }
                    Err(e) => warn!(peer = %id, "dropping undecodable frame: {e}"),
                },
                Ok(None) => break, // EOF
                Err(e) => {
                    if !*cancelled.borrow() {
                        warn!(peer = %id, "read failed: {e}");
                    }
                    break;
                }
            }
        }
    }

    // During shutdown the session clears the table itself; only a live
    // session turns reader exit into a disconnect event.
    if !*cancelled.borrow() && peers.remove(&id).is_some() {
        info!(peer = %id, "peer disconnected");
        let _ = event_tx.send(SessionEvent::PeerDisconnected(id));
    }
}

async fn announce_loop(
    socket: UdpSocket,
    config: NetConfig,
    session_port: u16,
    peers: Arc<DashMap<PeerId, PeerLink>>,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.announce_interval);
    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            _ = ticker.tick() => {
                let envelope = Envelope::announcement(&AnnouncePayload {
                    name: config.server_name.clone(),
                    port: session_port,
                    occupancy: peers.len() as u32,
                    max_occupancy: config.max_peers,
                });
                let target = (Ipv4Addr::BROADCAST, config.announce_port);
                if let Err(e) = socket.send_to(envelope.encode().as_bytes(), target).await {
                    if *cancelled.borrow() {
                        break;
                    }
                    debug!("announce broadcast failed: {e}");
                }
            }
        }
    }
}

async fn query_responder(
    socket: UdpSocket,
    config: NetConfig,
    session_port: u16,
    peers: Arc<DashMap<PeerId, PeerLink>>,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) if &buf[..len] == PROBE_TOKEN => {
                    let envelope = Envelope::announcement(&AnnouncePayload {
                        name: config.server_name.clone(),
                        port: session_port,
                        occupancy: peers.len() as u32,
                        max_occupancy: config.max_peers,
                    });
                    debug!(%src, "answering discovery probe");
                    if let Err(e) = socket.send_to(envelope.encode().as_bytes(), src).await {
                        warn!(%src, "probe reply failed: {e}");
                    }
                }
                Ok((_, src)) => debug!(%src, "ignoring non-probe datagram on query port"),
                Err(e) => {
                    if *cancelled.borrow() {
                        break;
                    }
                    warn!("query receive failed: {e}");
                }
            }
        }
    }
}
