//! Joiner side of a session
//!
//! One bounded-time connection attempt, a welcome handshake that tells the
//! peer its assigned identifier, then symmetric framed traffic until either
//! side disconnects.

use crate::config::NetConfig;
use crate::error::NetError;
use crate::protocol::{Envelope, MessageKind};
use crate::session::PeerEvent;
use crate::PeerId;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A session joined to one host.
pub struct PeerSession {
    tx: Option<mpsc::UnboundedSender<String>>,
    local_id: Arc<OnceLock<PeerId>>,
    remote: SocketAddr,
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerSession {
    /// Attempt a connection, bounded by the configured timeout. Failure is
    /// a returned error, never a crash; the caller may retry.
    pub async fn connect(
        addr: SocketAddr,
        config: &NetConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>), NetError> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetError::ConnectTimeout {
                addr,
                timeout: config.connect_timeout,
            })?
            .map_err(|source| NetError::Connect { addr, source })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%addr, "set_nodelay failed: {e}");
        }

        let (read_half, write_half) = stream.into_split();
        let (tx, writer_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cancel, cancelled) = watch::channel(false);
        let local_id = Arc::new(OnceLock::new());

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(session_writer(write_half, writer_rx)));
        tasks.push(tokio::spawn(session_reader(
            read_half,
            local_id.clone(),
            event_tx,
            cancelled,
        )));

        info!(%addr, "connected, awaiting welcome");
        Ok((
            Self {
                tx: Some(tx),
                local_id,
                remote: addr,
                cancel,
                tasks,
            },
            event_rx,
        ))
    }

    /// Identifier the host assigned to us; `None` until the welcome frame
    /// arrives.
    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id.get().copied()
    }

    pub fn is_connected(&self) -> bool {
        self.tx.is_some()
    }

    /// Connection-status text for the UI surface.
    pub fn status(&self) -> String {
        match (&self.tx, self.local_id()) {
            (Some(_), Some(id)) => format!("Connected to {} as {}", self.remote, id),
            (Some(_), None) => format!("Connecting to {}", self.remote),
            (None, _) => "Not connected".into(),
        }
    }

    /// Queue a frame for the host. Fails soft once disconnected.
    pub fn send(&self, envelope: &Envelope) -> Result<(), NetError> {
        let tx = self.tx.as_ref().ok_or(NetError::NotConnected)?;
        tx.send(envelope.encode()).map_err(|_| NetError::NotConnected)
    }

    /// Idempotent: disconnecting an already-disconnected session is a
    /// no-op.
    pub async fn disconnect(&mut self) {
        let Some(tx) = self.tx.take() else { return };
        drop(tx);
        let _ = self.cancel.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!(addr = %self.remote, "disconnected");
    }
}

async fn session_writer(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            debug!("write failed, closing stream: {e}");
            break;
        }
    }
}

async fn session_reader(
    read_half: OwnedReadHalf,
    local_id: Arc<OnceLock<PeerId>>,
    event_tx: mpsc::UnboundedSender<PeerEvent>,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            _ = cancelled.changed() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match Envelope::decode(&line) {
                    Ok(envelope) if envelope.kind == MessageKind::Welcome => {
                        match envelope.welcome_payload() {
                            Ok(welcome) => {
                                let _ = local_id.set(welcome.peer_id);
                                info!(id = %welcome.peer_id, server = %welcome.server_name, "welcome received");
                                let _ = event_tx.send(PeerEvent::Connected(welcome.peer_id));
                            }
                            Err(e) => warn!("dropping malformed welcome: {e}"),
                        }
                    }
                    Ok(envelope) => {
                        let _ = event_tx.send(PeerEvent::Message(envelope));
                    }
                    Err(e) => warn!("dropping undecodable frame: {e}"),
                },
                Ok(None) => break, // host closed the stream
                Err(e) => {
                    if *cancelled.borrow() {
                        return;
                    }
                    warn!("read failed: {e}");
                    break;
                }
            }
        }
    }
    let _ = event_tx.send(PeerEvent::Disconnected);
}
