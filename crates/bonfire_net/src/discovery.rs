//! Host discovery over UDP broadcast
//!
//! Hosts self-announce on the announce port. Joiners can listen passively
//! (zero-latency discovery while a browser screen is open) or fire an
//! active probe on the query port and collect replies for a bounded time.
//! The two result lists are merged by the caller, never internally.

use crate::config::NetConfig;
use crate::error::NetError;
use crate::protocol::{AnnouncePayload, Envelope, MessageKind};
use bonfire_core::dispatch::Dispatcher;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Query token an active probe broadcasts; hosts answer with a unicast
/// `HostAnnouncement` envelope.
pub const PROBE_TOKEN: &[u8] = b"bonfire?";

const MAX_DATAGRAM: usize = 2048;

/// Discoverable-host descriptor.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    /// Transport-supplied source address of the announcement.
    pub addr: IpAddr,
    /// Payload-supplied TCP session port.
    pub port: u16,
    pub occupancy: u32,
    pub max_occupancy: u32,
    pub last_seen: Instant,
}

impl ServerInfo {
    /// Identity key: at most one live directory entry per key.
    pub fn key(&self) -> (IpAddr, u16) {
        (self.addr, self.port)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    fn from_announcement(payload: AnnouncePayload, addr: IpAddr, now: Instant) -> Self {
        Self {
            name: payload.name,
            addr,
            port: payload.port,
            occupancy: payload.occupancy,
            max_occupancy: payload.max_occupancy,
            last_seen: now,
        }
    }
}

/// Deduplicated, time-decayed set of known hosts.
///
/// Plain owned state: the passive listener task owns one, an active probe
/// builds one for its result. Nothing here is shared or locked.
#[derive(Debug, Default)]
pub struct HostDirectory {
    entries: Vec<ServerInfo>,
}

impl HostDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by identity key; last received wins. Returns true
    /// when the key was not present before.
    pub fn upsert(&mut self, info: ServerInfo) -> bool {
        match self.entries.iter_mut().find(|e| e.key() == info.key()) {
            Some(existing) => {
                *existing = info;
                false
            }
            None => {
                self.entries.push(info);
                true
            }
        }
    }

    /// Evict entries not refreshed within the staleness window.
    pub fn prune(&mut self, stale_after: Duration, now: Instant) {
        self.entries
            .retain(|e| now.duration_since(e.last_seen) <= stale_after);
    }

    pub fn snapshot(&self) -> Vec<ServerInfo> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Events the passive listener delivers through the dispatcher, on the
/// thread that owns UI state.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A host with a previously unseen identity key announced itself.
    HostDiscovered(ServerInfo),
    /// The deduplicated host list changed (insert, refresh, or eviction).
    RosterChanged(Vec<ServerInfo>),
}

pub type DiscoverySink = Arc<dyn Fn(DiscoveryEvent) + Send + Sync>;

/// Active probe: broadcast a query on the well-known query port and collect
/// deduplicated replies until the timeout elapses.
pub async fn probe(config: &NetConfig, timeout: Duration) -> Result<Vec<ServerInfo>, NetError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|source| NetError::Bind {
            role: "probe",
            source,
        })?;
    socket.set_broadcast(true).map_err(NetError::Probe)?;
    socket
        .send_to(PROBE_TOKEN, (Ipv4Addr::BROADCAST, config.query_port))
        .await
        .map_err(NetError::Probe)?;

    let mut directory = HostDirectory::new();
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                warn!("probe receive failed: {e}");
                break;
            }
            Ok(Ok((len, src))) => {
                if let Some(info) = parse_announcement(&buf[..len], src.ip()) {
                    directory.upsert(info);
                }
            }
        }
    }
    Ok(directory.snapshot())
}

fn parse_announcement(datagram: &[u8], src: IpAddr) -> Option<ServerInfo> {
    let text = match std::str::from_utf8(datagram) {
        Ok(text) => text,
        Err(_) => {
            debug!(%src, "dropping non-text datagram");
            return None;
        }
    };
    match Envelope::decode(text) {
        Ok(envelope) if envelope.kind == MessageKind::HostAnnouncement => {
            match envelope.announce_payload() {
                Ok(payload) => Some(ServerInfo::from_announcement(payload, src, Instant::now())),
                Err(e) => {
                    warn!(%src, "dropping announcement with bad payload: {e}");
                    None
                }
            }
        }
        Ok(envelope) => {
            debug!(%src, kind = ?envelope.kind, "ignoring non-announcement datagram");
            None
        }
        Err(e) => {
            debug!(%src, "dropping undecodable datagram: {e}");
            None
        }
    }
}

/// Long-lived passive listener on the announce port.
///
/// Owns its [`HostDirectory`]; every consumer-visible effect is marshaled
/// through the dispatcher so only the consuming thread touches UI state.
/// Terminates only on [`shutdown`](Self::shutdown); receive errors during
/// normal operation are logged and the loop continues, errors after
/// cancellation are the expected teardown signal and are swallowed.
pub struct AnnouncementListener {
    task: JoinHandle<()>,
    cancel: watch::Sender<bool>,
    local_addr: SocketAddr,
}

impl AnnouncementListener {
    /// Bind the announce port and start listening.
    ///
    /// A bind failure is returned to the caller, which degrades discovery
    /// to active probes only.
    pub async fn bind(
        config: &NetConfig,
        dispatcher: Arc<Dispatcher>,
        sink: DiscoverySink,
    ) -> Result<Self, NetError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.announce_port))
            .await
            .map_err(|source| NetError::Bind {
                role: "announce",
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| NetError::Bind {
            role: "announce",
            source,
        })?;

        let (cancel, cancelled) = watch::channel(false);
        let stale_after = config.stale_after;
        let task = tokio::spawn(listen_loop(socket, stale_after, dispatcher, sink, cancelled));

        Ok(Self {
            task,
            cancel,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancel the listener and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.cancel.send(true);
        let _ = self.task.await;
    }
}

async fn listen_loop(
    socket: UdpSocket,
    stale_after: Duration,
    dispatcher: Arc<Dispatcher>,
    sink: DiscoverySink,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut directory = HostDirectory::new();
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => {
                    let (discovered, refreshed) = match parse_announcement(&buf[..len], src.ip()) {
                        Some(info) => {
                            let is_new = directory.upsert(info.clone());
                            (is_new.then_some(info), !is_new)
                        }
                        None => (None, false),
                    };
                    let before = directory.len();
                    directory.prune(stale_after, Instant::now());
                    let evicted = directory.len() != before;

                    if discovered.is_some() || refreshed || evicted {
                        let snapshot = directory.snapshot();
                        let sink = sink.clone();
                        dispatcher.enqueue(move || {
                            if let Some(info) = discovered {
                                sink(DiscoveryEvent::HostDiscovered(info));
                            }
                            sink(DiscoveryEvent::RosterChanged(snapshot));
                        });
                    }
                }
                Err(e) => {
                    if *cancelled.borrow() {
                        break;
                    }
                    warn!("announce receive failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn info(addr: [u8; 4], port: u16, occupancy: u32, last_seen: Instant) -> ServerInfo {
        ServerInfo {
            name: "Alpadise".into(),
            addr: IpAddr::from(addr),
            port,
            occupancy,
            max_occupancy: 4,
            last_seen,
        }
    }

    #[test]
    fn test_upsert_replaces_same_key_in_place() {
        let now = Instant::now();
        let mut directory = HostDirectory::new();

        assert!(directory.upsert(info([192, 168, 0, 2], 8888, 0, now)));
        assert!(!directory.upsert(info([192, 168, 0, 2], 8888, 3, now)));

        let snapshot = directory.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].occupancy, 3);
    }

    #[test]
    fn test_distinct_keys_coexist() {
        let now = Instant::now();
        let mut directory = HostDirectory::new();

        directory.upsert(info([192, 168, 0, 2], 8888, 0, now));
        directory.upsert(info([192, 168, 0, 2], 8889, 0, now));
        directory.upsert(info([192, 168, 0, 3], 8888, 0, now));

        assert_eq!(directory.len(), 3);
    }

    #[test]
    fn test_prune_evicts_stale_entries() {
        let stale_after = Duration::from_secs(30);
        let start = Instant::now();
        let mut directory = HostDirectory::new();

        directory.upsert(info([192, 168, 0, 2], 8888, 0, start));
        directory.upsert(info([192, 168, 0, 3], 8888, 0, start + Duration::from_secs(20)));

        directory.prune(stale_after, start + Duration::from_secs(31));
        let snapshot = directory.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].addr, IpAddr::from([192, 168, 0, 3]));
    }

    #[test]
    fn test_refresh_resets_staleness() {
        let stale_after = Duration::from_secs(30);
        let start = Instant::now();
        let mut directory = HostDirectory::new();

        directory.upsert(info([192, 168, 0, 2], 8888, 0, start));
        directory.upsert(info([192, 168, 0, 2], 8888, 1, start + Duration::from_secs(25)));

        directory.prune(stale_after, start + Duration::from_secs(40));
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn test_listener_reports_announcements() {
        let config = NetConfig {
            announce_port: 0,
            ..NetConfig::default()
        };
        let dispatcher = Arc::new(Dispatcher::new());
        let seen: Arc<Mutex<Vec<DiscoveryEvent>>> = Arc::new(Mutex::new(Vec::new()));

        let sink_seen = seen.clone();
        let listener = AnnouncementListener::bind(
            &config,
            dispatcher.clone(),
            Arc::new(move |event| sink_seen.lock().unwrap().push(event)),
        )
        .await
        .unwrap();

        let payload = AnnouncePayload {
            name: "Alpadise".into(),
            port: 8888,
            occupancy: 0,
            max_occupancy: 4,
        };
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let target = SocketAddr::new(IpAddr::from(Ipv4Addr::LOCALHOST), listener.local_addr().port());
        sender
            .send_to(Envelope::announcement(&payload).encode().as_bytes(), target)
            .await
            .unwrap();

        // Drain the dispatcher on the consuming side until the event lands.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            dispatcher.drain();
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            assert!(Instant::now() < deadline, "no discovery event before deadline");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let events = seen.lock().unwrap();
        match &events[0] {
            DiscoveryEvent::HostDiscovered(info) => {
                assert_eq!(info.name, "Alpadise");
                assert_eq!(info.port, 8888);
            }
            other => panic!("expected HostDiscovered, got {other:?}"),
        }
        assert!(matches!(&events[1], DiscoveryEvent::RosterChanged(list) if list.len() == 1));
        drop(events);

        listener.shutdown().await;
    }
}
