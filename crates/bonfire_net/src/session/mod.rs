//! Session lifecycles
//!
//! One host accepts many joiners over TCP; each joiner holds exactly one
//! session stream to the host. Frames are newline-delimited envelopes.
//! Both sides deliver decoded traffic to the consuming thread through
//! unbounded event channels drained once per tick.

pub mod host;
pub mod peer;

pub use host::HostSession;
pub use peer::PeerSession;

use crate::protocol::Envelope;
use crate::PeerId;

/// Events the host session raises toward the consuming thread.
#[derive(Debug)]
pub enum SessionEvent {
    PeerConnected(PeerId),
    /// The registry purges the departing peer's records on this.
    PeerDisconnected(PeerId),
    /// Inbound frame, re-tagged with the id bound to the stream it arrived
    /// on; the stream, not the payload, is the identity authority.
    Message { from: PeerId, envelope: Envelope },
}

/// Events a joined peer session raises.
#[derive(Debug)]
pub enum PeerEvent {
    /// Welcome received; carries the identifier the host assigned to us.
    Connected(PeerId),
    Disconnected,
    Message(Envelope),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::protocol::{Envelope, MessageKind, SpawnPayload};
    use crate::{NetId, PeerId};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    fn test_config() -> NetConfig {
        NetConfig {
            server_name: "Alpadise".into(),
            // Ephemeral everywhere so parallel tests never collide.
            session_port: 0,
            query_port: 0,
            announce_port: 0,
            ..NetConfig::default()
        }
    }

    async fn next_event<T>(rx: &mut UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no event before deadline")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_join_assigns_monotonic_ids_from_one() {
        let (host, mut host_events) = HostSession::open(test_config()).await.unwrap();
        let addr = SocketAddr::new(IpAddr::from(Ipv4Addr::LOCALHOST), host.local_addr().port());

        let (_peer_a, mut events_a) = PeerSession::connect(addr, &test_config()).await.unwrap();
        let (_peer_b, mut events_b) = PeerSession::connect(addr, &test_config()).await.unwrap();

        assert!(matches!(
            next_event(&mut events_a).await,
            PeerEvent::Connected(PeerId(1))
        ));
        assert!(matches!(
            next_event(&mut events_b).await,
            PeerEvent::Connected(PeerId(2))
        ));

        let mut connected = Vec::new();
        for _ in 0..2 {
            match next_event(&mut host_events).await {
                SessionEvent::PeerConnected(id) => connected.push(id),
                other => panic!("expected PeerConnected, got {other:?}"),
            }
        }
        connected.sort();
        assert_eq!(connected, vec![PeerId(1), PeerId(2)]);
        assert_eq!(host.occupancy(), 2);

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_frames_are_retagged_with_stream_id() {
        let (host, mut host_events) = HostSession::open(test_config()).await.unwrap();
        let addr = SocketAddr::new(IpAddr::from(Ipv4Addr::LOCALHOST), host.local_addr().port());

        let (peer, mut peer_events) = PeerSession::connect(addr, &test_config()).await.unwrap();
        assert!(matches!(
            next_event(&mut peer_events).await,
            PeerEvent::Connected(PeerId(1))
        ));
        match next_event(&mut host_events).await {
            SessionEvent::PeerConnected(PeerId(1)) => {}
            other => panic!("expected PeerConnected, got {other:?}"),
        }

        // Claim to be peer 99; the host must re-tag with the stream's id.
        let payload = SpawnPayload {
            id: NetId(1),
            template: "Player".into(),
            owner: PeerId(99),
            position: [0.0, 1.0, 0.0],
            orientation: [0.0; 3],
        };
        peer.send(&Envelope::spawn(PeerId(99), &payload)).unwrap();

        match next_event(&mut host_events).await {
            SessionEvent::Message { from, envelope } => {
                assert_eq!(from, PeerId(1));
                assert_eq!(envelope.sender, PeerId(1));
                assert_eq!(envelope.kind, MessageKind::EntitySpawn);
            }
            other => panic!("expected Message, got {other:?}"),
        }

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_peer_and_disconnect_is_reported() {
        let (host, mut host_events) = HostSession::open(test_config()).await.unwrap();
        let addr = SocketAddr::new(IpAddr::from(Ipv4Addr::LOCALHOST), host.local_addr().port());

        let (mut peer, mut peer_events) = PeerSession::connect(addr, &test_config()).await.unwrap();
        assert!(matches!(
            next_event(&mut peer_events).await,
            PeerEvent::Connected(_)
        ));
        match next_event(&mut host_events).await {
            SessionEvent::PeerConnected(_) => {}
            other => panic!("expected PeerConnected, got {other:?}"),
        }

        host.broadcast(&Envelope::destroy(PeerId::HOST, NetId(5)));
        match next_event(&mut peer_events).await {
            PeerEvent::Message(envelope) => {
                assert_eq!(envelope.kind, MessageKind::EntityDestroy);
                assert_eq!(envelope.entity_id().unwrap(), NetId(5));
            }
            other => panic!("expected Message, got {other:?}"),
        }

        peer.disconnect().await;
        match next_event(&mut host_events).await {
            SessionEvent::PeerDisconnected(PeerId(1)) => {}
            other => panic!("expected PeerDisconnected, got {other:?}"),
        }
        assert_eq!(host.occupancy(), 0);

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (host, _host_events) = HostSession::open(test_config()).await.unwrap();
        let addr = SocketAddr::new(IpAddr::from(Ipv4Addr::LOCALHOST), host.local_addr().port());

        let (mut peer, mut peer_events) = PeerSession::connect(addr, &test_config()).await.unwrap();
        assert!(matches!(
            next_event(&mut peer_events).await,
            PeerEvent::Connected(_)
        ));

        peer.disconnect().await;
        peer.disconnect().await; // no-op
        assert!(!peer.is_connected());
        assert!(peer
            .send(&Envelope::destroy(PeerId(1), NetId(1)))
            .is_err());

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_to_dead_port_fails_without_panicking() {
        // Bind-then-drop to get a port nothing is listening on.
        let probe = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let config = NetConfig {
            connect_timeout: Duration::from_millis(500),
            ..test_config()
        };
        assert!(PeerSession::connect(addr, &config).await.is_err());
    }
}
