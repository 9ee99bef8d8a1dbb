//! Bonfire Runtime
//!
//! Minimal binary that hosts or joins a LAN session and runs the consuming
//! tick loop: the one place that owns the registry and drains the
//! dispatcher, the session events, and the registry's outbound frames.

use anyhow::Result;
use bonfire_core::dispatch::Dispatcher;
use bonfire_core::glam::Vec3;
use bonfire_core::time::{SimulationTime, TICK_DURATION};
use bonfire_net::config::NetConfig;
use bonfire_net::discovery::{self, AnnouncementListener, DiscoveryEvent};
use bonfire_net::replication::{ReplicaRegistry, SceneBridge, SceneHandle, TemplateId};
use bonfire_net::session::{HostSession, PeerEvent, PeerSession, SessionEvent};
use bonfire_net::PeerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Stand-in scene collaborator: resolves every template and logs lifecycle
/// calls. A real embedding supplies its own bridge.
#[derive(Default)]
struct LoggingScene {
    next_handle: u64,
}

impl SceneBridge for LoggingScene {
    fn resolve_template(&self, template: &str) -> Option<TemplateId> {
        Some(TemplateId(template.len() as u32))
    }

    fn instantiate(
        &mut self,
        template: TemplateId,
        position: Vec3,
        _orientation: Vec3,
    ) -> SceneHandle {
        self.next_handle += 1;
        info!(?template, %position, handle = self.next_handle, "scene instantiate");
        SceneHandle(self.next_handle)
    }

    fn destroy(&mut self, handle: SceneHandle) {
        info!(?handle, "scene destroy");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    info!("Bonfire v{}", bonfire_core::VERSION);

    let mode = std::env::args().nth(1).unwrap_or_else(|| "host".into());
    let config = NetConfig::default();
    match mode.as_str() {
        "host" => run_host(config).await,
        "join" => run_join(config).await,
        other => anyhow::bail!("unknown mode '{other}' (expected 'host' or 'join')"),
    }
}

async fn run_host(config: NetConfig) -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::new());
    let (host, mut session_events) = HostSession::open(config).await?;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let mut registry =
        ReplicaRegistry::new(PeerId::HOST, Box::<LoggingScene>::default(), outbound_tx);
    let mut time = SimulationTime::new();

    // Seed the world with one host-owned entity.
    registry.originate("Campfire", Vec3::ZERO, Vec3::ZERO, None);
    info!("{}", host.status());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(TICK_DURATION);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                dispatcher.drain();
                while let Ok(event) = session_events.try_recv() {
                    match event {
                        SessionEvent::PeerConnected(id) => {
                            info!(peer = %id, "{}", host.status());
                        }
                        SessionEvent::PeerDisconnected(id) => {
                            registry.purge_owned_by(id);
                            info!(peer = %id, "{}", host.status());
                        }
                        SessionEvent::Message { from, envelope } => {
                            registry.handle_envelope(&envelope);
                            // Fan the frame out to everyone but its origin.
                            host.broadcast_except(from, &envelope);
                        }
                    }
                }
                while let Ok(envelope) = outbound_rx.try_recv() {
                    host.broadcast(&envelope);
                }
                for event in registry.drain_events() {
                    info!(?event, tick = time.tick_count(), "registry");
                }
                time.advance_tick();
            }
        }
    }

    dispatcher.clear();
    host.shutdown().await;
    Ok(())
}

async fn run_join(config: NetConfig) -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::new());

    // Passive listener keeps a browser list warm; if its port is taken we
    // still have the active probe below.
    let listener = match AnnouncementListener::bind(
        &config,
        dispatcher.clone(),
        Arc::new(|event| {
            if let DiscoveryEvent::HostDiscovered(info) = event {
                info!(name = %info.name, addr = %info.socket_addr(), "host discovered");
            }
        }),
    )
    .await
    {
        Ok(listener) => Some(listener),
        Err(e) => {
            warn!("passive discovery unavailable, probe-only: {e}");
            None
        }
    };

    info!("probing for hosts");
    let hosts = discovery::probe(&config, config.probe_timeout).await?;
    let Some(target) = hosts.first() else {
        if let Some(listener) = listener {
            listener.shutdown().await;
        }
        anyhow::bail!("no hosts answered the probe");
    };
    info!(name = %target.name, addr = %target.socket_addr(), "joining");
    let (mut peer, mut peer_events) = PeerSession::connect(target.socket_addr(), &config).await?;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    // Built once the welcome tells us who we are.
    let mut registry: Option<ReplicaRegistry> = None;
    let mut time = SimulationTime::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(TICK_DURATION);
    let mut running = true;
    while running {
        tokio::select! {
            _ = &mut ctrl_c => running = false,
            _ = ticker.tick() => {
                dispatcher.drain();
                while let Ok(event) = peer_events.try_recv() {
                    match event {
                        PeerEvent::Connected(id) => {
                            info!("{}", peer.status());
                            let mut fresh = ReplicaRegistry::new(
                                id,
                                Box::<LoggingScene>::default(),
                                outbound_tx.clone(),
                            );
                            fresh.originate("Player", Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO, None);
                            registry = Some(fresh);
                        }
                        PeerEvent::Disconnected => {
                            warn!("host closed the session");
                            running = false;
                        }
                        PeerEvent::Message(envelope) => {
                            if let Some(registry) = registry.as_mut() {
                                registry.handle_envelope(&envelope);
                            }
                        }
                    }
                }
                while let Ok(envelope) = outbound_rx.try_recv() {
                    if let Err(e) = peer.send(&envelope) {
                        warn!("send failed: {e}");
                    }
                }
                if let Some(registry) = registry.as_mut() {
                    for event in registry.drain_events() {
                        info!(?event, tick = time.tick_count(), "registry");
                    }
                }
                time.advance_tick();
            }
        }
    }

    dispatcher.clear();
    peer.disconnect().await;
    if let Some(listener) = listener {
        listener.shutdown().await;
    }
    Ok(())
}
