//! Session configuration
//!
//! All tunables are plain constructor-injected data; there is no ambient
//! global configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for hosting, joining, and discovering sessions.
///
/// Three well-known ports: the TCP session stream, the UDP port hosts
/// answer discovery queries on, and the UDP port hosts broadcast periodic
/// self-announcements on. Port 0 binds ephemerally (tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Name shown in announcements and discovery lists.
    pub server_name: String,
    /// TCP port the host accepts session streams on.
    pub session_port: u16,
    /// UDP port hosts answer active discovery probes on.
    pub query_port: u16,
    /// UDP port hosts broadcast self-announcements on.
    pub announce_port: u16,
    /// Occupancy limit; connections past this are refused.
    pub max_peers: u32,
    /// Cadence of the host's self-announcement broadcast.
    pub announce_interval: Duration,
    /// Discovered hosts not refreshed within this window are evicted.
    pub stale_after: Duration,
    /// Deadline for a joiner's connection attempt.
    pub connect_timeout: Duration,
    /// Default deadline for an active discovery probe.
    pub probe_timeout: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            server_name: "bonfire".into(),
            session_port: 8888,
            query_port: 8889,
            announce_port: 8890,
            max_peers: 4,
            announce_interval: Duration::from_secs(2),
            stale_after: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
        }
    }
}
