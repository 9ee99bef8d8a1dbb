//! Bonfire Network Layer
//!
//! LAN session hosting: hosts self-announce over UDP broadcast, joiners
//! discover and connect over TCP, and a replication registry keeps
//! dynamically created entities in sync across all participants.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod replication;
pub mod session;

/// Network protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Session participant ID
///
/// The host assigns joiner IDs monotonically from 1 and never reuses them
/// within a process lifetime. 0 is the host itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    pub const HOST: PeerId = PeerId(0);

    pub fn is_host(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer{}", self.0)
    }
}

/// Replicated entity ID (unique across the session)
///
/// Allocated from a per-participant partition: the originator's peer ID in
/// the high half, a local monotonic serial in the low half. Both sides of
/// the session can originate entities concurrently without colliding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetId(pub u64);

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net:{}", self.0)
    }
}
