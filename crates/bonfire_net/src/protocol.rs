//! Wire protocol: tagged message envelope and kind-specific payloads
//!
//! One envelope per line on the session stream, one per datagram on the
//! discovery sockets. The encoding is flat, versionless, self-describing
//! JSON. Every frame decodes independently; a decode failure drops that
//! frame and nothing else.

use crate::{NetId, PeerId};
use serde::{Deserialize, Serialize};

/// Message kinds carried by an [`Envelope`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Host self-announcement (UDP) and probe reply.
    HostAnnouncement,
    /// First frame the host writes on a freshly accepted session stream;
    /// carries the assigned peer id.
    Welcome,
    EntitySpawn,
    EntityUpdate,
    EntityDestroy,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("malformed {kind:?} payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed entity id in destroy payload: {0}")]
    EntityId(#[from] std::num::ParseIntError),
}

/// The wire envelope. Created by the sender, consumed once by the
/// receiver, never mutated after send (the host's re-tagging of `sender`
/// happens on its own received copy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: MessageKind,
    /// Originating participant; `PeerId::HOST` for host-originated or
    /// unattributed traffic.
    pub sender: PeerId,
    /// Kind-specific payload text.
    pub payload: String,
}

/// `HostAnnouncement` payload. The announcing host's address comes from
/// the transport, not the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub name: String,
    /// TCP session port to connect to.
    pub port: u16,
    pub occupancy: u32,
    pub max_occupancy: u32,
}

/// `Welcome` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomePayload {
    /// The identifier the host assigned to the receiving peer.
    pub peer_id: PeerId,
    pub server_name: String,
}

/// `EntitySpawn` / `EntityUpdate` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPayload {
    pub id: NetId,
    /// Object-type tag resolved to a template by the scene collaborator.
    pub template: String,
    /// Owning participant; `PeerId::HOST` for host-owned entities.
    pub owner: PeerId,
    pub position: [f32; 3],
    pub orientation: [f32; 3],
}

impl Envelope {
    pub fn announcement(payload: &AnnouncePayload) -> Self {
        Self::with_json(MessageKind::HostAnnouncement, PeerId::HOST, payload)
    }

    pub fn welcome(payload: &WelcomePayload) -> Self {
        Self::with_json(MessageKind::Welcome, PeerId::HOST, payload)
    }

    pub fn spawn(sender: PeerId, payload: &SpawnPayload) -> Self {
        Self::with_json(MessageKind::EntitySpawn, sender, payload)
    }

    pub fn update(sender: PeerId, payload: &SpawnPayload) -> Self {
        Self::with_json(MessageKind::EntityUpdate, sender, payload)
    }

    /// Destroy carries the bare entity id as text.
    pub fn destroy(sender: PeerId, id: NetId) -> Self {
        Self {
            kind: MessageKind::EntityDestroy,
            sender,
            payload: id.0.to_string(),
        }
    }

    fn with_json<T: Serialize>(kind: MessageKind, sender: PeerId, payload: &T) -> Self {
        Self {
            kind,
            sender,
            // Payload structs are plain strings and integers; this cannot fail.
            payload: serde_json::to_string(payload).expect("payload is always serializable"),
        }
    }

    /// Serialize to a single line of text (no trailing newline; stream
    /// writers add the frame delimiter).
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("envelope is always serializable")
    }

    /// Decode one frame. Fails with [`CodecError`] on malformed or
    /// truncated input; callers drop the frame and continue.
    pub fn decode(line: &str) -> Result<Self, CodecError> {
        serde_json::from_str(line.trim()).map_err(CodecError::Envelope)
    }

    pub fn announce_payload(&self) -> Result<AnnouncePayload, CodecError> {
        self.json_payload()
    }

    pub fn welcome_payload(&self) -> Result<WelcomePayload, CodecError> {
        self.json_payload()
    }

    pub fn spawn_payload(&self) -> Result<SpawnPayload, CodecError> {
        self.json_payload()
    }

    /// Entity id from an `EntityDestroy` payload.
    pub fn entity_id(&self) -> Result<NetId, CodecError> {
        Ok(NetId(self.payload.trim().parse()?))
    }

    fn json_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, CodecError> {
        serde_json::from_str(&self.payload).map_err(|source| CodecError::Payload {
            kind: self.kind,
            source,
        })
    }
}
