//! Entity replication registry
//!
//! The authoritative per-process map of replicated entities: applies
//! spawn/update/destroy traffic, enforces ownership, and emits outbound
//! frames for locally originated changes. The registry knows identifiers
//! and ownership only; sockets live in the session layer and the scene
//! graph sits behind [`SceneBridge`].
//!
//! Every apply-operation is safe under reordering and duplication: spawn
//! is idempotent, an update for an unseen id falls back to spawn, destroy
//! for an unknown id is a no-op. The transport only guarantees
//! per-connection ordering, and host relays interleave across peers.

use crate::protocol::{Envelope, MessageKind, SpawnPayload};
use crate::{NetId, PeerId};
use bonfire_core::glam::Vec3;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Resolved scene template, opaque to the registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TemplateId(pub u32);

/// Instantiated scene object, opaque to the registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SceneHandle(pub u64);

/// Narrow interface to the scene collaborator.
pub trait SceneBridge {
    fn resolve_template(&self, template: &str) -> Option<TemplateId>;
    fn instantiate(&mut self, template: TemplateId, position: Vec3, orientation: Vec3)
        -> SceneHandle;
    fn destroy(&mut self, handle: SceneHandle);
}

/// Replicated entity state.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub id: NetId,
    pub template: String,
    /// Owning participant; `PeerId::HOST` for host-owned entities.
    pub owner: PeerId,
    pub position: Vec3,
    pub orientation: Vec3,
    /// True iff this participant is the authority for the record. Exactly
    /// one participant per record holds this.
    pub locally_owned: bool,
    /// None when the template could not be resolved; the record still
    /// exists so later traffic for the id stays idempotent.
    pub handle: Option<SceneHandle>,
}

/// Lifecycle events for the UI layer, drained pull-style on the consuming
/// thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Spawned(NetId),
    Destroyed(NetId),
}

/// Authoritative mapping of network identifiers to entity records.
pub struct ReplicaRegistry {
    local_id: PeerId,
    records: HashMap<NetId, EntityRecord>,
    next_serial: u64,
    scene: Box<dyn SceneBridge>,
    outbound: UnboundedSender<Envelope>,
    events: Vec<RegistryEvent>,
}

impl ReplicaRegistry {
    /// `local_id` is this participant's session identifier (0 when
    /// hosting; joiners construct the registry after the welcome frame).
    /// Outbound frames go to `outbound`; the session layer routes them to
    /// the authority (broadcast when hosting, to-host when joining).
    pub fn new(
        local_id: PeerId,
        scene: Box<dyn SceneBridge>,
        outbound: UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            local_id,
            records: HashMap::new(),
            next_serial: 0,
            scene,
            outbound,
            events: Vec::new(),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn get(&self, id: NetId) -> Option<&EntityRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drain pending lifecycle events. Called by the UI layer once per
    /// tick on the consuming thread.
    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Create a new replicated entity owned here (unless overridden) and
    /// emit the outbound spawn frame.
    pub fn originate(
        &mut self,
        template: &str,
        position: Vec3,
        orientation: Vec3,
        owner_override: Option<PeerId>,
    ) -> NetId {
        let id = self.alloc_id();
        let payload = SpawnPayload {
            id,
            template: template.to_owned(),
            owner: owner_override.unwrap_or(self.local_id),
            position: position.to_array(),
            orientation: orientation.to_array(),
        };
        self.insert_record(&payload);
        self.send_out(Envelope::spawn(self.local_id, &payload));
        id
    }

    /// Apply a received spawn. A duplicate id is treated as an update, so
    /// replayed spawns are harmless.
    pub fn apply_spawn(&mut self, data: SpawnPayload) {
        if self.records.contains_key(&data.id) {
            debug!(id = %data.id, "duplicate spawn treated as update");
            self.apply_update(data);
            return;
        }
        self.insert_record(&data);
    }

    /// Apply a received update. An unknown id is a late spawn, never an
    /// error; the owning side discards inbound echoes of its own records.
    pub fn apply_update(&mut self, data: SpawnPayload) {
        match self.records.get_mut(&data.id) {
            None => {
                debug!(id = %data.id, "update for unseen entity, treating as spawn");
                self.apply_spawn(data);
            }
            Some(record) if record.locally_owned => {
                // We are the source of truth for this record.
                debug!(id = %data.id, "discarding inbound update for locally owned entity");
            }
            Some(record) => {
                record.position = Vec3::from_array(data.position);
                record.orientation = Vec3::from_array(data.orientation);
            }
        }
    }

    /// Apply a received destroy. Unknown ids are a silent no-op.
    pub fn apply_destroy(&mut self, id: NetId) {
        if let Some(record) = self.records.remove(&id) {
            if let Some(handle) = record.handle {
                self.scene.destroy(handle);
            }
            self.events.push(RegistryEvent::Destroyed(id));
        }
    }

    /// Remove all and only the records owned by a departing peer. The host
    /// invokes this on every peer disconnect.
    pub fn purge_owned_by(&mut self, owner: PeerId) {
        let ids: Vec<NetId> = self
            .records
            .values()
            .filter(|record| record.owner == owner)
            .map(|record| record.id)
            .collect();
        for id in ids {
            self.apply_destroy(id);
        }
    }

    /// Owner-side move: update the record and emit the outbound update
    /// frame. Returns false (and sends nothing) for unknown or
    /// remote-owned ids.
    pub fn push_transform(&mut self, id: NetId, position: Vec3, orientation: Vec3) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        if !record.locally_owned {
            warn!(%id, "refusing to push transform for remote-owned entity");
            return false;
        }
        record.position = position;
        record.orientation = orientation;
        let payload = SpawnPayload {
            id,
            template: record.template.clone(),
            owner: record.owner,
            position: position.to_array(),
            orientation: orientation.to_array(),
        };
        self.send_out(Envelope::update(self.local_id, &payload));
        true
    }

    /// Locally originated destroy: remove the record and emit the outbound
    /// destroy frame. Returns false for unknown ids.
    pub fn retire(&mut self, id: NetId) -> bool {
        if !self.records.contains_key(&id) {
            return false;
        }
        self.apply_destroy(id);
        self.send_out(Envelope::destroy(self.local_id, id));
        true
    }

    /// Kind-dispatch a received envelope into the apply-operations.
    /// Malformed payloads drop the frame, nothing more.
    pub fn handle_envelope(&mut self, envelope: &Envelope) {
        match envelope.kind {
            MessageKind::EntitySpawn => match envelope.spawn_payload() {
                Ok(payload) => self.apply_spawn(payload),
                Err(e) => warn!("dropping spawn frame: {e}"),
            },
            MessageKind::EntityUpdate => match envelope.spawn_payload() {
                Ok(payload) => self.apply_update(payload),
                Err(e) => warn!("dropping update frame: {e}"),
            },
            MessageKind::EntityDestroy => match envelope.entity_id() {
                Ok(id) => self.apply_destroy(id),
                Err(e) => warn!("dropping destroy frame: {e}"),
            },
            MessageKind::HostAnnouncement | MessageKind::Welcome => {
                debug!(kind = ?envelope.kind, "ignoring non-entity frame");
            }
        }
    }

    // Partitioned allocation: originator id in the high half, serial in
    // the low half. Concurrent origination on both sides cannot collide.
    fn alloc_id(&mut self) -> NetId {
        self.next_serial += 1;
        NetId((self.local_id.0 << 32) | self.next_serial)
    }

    fn insert_record(&mut self, data: &SpawnPayload) {
        let position = Vec3::from_array(data.position);
        let orientation = Vec3::from_array(data.orientation);
        let handle = match self.scene.resolve_template(&data.template) {
            Some(template) => Some(self.scene.instantiate(template, position, orientation)),
            None => {
                warn!(template = %data.template, id = %data.id, "unknown template, record kept without scene object");
                None
            }
        };
        self.records.insert(
            data.id,
            EntityRecord {
                id: data.id,
                template: data.template.clone(),
                owner: data.owner,
                position,
                orientation,
                locally_owned: data.owner == self.local_id,
                handle,
            },
        );
        self.events.push(RegistryEvent::Spawned(data.id));
    }

    fn send_out(&self, envelope: Envelope) {
        if self.outbound.send(envelope).is_err() {
            warn!("outbound channel closed, frame dropped");
        }
    }
}
