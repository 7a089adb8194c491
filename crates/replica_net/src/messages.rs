//! Message types exchanged between server and clients.
//!
//! All message types derive `Serialize` and `Deserialize` for MessagePack
//! transport. A session has exactly one ordered channel in each direction;
//! [`ServerMessage`] flows server → client and [`ClientMessage`] flows
//! client → server.

use replica_component::{ComponentTypeId, Entity, FieldMap};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identities ──────────────────────────────────────────────────────────────

/// Identifies one connected client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Mint a fresh random session id.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// An entity as named on the wire: the server's entity id.
///
/// Clients map each `NetEntity` to an entity in their own world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetEntity(pub u64);

impl From<Entity> for NetEntity {
    fn from(entity: Entity) -> Self {
        Self(entity.id())
    }
}

impl std::fmt::Display for NetEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NetEntity({})", self.0)
    }
}

/// Names one bound user interface on an entity (an entity may host several).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UiKey(pub String);

impl UiKey {
    /// Create a UI key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl std::fmt::Display for UiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of a [`NetMessage`] type, FNV-1a of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageTypeId(pub u64);

impl MessageTypeId {
    /// Hash a message name into its type id.
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        Self(ComponentTypeId::from_name(name).0)
    }
}

/// A payload type that can cross the network: networked events, bound-UI
/// messages and bound-UI states.
pub trait NetMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name shared by both peers.
    fn message_name() -> &'static str;

    /// Type tag carried next to the encoded payload.
    fn message_type_id() -> MessageTypeId {
        MessageTypeId::from_name(Self::message_name())
    }
}

/// An encoded [`NetMessage`] tagged with its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedPayload {
    /// Which message type `bytes` decodes to.
    pub kind: MessageTypeId,
    /// MessagePack-encoded message.
    pub bytes: Vec<u8>,
}

// ── Replication ─────────────────────────────────────────────────────────────

/// The networked fields of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    /// Which component the fields belong to.
    pub component: ComponentTypeId,
    /// Field values keyed by field name.
    pub fields: FieldMap,
}

/// Full state of an entity entering a client's view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// The entity being described.
    pub entity: NetEntity,
    /// Server tick the snapshot was taken on.
    pub sequence: u64,
    /// Every networked component on the entity.
    pub components: Vec<ComponentState>,
}

/// Changed networked fields of one component since the last delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDelta {
    /// The owning entity.
    pub entity: NetEntity,
    /// The component that changed.
    pub component: ComponentTypeId,
    /// Server tick the delta was computed on. Strictly increasing per
    /// (entity, component).
    pub sequence: u64,
    /// Only the fields that changed.
    pub fields: FieldMap,
}

// ── Envelopes ───────────────────────────────────────────────────────────────

/// Everything the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// An entity entered the client's view.
    Snapshot(EntitySnapshot),
    /// A networked component changed.
    Delta(ComponentDelta),
    /// A networked component was removed from an entity.
    ComponentRemoved {
        /// The owning entity.
        entity: NetEntity,
        /// The removed component.
        component: ComponentTypeId,
        /// Server tick of the removal.
        sequence: u64,
    },
    /// An entity left the client's view or was deleted.
    EntityLeft {
        /// The entity to discard.
        entity: NetEntity,
    },
    /// A networked event.
    Event(TypedPayload),
    /// New state for a bound user interface.
    UiState {
        /// Entity hosting the interface.
        entity: NetEntity,
        /// Which interface on that entity.
        key: UiKey,
        /// Encoded state object.
        state: TypedPayload,
    },
    /// The server closed a bound user interface.
    UiClosed {
        /// Entity hosting the interface.
        entity: NetEntity,
        /// Which interface on that entity.
        key: UiKey,
    },
}

/// Everything a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// A networked event.
    Event(TypedPayload),
    /// The client opened a bound user interface.
    UiOpen {
        /// Entity hosting the interface.
        entity: NetEntity,
        /// Which interface on that entity.
        key: UiKey,
    },
    /// The client closed a bound user interface.
    UiClose {
        /// Entity hosting the interface.
        entity: NetEntity,
        /// Which interface on that entity.
        key: UiKey,
    },
    /// A message for the server-side controller of a bound interface.
    Ui {
        /// Entity hosting the interface.
        entity: NetEntity,
        /// Which interface on that entity.
        key: UiKey,
        /// Encoded UI message.
        message: TypedPayload,
    },
    /// The client is leaving.
    Disconnect,
    /// Keeps an otherwise quiet session from timing out.
    Heartbeat,
}
