//! Error types for the runtime layer.

use replica_component::{ComponentTypeId, EcsError, Entity, StateError};
use replica_net::{MessageTypeId, NetEntity, NetError, SessionId, UiKey};

/// Errors raised while applying replicated state on a client.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The update is not newer than what was already applied.
    #[error("stale update for {entity} component {component}: sequence {sequence} <= {last_applied}")]
    StaleDelta {
        /// Entity the update targets.
        entity: NetEntity,
        /// Component the update targets.
        component: ComponentTypeId,
        /// Sequence carried by the update.
        sequence: u64,
        /// Highest sequence already applied.
        last_applied: u64,
    },

    /// No replicated type is registered under this id.
    #[error("component {0} is not registered for replication")]
    UnknownComponent(ComponentTypeId),

    /// Field state could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),

    /// The world rejected the operation.
    #[error(transparent)]
    Ecs(#[from] EcsError),
}

/// Errors raised while ordering or initialising systems.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// Ordering constraints form a cycle through these systems.
    #[error("system ordering cycle between: {}", systems.join(", "))]
    DependencyCycle {
        /// Names of the systems left unordered.
        systems: Vec<String>,
    },

    /// A system names an ordering dependency that was never registered.
    #[error("system '{system}' depends on unknown system '{dependency}'")]
    UnknownDependency {
        /// The declaring system.
        system: String,
        /// The missing name.
        dependency: String,
    },

    /// Two systems were registered under one name.
    #[error("system '{0}' registered twice")]
    DuplicateSystem(String),
}

/// Reasons a bound-UI message from a client is rejected.
#[derive(Debug, thiserror::Error)]
pub enum UiError {
    /// The hosting entity does not exist.
    #[error("no entity {0} hosts a UI")]
    NoSuchEntity(NetEntity),

    /// No UI is registered under this key.
    #[error("unknown UI '{0}'")]
    UnknownUi(UiKey),

    /// The hosting entity is not replicated to the session.
    #[error("{entity} is not visible to session {session}")]
    NotVisible {
        /// Sending session.
        session: SessionId,
        /// Hosting entity.
        entity: Entity,
    },

    /// The session has not opened this UI.
    #[error("session {session} has not opened '{key}' on {entity}")]
    NotOpen {
        /// Sending session.
        session: SessionId,
        /// Hosting entity.
        entity: Entity,
        /// UI key.
        key: UiKey,
    },

    /// The message type was never registered.
    #[error("unregistered UI message type {0:?}")]
    UnknownMessage(MessageTypeId),

    /// The payload did not decode.
    #[error(transparent)]
    Net(#[from] NetError),
}
