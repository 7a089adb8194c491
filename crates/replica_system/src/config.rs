//! Runtime configuration shared by the server and client runtimes.

use replica_component::DEFAULT_GRACE_TICKS;

/// Default client heartbeat interval, one second at 60 ticks per second.
pub const DEFAULT_HEARTBEAT_TICKS: u64 = 60;

/// Tunables for a [`ServerRuntime`](crate::ServerRuntime) or
/// [`ClientRuntime`](crate::ClientRuntime).
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Ticks a deleted entity id stays parked before it can be reused.
    pub entity_grace_ticks: u64,
    /// Radius around a session's attached entity inside which entities
    /// replicate. `None` replicates everything to everyone.
    pub interest_range: Option<f32>,
    /// Quiet client ticks after which a client sends a heartbeat so the
    /// server does not time the session out. 0 disables heartbeats.
    pub heartbeat_ticks: u64,
}

impl RuntimeConfig {
    /// Create a config with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the entity id grace period.
    #[must_use]
    pub fn with_entity_grace_ticks(mut self, ticks: u64) -> Self {
        self.entity_grace_ticks = ticks;
        self
    }

    /// Override the client heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_ticks(mut self, ticks: u64) -> Self {
        self.heartbeat_ticks = ticks;
        self
    }

    /// Limit replication to entities within `range` of a session's
    /// attached entity.
    #[must_use]
    pub fn with_interest_range(mut self, range: f32) -> Self {
        self.interest_range = Some(range);
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            entity_grace_ticks: DEFAULT_GRACE_TICKS,
            interest_range: None,
            heartbeat_ticks: DEFAULT_HEARTBEAT_TICKS,
        }
    }
}
