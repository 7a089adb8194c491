//! The replica runtime.
//!
//! A client tick applies everything the server sent since the last tick,
//! runs deferred work and client systems, then ships queued events and UI
//! actions back to the server. Replicated state is never sent upstream.

use replica_component::Entity;
use replica_net::{ClientMessage, Consumer, NetEntity, Producer, ServerMessage};
use tracing::{debug, info, trace, warn};

use crate::config::RuntimeConfig;
use crate::deferred::DeferredQueue;
use crate::error::{ScheduleError, SyncError};
use crate::event::Origin;
use crate::schedule::{Scheduler, System, TickReport};
use crate::sync::{ClientSynchronizer, ReplicationRegistry};
use crate::ui::BoundUiClient;
use crate::world::{Outgoing, Role, World};

/// Replica world plus everything that drives it.
#[derive(Debug)]
pub struct ClientRuntime {
    world: World,
    scheduler: Scheduler,
    deferred: DeferredQueue,
    sync: ClientSynchronizer,
    ui: BoundUiClient,
    inbound: Consumer<ServerMessage>,
    outbound: Producer<ClientMessage>,
    heartbeat_ticks: u64,
    quiet_ticks: u64,
}

impl ClientRuntime {
    /// Create a runtime reading server traffic from `inbound` and writing
    /// to `outbound`.
    #[must_use]
    pub fn new(
        config: &RuntimeConfig,
        replication: ReplicationRegistry,
        inbound: Consumer<ServerMessage>,
        outbound: Producer<ClientMessage>,
    ) -> Self {
        Self {
            world: World::with_config(Role::Client, config),
            scheduler: Scheduler::new(),
            deferred: DeferredQueue::new(),
            sync: ClientSynchronizer::new(replication),
            ui: BoundUiClient::new(),
            inbound,
            outbound,
            heartbeat_ticks: config.heartbeat_ticks,
            quiet_ticks: 0,
        }
    }

    /// The replica world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// The replica world, mutably.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Entity mapping and sequence bookkeeping.
    #[must_use]
    pub fn sync(&self) -> &ClientSynchronizer {
        &self.sync
    }

    /// Latest bound-UI states.
    #[must_use]
    pub fn ui(&self) -> &BoundUiClient {
        &self.ui
    }

    /// Queue for off-thread work.
    #[must_use]
    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    /// Register a client system. Takes effect at [`ClientRuntime::start`].
    pub fn add_system(&mut self, system: impl System + 'static, priority: i32) {
        self.scheduler.register(system, priority);
    }

    /// Order and initialize the registered systems.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::start`].
    pub fn start(&mut self) -> Result<(), ScheduleError> {
        self.scheduler.start(&mut self.world)
    }

    /// Run one full tick.
    pub fn tick(&mut self, dt: f64) -> TickReport {
        for message in self.inbound.drain() {
            self.handle(message);
        }
        self.deferred.apply_ready(&mut self.world);
        let report = self.scheduler.tick(&mut self.world, dt);
        self.flush();
        self.world.advance_tick();
        report
    }

    /// Tell the server this client is leaving and shut systems down.
    pub fn shutdown(&mut self) {
        if self.outbound.push(ClientMessage::Disconnect).is_err() {
            debug!("server link already closed");
        }
        self.scheduler.shutdown(&mut self.world);
        info!(replicated = self.sync.replicated_count(), "client runtime stopped");
    }

    fn handle(&mut self, message: ServerMessage) {
        match &message {
            ServerMessage::Snapshot(_) | ServerMessage::Delta(_) | ServerMessage::ComponentRemoved { .. } => {
                match self.sync.apply(&mut self.world, &message) {
                    Ok(()) => {}
                    Err(err @ SyncError::StaleDelta { .. }) => trace!(error = %err, "stale update dropped"),
                    Err(err) => warn!(error = %err, "replication message rejected"),
                }
            }
            ServerMessage::EntityLeft { entity } => {
                if let Some(local) = self.sync.entity_left(&mut self.world, *entity) {
                    self.ui.forget_entity(local);
                }
            }
            ServerMessage::Event(payload) => {
                if let Err(err) = self.world.dispatch_network(Origin::Server, payload) {
                    warn!(kind = payload.kind.0, error = %err, "networked event rejected");
                }
            }
            ServerMessage::UiState { .. } | ServerMessage::UiClosed { .. } => {
                self.ui.receive(&mut self.world, &self.sync, &message);
            }
        }
    }

    fn flush(&mut self) {
        let mut sent = false;
        for outgoing in self.world.take_outgoing() {
            let Some(message) = self.to_wire(outgoing) else {
                continue;
            };
            sent = true;
            if self.outbound.push(message).is_err() {
                debug!("server link closed, message dropped");
            }
        }
        self.quiet_ticks = if sent { 0 } else { self.quiet_ticks + 1 };
        if self.heartbeat_ticks > 0 && self.quiet_ticks >= self.heartbeat_ticks {
            self.quiet_ticks = 0;
            if self.outbound.push(ClientMessage::Heartbeat).is_err() {
                debug!("server link closed, heartbeat dropped");
            }
        }
        // Client worlds never produce deltas or serve UIs.
        self.world.take_ui_refreshes();
    }

    fn to_wire(&self, outgoing: Outgoing) -> Option<ClientMessage> {
        let net = |entity: Entity| -> Option<NetEntity> {
            let net = self.sync.net_entity(entity);
            if net.is_none() {
                warn!(%entity, "UI action on an entity the server does not know");
            }
            net
        };
        match outgoing {
            Outgoing::Event { payload, .. } => Some(ClientMessage::Event(payload)),
            Outgoing::UiOpen { entity, key } => Some(ClientMessage::UiOpen { entity: net(entity)?, key }),
            Outgoing::UiClose { entity, key } => Some(ClientMessage::UiClose { entity: net(entity)?, key }),
            Outgoing::UiMessage { entity, key, message } => Some(ClientMessage::Ui {
                entity: net(entity)?,
                key,
                message,
            }),
        }
    }
}
