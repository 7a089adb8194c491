//! The authoritative runtime.
//!
//! One [`ServerRuntime::tick`] performs, in order:
//!
//! 1. Drain inbound session traffic (connects, events, UI input, disconnects).
//! 2. Apply finished deferred work.
//! 3. Update every system.
//! 4. Flush replication, networked events and bound-UI state to the
//!    session outboxes. UIs whose host left a viewer's view are closed.
//! 5. Advance the tick counter.

use replica_net::{ClientMessage, Inbound, InboundKind, InboundReceiver, ServerMessage, SessionId};
use tracing::{debug, info, trace, warn};

use crate::config::RuntimeConfig;
use crate::deferred::DeferredQueue;
use crate::error::ScheduleError;
use crate::event::{Origin, SessionConnected, SessionDisconnected};
use crate::schedule::{Scheduler, System, TickReport};
use crate::session::SessionRegistry;
use crate::sync::{ReplicationRegistry, ServerSynchronizer};
use crate::ui::BoundUiServer;
use crate::world::{Outgoing, Role, World};

/// Server world plus everything that drives it.
#[derive(Debug)]
pub struct ServerRuntime {
    world: World,
    scheduler: Scheduler,
    deferred: DeferredQueue,
    sessions: SessionRegistry,
    sync: ServerSynchronizer,
    ui: BoundUiServer,
    inbound: InboundReceiver,
}

impl ServerRuntime {
    /// Create a runtime fed by `inbound`.
    #[must_use]
    pub fn new(config: &RuntimeConfig, replication: ReplicationRegistry, inbound: InboundReceiver) -> Self {
        Self {
            world: World::with_config(Role::Server, config),
            scheduler: Scheduler::new(),
            deferred: DeferredQueue::new(),
            sessions: SessionRegistry::new(),
            sync: ServerSynchronizer::new(replication, config.interest_range),
            ui: BoundUiServer::new(),
            inbound,
        }
    }

    /// The world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// The world, mutably.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Connected sessions.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Connected sessions, mutably (for visibility overrides).
    pub fn sessions_mut(&mut self) -> &mut SessionRegistry {
        &mut self.sessions
    }

    /// Bound-UI registrations.
    pub fn ui_mut(&mut self) -> &mut BoundUiServer {
        &mut self.ui
    }

    /// Queue for off-thread work.
    #[must_use]
    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    /// Register a system. Takes effect at [`ServerRuntime::start`].
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
        let tick = self.world.tick();
        trace!(tick, "server tick start");

        for item in self.inbound.drain() {
            self.handle_inbound(item);
        }
        let applied = self.deferred.apply_ready(&mut self.world);
        if applied > 0 {
            trace!(tick, applied, "deferred results applied");
        }

        let report = self.scheduler.tick(&mut self.world, dt);

        self.flush();
        self.world.advance_tick();
        report
    }

    /// Shut systems down in reverse order.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown(&mut self.world);
        info!(tick = self.world.tick(), sessions = self.sessions.len(), "server runtime stopped");
    }

    fn handle_inbound(&mut self, item: Inbound) {
        let session = item.session;
        match item.kind {
            InboundKind::Connected(outbox) => {
                self.sessions.connect(session, outbox);
                info!(%session, "session connected");
                self.world.raise_broadcast(&mut SessionConnected { session });
            }
            InboundKind::Message(ClientMessage::Disconnect) | InboundKind::Disconnected => {
                self.disconnect(session);
            }
            InboundKind::Message(message) => {
                if self.sessions.get(session).is_none() {
                    warn!(%session, "message from unknown session dropped");
                    return;
                }
                self.handle_message(session, message);
            }
        }
    }

    fn handle_message(&mut self, session: SessionId, message: ClientMessage) {
        match message {
            ClientMessage::Event(payload) => {
                if let Err(err) = self.world.dispatch_network(Origin::Session(session), &payload) {
                    warn!(%session, kind = payload.kind.0, error = %err, "networked event rejected");
                }
            }
            ui_message @ (ClientMessage::UiOpen { .. } | ClientMessage::UiClose { .. } | ClientMessage::Ui { .. }) => {
                if let Err(err) = self.ui.handle(&mut self.world, &self.sessions, session, ui_message) {
                    warn!(%session, error = %err, "UI message rejected");
                }
            }
            ClientMessage::Disconnect => self.disconnect(session),
            ClientMessage::Heartbeat => trace!(%session, "heartbeat"),
        }
    }

    fn disconnect(&mut self, session: SessionId) {
        if self.sessions.disconnect(session).is_none() {
            return;
        }
        self.ui.close_session(&mut self.world, session);
        info!(%session, "session disconnected");
        self.world.raise_broadcast(&mut SessionDisconnected { session });
    }

    /// Replication goes first so that events and UI state never name an
    /// entity the client has not been told about yet.
    fn flush(&mut self) {
        let mut out: Vec<(SessionId, ServerMessage)> = self.sync.collect(&mut self.world, &mut self.sessions);
        out.extend(self.ui.close_unseen(&mut self.world, &self.sessions));

        for outgoing in self.world.take_outgoing() {
            match outgoing {
                Outgoing::Event { filter, payload } => {
                    for session in self.sessions.resolve(&self.world, &filter) {
                        out.push((session, ServerMessage::Event(payload.clone())));
                    }
                }
                Outgoing::UiClose { entity, key } => {
                    out.extend(self.ui.close_all(&mut self.world, entity, key));
                }
                Outgoing::UiOpen { .. } | Outgoing::UiMessage { .. } => {
                    debug!("client-only UI action queued on server ignored");
                }
            }
        }
        out.extend(self.ui.flush(&mut self.world));

        let count = out.len();
        for (session, message) in out {
            self.sessions.send(session, message);
        }
        trace!(tick = self.world.tick(), messages = count, "server flush");
    }
}
