//! Connected sessions on the server.
//!
//! Each session owns the producing half of its outbox and the set of
//! entities currently replicated to it. A session is *attached* to the
//! entity carrying an [`Actor`] component that names it; that entity anchors
//! range-limited interest and [`RecipientFilter::InRange`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use replica_component::{Component, Entity};
use replica_math::Transform;
use replica_net::{Producer, RecipientFilter, ServerMessage, SessionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::world::World;

/// Marks the entity a session controls. Server-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// The controlling session.
    pub session: SessionId,
}

impl Component for Actor {
    fn type_name() -> &'static str {
        "Actor"
    }
}

/// Map every session with an [`Actor`] to its entity.
#[must_use]
pub fn attached_entities(world: &World) -> HashMap<SessionId, Entity> {
    world
        .query::<(Actor,)>()
        .map(|(entity, (actor,))| (actor.session, entity))
        .collect()
}

/// One connected client.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    outbox: Producer<ServerMessage>,
    /// Entities replicated to this session.
    pub(crate) view: BTreeSet<Entity>,
    pinned: BTreeSet<Entity>,
    hidden: BTreeSet<Entity>,
}

impl Session {
    /// The session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Entities currently replicated to this session.
    #[must_use]
    pub fn view(&self) -> &BTreeSet<Entity> {
        &self.view
    }

    /// Returns `true` if `entity` is replicated to this session.
    #[must_use]
    pub fn sees(&self, entity: Entity) -> bool {
        self.view.contains(&entity)
    }

    /// Entities replicated regardless of range.
    #[must_use]
    pub fn pinned(&self) -> &BTreeSet<Entity> {
        &self.pinned
    }

    /// Entities never replicated to this session.
    #[must_use]
    pub fn hidden(&self) -> &BTreeSet<Entity> {
        &self.hidden
    }

    /// Drop every trace of a deleted entity. Returns `true` if it was in
    /// view.
    pub(crate) fn forget(&mut self, entity: Entity) -> bool {
        self.pinned.remove(&entity);
        self.hidden.remove(&entity);
        self.view.remove(&entity)
    }

    /// Enqueue a message. A closed outbox is logged, not fatal: the
    /// disconnect arrives through the inbound queue.
    pub fn send(&self, message: ServerMessage) {
        if let Err(err) = self.outbox.push(message) {
            debug!(session = %self.id, error = %err, "outbox closed, message dropped");
        }
    }
}

/// Every connected session, in a stable order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. A reconnect under the same id replaces the
    /// old outbox and starts from an empty view.
    pub fn connect(&mut self, id: SessionId, outbox: Producer<ServerMessage>) {
        let previous = self.sessions.insert(
            id,
            Session {
                id,
                outbox,
                view: BTreeSet::new(),
                pinned: BTreeSet::new(),
                hidden: BTreeSet::new(),
            },
        );
        if previous.is_some() {
            warn!(session = %id, "session reconnected, replacing outbox");
        }
    }

    /// Forget a session. Returns it if it was connected.
    pub fn disconnect(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Number of connected sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Connected session ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.keys().copied()
    }

    /// Every session.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Always replicate `entity` to `id`, ignoring range.
    pub fn pin(&mut self, id: SessionId, entity: Entity) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.hidden.remove(&entity);
            session.pinned.insert(entity);
        }
    }

    /// Never replicate `entity` to `id`.
    pub fn hide(&mut self, id: SessionId, entity: Entity) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.pinned.remove(&entity);
            session.hidden.insert(entity);
        }
    }

    /// Undo [`SessionRegistry::pin`] or [`SessionRegistry::hide`].
    pub fn reset_visibility(&mut self, id: SessionId, entity: Entity) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.pinned.remove(&entity);
            session.hidden.remove(&entity);
        }
    }

    /// Send to one session. Returns `false` if it is not connected.
    pub fn send(&self, id: SessionId, message: ServerMessage) -> bool {
        let Some(session) = self.sessions.get(&id) else {
            debug!(session = %id, "message for unknown session dropped");
            return false;
        };
        session.send(message);
        true
    }

    /// Resolve a recipient filter against the connected sessions.
    ///
    /// [`RecipientFilter::InRange`] admits sessions whose attached entity
    /// lies within range of the origin's [`Transform`]; if the origin has no
    /// transform nobody is in range.
    #[must_use]
    pub fn resolve(&self, world: &World, filter: &RecipientFilter) -> Vec<SessionId> {
        let candidates = self.ids().filter(|id| filter.admits(*id));
        let RecipientFilter::InRange { origin, range } = filter else {
            return candidates.collect();
        };
        let Some(origin) = world.get::<Transform>(*origin) else {
            return Vec::new();
        };
        let attached = attached_entities(world);
        candidates
            .filter(|id| {
                attached
                    .get(id)
                    .and_then(|entity| world.get::<Transform>(*entity))
                    .is_some_and(|t| t.within_range(origin, *range))
            })
            .collect()
    }
}
