//! Bound user interfaces.
//!
//! A bound UI is a window tied to an entity and a [`UiKey`]. The client
//! opens it and sends typed messages; the server validates each one,
//! raises it at the hosting entity as a [`UiMessageEvent`] and, when
//! refreshed, pushes a typed state object to every session viewing it.
//! Clients never write server state directly.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use replica_component::Entity;
use replica_net::{
    ClientMessage, MessageTypeId, NetEntity, NetError, NetMessage, ServerMessage, SessionId, TypedPayload,
    UiKey, decode, encode_typed,
};
use tracing::{debug, warn};

use crate::error::UiError;
use crate::session::SessionRegistry;
use crate::sync::ClientSynchronizer;
use crate::world::World;

/// A validated UI message, raised at the hosting entity on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct UiMessageEvent<M> {
    /// Who sent it.
    pub session: SessionId,
    /// Which UI on the entity.
    pub key: UiKey,
    /// The decoded message.
    pub message: M,
}

/// Raised at the hosting entity when a session opens a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiOpened {
    /// The viewer.
    pub session: SessionId,
    /// Which UI.
    pub key: UiKey,
}

/// Raised at the hosting entity when a session closes a UI or disconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiClosed {
    /// The former viewer.
    pub session: SessionId,
    /// Which UI.
    pub key: UiKey,
}

/// Raised at the local replica on a client when new UI state arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct UiStateReceived {
    /// Which UI.
    pub key: UiKey,
    /// The encoded state; decode with [`UiStateReceived::decode`].
    pub state: TypedPayload,
}

impl UiStateReceived {
    /// Decode the state as `S`, or `None` if it is another type.
    ///
    /// # Errors
    ///
    /// [`NetError::Decode`] if the tag matches but the bytes do not.
    pub fn decode<S: NetMessage>(&self) -> Result<Option<S>, NetError> {
        if self.state.kind != S::message_type_id() {
            return Ok(None);
        }
        decode(&self.state.bytes).map(Some)
    }
}

type Dispatch = fn(&mut World, Entity, SessionId, UiKey, &[u8]) -> Result<(), NetError>;
type StateBuilder = Arc<dyn Fn(&World, Entity) -> Option<Result<TypedPayload, NetError>> + Send + Sync>;

fn dispatch_message<M: NetMessage>(
    world: &mut World,
    entity: Entity,
    session: SessionId,
    key: UiKey,
    bytes: &[u8],
) -> Result<(), NetError> {
    let message: M = decode(bytes)?;
    world.raise_directed(entity, &mut UiMessageEvent { session, key, message });
    Ok(())
}

/// Server half: tracks viewers, validates input and pushes state.
#[derive(Default)]
pub struct BoundUiServer {
    open: BTreeMap<(Entity, UiKey), BTreeSet<SessionId>>,
    messages: HashMap<MessageTypeId, Dispatch>,
    states: HashMap<UiKey, StateBuilder>,
}

impl BoundUiServer {
    /// Create a server with no UIs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept client messages of type `M`.
    pub fn register_message<M: NetMessage>(&mut self) -> &mut Self {
        self.messages.insert(M::message_type_id(), dispatch_message::<M>);
        self
    }

    /// Declare UI `key`, whose state is built by `builder`. Returning
    /// `None` means the entity currently has nothing to show.
    pub fn register_state<S, F>(&mut self, key: UiKey, builder: F) -> &mut Self
    where
        S: NetMessage,
        F: Fn(&World, Entity) -> Option<S> + Send + Sync + 'static,
    {
        let builder: StateBuilder = Arc::new(move |world: &World, entity: Entity| {
            builder(world, entity).map(|state| encode_typed(&state))
        });
        self.states.insert(key, builder);
        self
    }

    /// Sessions viewing UI `key` on `entity`.
    #[must_use]
    pub fn viewers(&self, entity: Entity, key: &UiKey) -> Vec<SessionId> {
        self.open
            .get(&(entity, key.clone()))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if `session` has UI `key` on `entity` open.
    #[must_use]
    pub fn is_open(&self, entity: Entity, key: &UiKey, session: SessionId) -> bool {
        self.open
            .get(&(entity, key.clone()))
            .is_some_and(|s| s.contains(&session))
    }

    /// Handle a UI message from a client. Rejected messages change nothing.
    /// A session may only reach UIs on entities replicated to it.
    ///
    /// # Errors
    ///
    /// [`UiError`] naming why the message was rejected.
    pub fn handle(
        &mut self,
        world: &mut World,
        sessions: &SessionRegistry,
        session: SessionId,
        message: ClientMessage,
    ) -> Result<(), UiError> {
        match message {
            ClientMessage::UiOpen { entity, key } => {
                let entity = self.validate(world, sessions, session, entity, &key)?;
                let viewers = self.open.entry((entity, key.clone())).or_default();
                if viewers.insert(session) {
                    world.raise_directed(entity, &mut UiOpened { session, key: key.clone() });
                }
                world.request_ui_refresh(entity, key);
                Ok(())
            }
            ClientMessage::UiClose { entity, key } => {
                let entity = Entity(entity.0);
                if self.forget(entity, &key, session) {
                    world.raise_directed(entity, &mut UiClosed { session, key });
                }
                Ok(())
            }
            ClientMessage::Ui { entity, key, message } => {
                let entity = self.validate(world, sessions, session, entity, &key)?;
                if !self.is_open(entity, &key, session) {
                    return Err(UiError::NotOpen { session, entity, key });
                }
                let dispatch = self
                    .messages
                    .get(&message.kind)
                    .ok_or(UiError::UnknownMessage(message.kind))?;
                dispatch(world, entity, session, key, &message.bytes)?;
                Ok(())
            }
            ClientMessage::Event(_) | ClientMessage::Disconnect | ClientMessage::Heartbeat => Ok(()),
        }
    }

    fn validate(
        &self,
        world: &World,
        sessions: &SessionRegistry,
        session: SessionId,
        entity: NetEntity,
        key: &UiKey,
    ) -> Result<Entity, UiError> {
        let local = Entity(entity.0);
        if !world.is_alive(local) {
            return Err(UiError::NoSuchEntity(entity));
        }
        let visible = sessions
            .get(session)
            .is_some_and(|s| s.sees(local) && !s.hidden().contains(&local));
        if !visible {
            return Err(UiError::NotVisible { session, entity: local });
        }
        if !self.states.contains_key(key) {
            return Err(UiError::UnknownUi(key.clone()));
        }
        Ok(local)
    }

    fn forget(&mut self, entity: Entity, key: &UiKey, session: SessionId) -> bool {
        let slot = (entity, key.clone());
        let Some(viewers) = self.open.get_mut(&slot) else {
            return false;
        };
        let removed = viewers.remove(&session);
        if viewers.is_empty() {
            self.open.remove(&slot);
        }
        removed
    }

    /// Close everything a departing session had open.
    pub fn close_session(&mut self, world: &mut World, session: SessionId) {
        let slots: Vec<(Entity, UiKey)> = self
            .open
            .iter()
            .filter(|(_, viewers)| viewers.contains(&session))
            .map(|(slot, _)| slot.clone())
            .collect();
        for (entity, key) in slots {
            self.forget(entity, &key, session);
            world.raise_directed(entity, &mut UiClosed { session, key });
        }
    }

    /// Close UIs whose live host is no longer replicated to the viewer.
    pub fn close_unseen(&mut self, world: &mut World, sessions: &SessionRegistry) -> Vec<(SessionId, ServerMessage)> {
        let lost: Vec<(Entity, UiKey, SessionId)> = self
            .open
            .iter()
            .filter(|((entity, _), _)| world.is_alive(*entity))
            .flat_map(|((entity, key), viewers)| {
                viewers
                    .iter()
                    .filter(move |session| !sessions.get(**session).is_some_and(|s| s.sees(*entity)))
                    .map(move |session| (*entity, key.clone(), *session))
            })
            .collect();
        let mut out = Vec::new();
        for (entity, key, session) in lost {
            self.forget(entity, &key, session);
            debug!(%entity, %key, %session, "UI host left view, closing");
            world.raise_directed(entity, &mut UiClosed { session, key: key.clone() });
            out.push((
                session,
                ServerMessage::UiClosed {
                    entity: entity.into(),
                    key,
                },
            ));
        }
        out
    }

    /// Close UI `key` on `entity` for every viewer.
    pub fn close_all(&mut self, world: &mut World, entity: Entity, key: UiKey) -> Vec<(SessionId, ServerMessage)> {
        let Some(viewers) = self.open.remove(&(entity, key.clone())) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for session in viewers {
            world.raise_directed(entity, &mut UiClosed { session, key: key.clone() });
            out.push((
                session,
                ServerMessage::UiClosed {
                    entity: entity.into(),
                    key: key.clone(),
                },
            ));
        }
        out
    }

    /// Build and address state for every UI refreshed this tick. UIs on
    /// deleted entities are closed instead.
    pub fn flush(&mut self, world: &mut World) -> Vec<(SessionId, ServerMessage)> {
        let mut out = Vec::new();

        let orphaned: Vec<(Entity, UiKey)> = self
            .open
            .keys()
            .filter(|(entity, _)| !world.is_alive(*entity))
            .cloned()
            .collect();
        for (entity, key) in orphaned {
            if let Some(viewers) = self.open.remove(&(entity, key.clone())) {
                for session in viewers {
                    out.push((
                        session,
                        ServerMessage::UiClosed {
                            entity: entity.into(),
                            key: key.clone(),
                        },
                    ));
                }
            }
        }

        for (entity, key) in world.take_ui_refreshes() {
            let viewers = self.viewers(entity, &key);
            if viewers.is_empty() {
                continue;
            }
            let Some(builder) = self.states.get(&key) else {
                continue;
            };
            let state = match builder(world, entity) {
                Some(Ok(state)) => state,
                Some(Err(err)) => {
                    warn!(%entity, %key, error = %err, "UI state failed to encode");
                    continue;
                }
                None => {
                    debug!(%entity, %key, "UI has no state to show");
                    continue;
                }
            };
            for session in viewers {
                out.push((
                    session,
                    ServerMessage::UiState {
                        entity: entity.into(),
                        key: key.clone(),
                        state: state.clone(),
                    },
                ));
            }
        }
        out
    }
}

impl std::fmt::Debug for BoundUiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundUiServer")
            .field("open", &self.open)
            .field("messages", &self.messages.len())
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Client half: remembers the latest state per open UI.
#[derive(Debug, Default)]
pub struct BoundUiClient {
    states: HashMap<(Entity, UiKey), TypedPayload>,
}

impl BoundUiClient {
    /// Create an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest state for UI `key` on a local entity, decoded as `S`.
    ///
    /// # Errors
    ///
    /// [`NetError::Decode`] if the stored state is not an `S`.
    pub fn state<S: NetMessage>(&self, entity: Entity, key: &UiKey) -> Result<Option<S>, NetError> {
        let Some(payload) = self.states.get(&(entity, key.clone())) else {
            return Ok(None);
        };
        if payload.kind != S::message_type_id() {
            return Ok(None);
        }
        decode(&payload.bytes).map(Some)
    }

    /// Apply a UI message from the server. Non-UI messages are ignored.
    pub fn receive(&mut self, world: &mut World, sync: &ClientSynchronizer, message: &ServerMessage) {
        match message {
            ServerMessage::UiState { entity, key, state } => {
                let Some(local) = sync.local_entity(*entity) else {
                    debug!(net = %entity, %key, "UI state for unknown entity dropped");
                    return;
                };
                self.states.insert((local, key.clone()), state.clone());
                world.raise_directed(
                    local,
                    &mut UiStateReceived {
                        key: key.clone(),
                        state: state.clone(),
                    },
                );
            }
            ServerMessage::UiClosed { entity, key } => {
                if let Some(local) = sync.local_entity(*entity) {
                    self.states.remove(&(local, key.clone()));
                }
            }
            _ => {}
        }
    }

    /// Drop state kept for a local entity that went away.
    pub fn forget_entity(&mut self, entity: Entity) {
        self.states.retain(|(e, _), _| *e != entity);
    }
}
