//! The simulation world.
//!
//! A [`World`] owns the entity allocator, the component store and the event
//! bus, and keeps the bookkeeping the runtimes flush at the end of a tick:
//! networked components that changed, networked events waiting to be sent,
//! and bound UIs that asked for a state refresh.
//!
//! Everything here runs on the simulation thread. Handlers receive
//! `&mut World` and may freely create or delete entities, attach or detach
//! components and raise further events.

use std::collections::BTreeSet;
use std::sync::Arc;

use replica_component::{
    Component, ComponentStore, ComponentTypeId, EcsError, Entity, EntityAllocator, QueryData,
    QueryIter, QuerySnapshot, Replication,
};
use replica_net::{NetError, NetMessage, RecipientFilter, TypedPayload, UiKey, decode, encode_typed};
use tracing::{debug, trace};

use crate::config::RuntimeConfig;
use crate::event::{
    BroadcastFn, ComponentAdded, ComponentRemoved, ComponentStartup, DirectedFn, EntityDeleted,
    EventBus, NetworkFn, Origin, Subscription,
};

/// Which side of the connection a world simulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Authoritative world. Tracks networked changes for replication.
    Server,
    /// Replica world. Receives state, never produces deltas.
    Client,
}

/// Networked-state changes accumulated since the last
/// [`World::take_changes`]. Only a server world records them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Networked components written or attached.
    pub dirty: BTreeSet<(Entity, ComponentTypeId)>,
    /// Networked components detached from live entities.
    pub removed: Vec<(Entity, ComponentTypeId)>,
    /// Deleted entities.
    pub deleted: Vec<Entity>,
}

impl ChangeSet {
    /// Returns `true` if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty() && self.removed.is_empty() && self.deleted.is_empty()
    }
}

/// Traffic queued for the remote peer, drained by the runtime on flush.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// A networked event. Clients ignore the filter; everything goes to the
    /// server.
    Event {
        /// Who should receive it.
        filter: RecipientFilter,
        /// The encoded event.
        payload: TypedPayload,
    },
    /// Open a bound UI (client only).
    UiOpen {
        /// Hosting entity, in this world's ids.
        entity: Entity,
        /// Which UI.
        key: UiKey,
    },
    /// Close a bound UI. On the server this closes it for every viewer.
    UiClose {
        /// Hosting entity, in this world's ids.
        entity: Entity,
        /// Which UI.
        key: UiKey,
    },
    /// A message for the server-side controller of a bound UI (client only).
    UiMessage {
        /// Hosting entity, in this world's ids.
        entity: Entity,
        /// Which UI.
        key: UiKey,
        /// The encoded message.
        message: TypedPayload,
    },
}

/// Entities, components, events and per-tick bookkeeping.
#[derive(Debug)]
pub struct World {
    role: Role,
    tick: u64,
    allocator: EntityAllocator,
    store: ComponentStore,
    bus: EventBus,
    changes: ChangeSet,
    outgoing: Vec<Outgoing>,
    ui_refresh: BTreeSet<(Entity, UiKey)>,
}

impl World {
    /// Create an empty world with the default configuration.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self::with_config(role, &RuntimeConfig::default())
    }

    /// Create an empty world.
    #[must_use]
    pub fn with_config(role: Role, config: &RuntimeConfig) -> Self {
        Self {
            role,
            tick: 0,
            allocator: EntityAllocator::with_grace_ticks(config.entity_grace_ticks),
            store: ComponentStore::new(),
            bus: EventBus::new(),
            changes: ChangeSet::default(),
            outgoing: Vec::new(),
            ui_refresh: BTreeSet::new(),
        }
    }

    /// Which side this world simulates.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current tick number. Starts at 0.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Move to the next tick and recycle entity ids whose grace period
    /// expired.
    pub fn advance_tick(&mut self) {
        self.tick += 1;
        self.allocator.advance(self.tick);
    }

    fn tracks_changes(&self) -> bool {
        self.role == Role::Server
    }

    // ── Entities ────────────────────────────────────────────────────────────

    /// Create an entity with no components.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        self.store.insert_entity(entity);
        trace!(%entity, "entity created");
        entity
    }

    /// Returns `true` between [`World::create_entity`] and
    /// [`World::delete_entity`].
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.store.is_alive(entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.store.entity_count()
    }

    /// Every live entity.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.store.entities()
    }

    /// Delete an entity and everything attached to it.
    ///
    /// Raises [`ComponentRemoved`] for each component while the data is
    /// still readable, then broadcasts [`EntityDeleted`]. The id is parked
    /// for the configured grace period. Deleting a dead entity is a no-op
    /// returning `false`.
    pub fn delete_entity(&mut self, entity: Entity) -> bool {
        if !self.store.is_alive(entity) {
            debug!(%entity, "delete of dead entity ignored");
            return false;
        }

        let components = self.store.components_of(entity).to_vec();
        for component in components {
            self.raise_for_component(entity, component, &mut ComponentRemoved { component });
        }

        // A removal handler may have deleted the entity already.
        if self.store.remove_entity(entity).is_none() {
            return true;
        }
        if self.tracks_changes() {
            self.changes.dirty.retain(|(e, _)| *e != entity);
            self.changes.removed.retain(|(e, _)| *e != entity);
            self.changes.deleted.push(entity);
        }
        self.ui_refresh.retain(|(e, _)| *e != entity);
        self.allocator.release(entity, self.tick);
        trace!(%entity, "entity deleted");

        self.raise_broadcast(&mut EntityDeleted { entity });
        true
    }

    // ── Components ──────────────────────────────────────────────────────────

    /// Attach a component, then raise [`ComponentAdded`] and
    /// [`ComponentStartup`] at the entity.
    ///
    /// # Errors
    ///
    /// - [`EcsError::NoSuchEntity`] if the entity is not alive.
    /// - [`EcsError::DuplicateComponent`] if a `T` is already attached.
    /// - [`EcsError::TypeNameCollision`] if two Rust types share `T`'s name.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        self.store.insert(entity, value)?;
        let component = T::component_type_id();
        if T::replication() == Replication::Networked {
            self.note_dirty(entity, component);
        }
        self.raise_for_component(entity, component, &mut ComponentAdded { component });
        self.raise_for_component(entity, component, &mut ComponentStartup { component });
        Ok(())
    }

    /// Return the entity's `T`, attaching a default one first if missing.
    ///
    /// # Errors
    ///
    /// As [`World::add_component`], plus [`EcsError::MissingComponent`] if a
    /// lifecycle handler detached the new component again.
    pub fn ensure_component<T: Component + Default>(&mut self, entity: Entity) -> Result<&mut T, EcsError> {
        if !self.store.contains::<T>(entity) {
            self.add_component(entity, T::default())?;
        }
        self.get_mut::<T>(entity).ok_or(EcsError::MissingComponent {
            entity,
            name: T::type_name(),
        })
    }

    /// Detach and return the entity's `T`. [`ComponentRemoved`] is raised
    /// while the component is still attached. Returns `None` if absent.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.store.contains::<T>(entity) {
            return None;
        }
        let component = T::component_type_id();
        self.raise_for_component(entity, component, &mut ComponentRemoved { component });
        let value = self.store.remove::<T>(entity)?;
        if T::replication() == Replication::Networked && self.tracks_changes() {
            self.changes.dirty.remove(&(entity, component));
            self.changes.removed.push((entity, component));
        }
        Some(value)
    }

    /// Returns `true` if the entity has a `T`.
    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.store.contains::<T>(entity)
    }

    /// Borrow the entity's `T`.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.store.get::<T>(entity)
    }

    /// Borrow the entity's `T`, or explain why it is unavailable.
    ///
    /// # Errors
    ///
    /// [`EcsError::NoSuchEntity`] for a dead entity,
    /// [`EcsError::MissingComponent`] if no `T` is attached.
    pub fn try_get<T: Component>(&self, entity: Entity) -> Result<&T, EcsError> {
        if !self.store.is_alive(entity) {
            return Err(EcsError::NoSuchEntity(entity));
        }
        self.store.get::<T>(entity).ok_or(EcsError::MissingComponent {
            entity,
            name: T::type_name(),
        })
    }

    /// Mutably borrow the entity's `T`. A networked `T` is marked dirty.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if T::replication() == Replication::Networked && self.store.contains::<T>(entity) {
            self.note_dirty(entity, T::component_type_id());
        }
        self.store.get_mut::<T>(entity)
    }

    /// Flag the entity's `T` for replication at the end of the tick.
    /// Ignored for local components and absent ones.
    pub fn mark_dirty<T: Component>(&mut self, entity: Entity) {
        if T::replication() == Replication::Networked && self.store.contains::<T>(entity) {
            self.note_dirty(entity, T::component_type_id());
        }
    }

    fn note_dirty(&mut self, entity: Entity, component: ComponentTypeId) {
        if self.tracks_changes() {
            self.changes.dirty.insert((entity, component));
        }
    }

    /// Drain the networked changes recorded since the last call.
    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    /// Read-only access to the component store.
    #[must_use]
    pub fn components(&self) -> &ComponentStore {
        &self.store
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Iterate entities having every component in `Q`.
    #[must_use]
    pub fn query<Q: QueryData>(&self) -> QueryIter<'_, Q> {
        QueryIter::new(&self.store)
    }

    /// Capture the entities matching `Q` now, so the world can be mutated
    /// while stepping through them.
    #[must_use]
    pub fn query_snapshot<Q: QueryData>(&self) -> QuerySnapshot<Q> {
        QuerySnapshot::new(&self.store)
    }

    // ── Events ──────────────────────────────────────────────────────────────

    /// Subscribe to `E` raised at entities owning a `C`.
    pub fn subscribe<C, E, F>(&mut self, handler: F) -> Subscription
    where
        C: Component,
        E: 'static,
        F: Fn(&mut World, Entity, &mut E) + Send + Sync + 'static,
    {
        let handler: Box<DirectedFn<E>> = Box::new(handler);
        self.bus.subscribe_directed::<E>(C::component_type_id(), handler)
    }

    /// Subscribe to broadcasts of `E`.
    pub fn subscribe_broadcast<E, F>(&mut self, handler: F) -> Subscription
    where
        E: 'static,
        F: Fn(&mut World, &mut E) + Send + Sync + 'static,
    {
        let handler: Box<BroadcastFn<E>> = Box::new(handler);
        self.bus.subscribe_broadcast::<E>(handler)
    }

    /// Subscribe to networked events of type `E` arriving from the peer.
    pub fn subscribe_network<E, F>(&mut self, handler: F) -> Subscription
    where
        E: NetMessage,
        F: Fn(&mut World, Origin, E) + Send + Sync + 'static,
    {
        let erased: Arc<NetworkFn> = Arc::new(move |world: &mut World, origin: Origin, bytes: &[u8]| {
            let event: E = decode(bytes)?;
            handler(world, origin, event);
            Ok(())
        });
        self.bus.subscribe_network(E::message_type_id(), erased)
    }

    /// Remove a subscription. Returns `true` if it was still registered.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.bus.unsubscribe(subscription)
    }

    /// The handler registry.
    pub fn event_bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Raise `E` at `entity`.
    ///
    /// Handlers run synchronously in subscription order, each only if the
    /// entity still owns the handler's component at that moment. Raising at
    /// a dead entity is a no-op.
    pub fn raise_directed<E: 'static>(&mut self, entity: Entity, event: &mut E) {
        if !self.store.is_alive(entity) {
            debug!(%entity, "event raised at dead entity dropped");
            return;
        }
        for (component, handler) in self.bus.directed_handlers::<E>() {
            if !self.store.contains_id(entity, component) {
                continue;
            }
            if let Some(handler) = handler.downcast_ref::<Box<DirectedFn<E>>>() {
                handler(self, entity, event);
            }
        }
    }

    /// Raise `E` at `entity`, then broadcast it.
    pub fn raise_directed_broadcast<E: 'static>(&mut self, entity: Entity, event: &mut E) {
        self.raise_directed(entity, event);
        self.raise_broadcast(event);
    }

    /// Run only the `E` handlers registered for `component`. Used for
    /// lifecycle events, which concern one component each.
    pub(crate) fn raise_for_component<E: 'static>(
        &mut self,
        entity: Entity,
        component: ComponentTypeId,
        event: &mut E,
    ) {
        for (subscribed, handler) in self.bus.directed_handlers::<E>() {
            if subscribed != component || !self.store.contains_id(entity, component) {
                continue;
            }
            if let Some(handler) = handler.downcast_ref::<Box<DirectedFn<E>>>() {
                handler(self, entity, event);
            }
        }
    }

    /// Broadcast `E` to every broadcast subscriber.
    pub fn raise_broadcast<E: 'static>(&mut self, event: &mut E) {
        for handler in self.bus.broadcast_handlers::<E>() {
            if let Some(handler) = handler.downcast_ref::<Box<BroadcastFn<E>>>() {
                handler(self, event);
            }
        }
    }

    /// Queue a networked event for the peer. Sent when the tick is flushed.
    ///
    /// # Errors
    ///
    /// [`NetError::Encode`] if the event does not serialise.
    pub fn raise_networked<E: NetMessage>(&mut self, event: &E, filter: RecipientFilter) -> Result<(), NetError> {
        let payload = encode_typed(event)?;
        self.outgoing.push(Outgoing::Event { filter, payload });
        Ok(())
    }

    /// Deliver a networked event received from the peer to its handlers.
    /// Returns how many handlers ran.
    ///
    /// # Errors
    ///
    /// [`NetError::Decode`] if the payload does not match its type tag.
    pub fn dispatch_network(&mut self, origin: Origin, payload: &TypedPayload) -> Result<usize, NetError> {
        let handlers = self.bus.network_handlers(payload.kind);
        if handlers.is_empty() {
            debug!(kind = payload.kind.0, "networked event without handlers");
        }
        for handler in &handlers {
            handler(self, origin, &payload.bytes)?;
        }
        Ok(handlers.len())
    }

    // ── Bound UI ────────────────────────────────────────────────────────────

    /// Ask for the UI `key` on `entity` to push fresh state to its viewers
    /// at the end of the tick. Repeated requests within a tick coalesce.
    pub fn request_ui_refresh(&mut self, entity: Entity, key: UiKey) {
        self.ui_refresh.insert((entity, key));
    }

    /// Drain pending refresh requests in a stable order.
    pub fn take_ui_refreshes(&mut self) -> Vec<(Entity, UiKey)> {
        std::mem::take(&mut self.ui_refresh).into_iter().collect()
    }

    /// Open a bound UI hosted by `entity` (client side).
    pub fn open_ui(&mut self, entity: Entity, key: UiKey) {
        self.outgoing.push(Outgoing::UiOpen { entity, key });
    }

    /// Close a bound UI hosted by `entity`.
    pub fn close_ui(&mut self, entity: Entity, key: UiKey) {
        self.outgoing.push(Outgoing::UiClose { entity, key });
    }

    /// Send a message to the server-side controller of a bound UI.
    ///
    /// # Errors
    ///
    /// [`NetError::Encode`] if the message does not serialise.
    pub fn send_ui_message<M: NetMessage>(&mut self, entity: Entity, key: UiKey, message: &M) -> Result<(), NetError> {
        let message = encode_typed(message)?;
        self.outgoing.push(Outgoing::UiMessage { entity, key, message });
        Ok(())
    }

    /// Drain queued outgoing traffic in the order it was queued.
    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outgoing)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::event::{Cancellable, SessionConnected};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Health {
        current: f32,
    }

    replica_component::networked!(Health, "Health");

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Inventory {
        slots: u32,
    }

    impl Component for Inventory {
        fn type_name() -> &'static str {
            "Inventory"
        }
    }

    #[derive(Debug, Default)]
    struct Damage {
        amount: f32,
        cancelled: bool,
    }

    impl Cancellable for Damage {
        fn cancel(&mut self) {
            self.cancelled = true;
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Shout {
        text: String,
    }

    impl NetMessage for Shout {
        fn message_name() -> &'static str {
            "Shout"
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    #[test]
    fn test_entity_is_alive_until_deleted() {
        let mut world = World::new(Role::Server);
        let entity = world.create_entity();
        assert!(world.is_alive(entity));
        assert_eq!(world.entity_count(), 1);

        assert!(world.delete_entity(entity));
        assert!(!world.is_alive(entity));
        assert!(!world.delete_entity(entity));
        assert_eq!(world.try_get::<Health>(entity), Err(EcsError::NoSuchEntity(entity)));
    }

    #[test]
    fn test_deleted_id_not_reused_within_grace_period() {
        let config = RuntimeConfig::new().with_entity_grace_ticks(2);
        let mut world = World::with_config(Role::Server, &config);
        let doomed = world.create_entity();
        world.delete_entity(doomed);

        world.advance_tick();
        assert_ne!(world.create_entity(), doomed);
        world.advance_tick();
        assert_eq!(world.create_entity(), doomed);
    }

    #[test]
    fn test_add_component_twice_fails() {
        let mut world = World::new(Role::Server);
        let entity = world.create_entity();
        world.add_component(entity, Health { current: 100.0 }).unwrap();
        let err = world.add_component(entity, Health { current: 5.0 }).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponent { name: "Health", .. }));
        assert_eq!(world.get::<Health>(entity).unwrap().current, 100.0);
    }

    #[test]
    fn test_lifecycle_events_are_per_component() {
        let mut world = World::new(Role::Server);
        let seen = log();
        let s = seen.clone();
        world.subscribe::<Health, ComponentAdded, _>(move |_, _, _| push(&s, "health added"));
        let s = seen.clone();
        world.subscribe::<Health, ComponentStartup, _>(move |_, _, _| push(&s, "health startup"));
        let s = seen.clone();
        world.subscribe::<Health, ComponentRemoved, _>(move |w, e, _| {
            // Data is still readable while the removal is announced.
            let hp = w.get::<Health>(e).map_or(-1.0, |h| h.current);
            push(&s, format!("health removed at {hp}"));
        });

        let entity = world.create_entity();
        world.add_component(entity, Inventory { slots: 4 }).unwrap();
        world.add_component(entity, Health { current: 30.0 }).unwrap();
        world.remove_component::<Inventory>(entity);
        world.remove_component::<Health>(entity);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["health added", "health startup", "health removed at 30"]
        );
    }

    #[test]
    fn test_delete_entity_announces_components_then_entity() {
        let mut world = World::new(Role::Server);
        let seen = log();
        let s = seen.clone();
        world.subscribe::<Health, ComponentRemoved, _>(move |_, _, _| push(&s, "removed"));
        let s = seen.clone();
        world.subscribe_broadcast::<EntityDeleted, _>(move |w, ev| {
            assert!(!w.is_alive(ev.entity));
            push(&s, "deleted");
        });

        let entity = world.create_entity();
        world.add_component(entity, Health::default()).unwrap();
        world.delete_entity(entity);
        assert_eq!(*seen.lock().unwrap(), vec!["removed", "deleted"]);
    }

    #[test]
    fn test_directed_event_only_reaches_owners_in_order() {
        let mut world = World::new(Role::Server);
        let seen = log();
        let s = seen.clone();
        world.subscribe::<Health, Damage, _>(move |_, e, ev| push(&s, format!("health {e} {}", ev.amount)));
        let s = seen.clone();
        world.subscribe::<Inventory, Damage, _>(move |_, e, _| push(&s, format!("inventory {e}")));

        let both = world.create_entity();
        world.add_component(both, Health::default()).unwrap();
        world.add_component(both, Inventory::default()).unwrap();
        let bare = world.create_entity();

        world.raise_directed(both, &mut Damage { amount: 5.0, ..Default::default() });
        world.raise_directed(bare, &mut Damage::default());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![format!("health {both} 5"), format!("inventory {both}")]
        );
    }

    #[test]
    fn test_event_payload_is_fixed_at_raise_time() {
        let mut world = World::new(Role::Server);
        let seen = log();
        world.subscribe::<Health, Damage, _>(|w, e, ev| {
            if let Some(health) = w.get_mut::<Health>(e) {
                health.current -= ev.amount;
            }
            w.get_mut::<Inventory>(e).unwrap().slots = 0;
        });
        let s = seen.clone();
        world.subscribe::<Inventory, Damage, _>(move |w, e, ev| {
            let hp = w.get::<Health>(e).unwrap().current;
            push(&s, format!("amount {} hp {hp}", ev.amount));
        });

        let entity = world.create_entity();
        world.add_component(entity, Health { current: 100.0 }).unwrap();
        world.add_component(entity, Inventory { slots: 4 }).unwrap();
        world.raise_directed(entity, &mut Damage { amount: 20.0, ..Default::default() });

        // The second handler sees the first one's world mutation, while the
        // event object still holds the amount it was raised with.
        assert_eq!(*seen.lock().unwrap(), vec!["amount 20 hp 80"]);
        assert_eq!(world.get::<Inventory>(entity).unwrap().slots, 0);
    }

    #[test]
    fn test_cancellation_does_not_stop_later_handlers() {
        let mut world = World::new(Role::Server);
        let runs = log();
        let r = runs.clone();
        world.subscribe::<Health, Damage, _>(move |_, _, ev| {
            ev.cancel();
            push(&r, "first");
        });
        let r = runs.clone();
        world.subscribe::<Health, Damage, _>(move |_, _, _| push(&r, "second"));

        let entity = world.create_entity();
        world.add_component(entity, Health::default()).unwrap();
        let mut event = Damage::default();
        world.raise_directed(entity, &mut event);

        assert!(event.is_cancelled());
        assert_eq!(runs.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_handler_may_detach_component_of_later_handler() {
        let mut world = World::new(Role::Server);
        let runs = log();
        world.subscribe::<Health, Damage, _>(|w, e, _| {
            w.remove_component::<Inventory>(e);
        });
        let r = runs.clone();
        world.subscribe::<Inventory, Damage, _>(move |_, _, _| push(&r, "inventory"));

        let entity = world.create_entity();
        world.add_component(entity, Health::default()).unwrap();
        world.add_component(entity, Inventory::default()).unwrap();
        world.raise_directed(entity, &mut Damage::default());

        assert!(runs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_may_subscribe_and_raise_reentrantly() {
        let mut world = World::new(Role::Server);
        let runs = log();
        let r = runs.clone();
        world.subscribe_broadcast::<SessionConnected, _>(move |w, _| {
            let inner = r.clone();
            w.subscribe_broadcast::<EntityDeleted, _>(move |_, _| push(&inner, "late"));
            let e = w.create_entity();
            w.delete_entity(e);
        });

        let mut event = SessionConnected {
            session: replica_net::SessionId::new_v4(),
        };
        world.raise_broadcast(&mut event);
        assert_eq!(*runs.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_unsubscribed_handler_no_longer_runs() {
        let mut world = World::new(Role::Server);
        let runs = log();
        let r = runs.clone();
        let sub = world.subscribe::<Health, Damage, _>(move |_, _, _| push(&r, "ran"));
        let entity = world.create_entity();
        world.add_component(entity, Health::default()).unwrap();

        assert!(world.unsubscribe(sub));
        world.raise_directed(entity, &mut Damage::default());
        assert!(runs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_get_mut_marks_only_networked_dirty() {
        let mut world = World::new(Role::Server);
        let entity = world.create_entity();
        world.add_component(entity, Health::default()).unwrap();
        world.add_component(entity, Inventory::default()).unwrap();
        world.take_changes();

        world.get_mut::<Inventory>(entity).unwrap().slots = 9;
        assert!(world.take_changes().is_empty());

        world.get_mut::<Health>(entity).unwrap().current = 1.0;
        let changes = world.take_changes();
        assert!(changes.dirty.contains(&(entity, Health::component_type_id())));
    }

    #[test]
    fn test_removed_and_deleted_are_recorded() {
        let mut world = World::new(Role::Server);
        let a = world.create_entity();
        let b = world.create_entity();
        world.add_component(a, Health::default()).unwrap();
        world.add_component(b, Health::default()).unwrap();
        world.take_changes();

        world.remove_component::<Health>(a);
        world.get_mut::<Health>(b);
        world.delete_entity(b);

        let changes = world.take_changes();
        assert_eq!(changes.removed, vec![(a, Health::component_type_id())]);
        assert_eq!(changes.deleted, vec![b]);
        assert!(changes.dirty.is_empty());
    }

    #[test]
    fn test_client_world_does_not_track_changes() {
        let mut world = World::new(Role::Client);
        let entity = world.create_entity();
        world.add_component(entity, Health::default()).unwrap();
        world.get_mut::<Health>(entity);
        assert!(world.take_changes().is_empty());
    }

    #[test]
    fn test_ensure_component_attaches_default_once() {
        let mut world = World::new(Role::Server);
        let entity = world.create_entity();
        world.ensure_component::<Health>(entity).unwrap().current = 12.0;
        assert_eq!(world.ensure_component::<Health>(entity).unwrap().current, 12.0);
    }

    #[test]
    fn test_query_snapshot_allows_mutation() {
        let mut world = World::new(Role::Server);
        for _ in 0..3 {
            let e = world.create_entity();
            world.add_component(e, Health { current: 10.0 }).unwrap();
        }
        let mut snapshot = world.query_snapshot::<(Health,)>();
        let mut visited = 0;
        while let Some(entity) = snapshot.next_entity(world.components()) {
            world.delete_entity(entity);
            visited += 1;
        }
        assert_eq!(visited, 3);
        assert_eq!(world.query::<(Health,)>().count(), 0);
    }

    #[test]
    fn test_networked_event_roundtrip_through_dispatch() {
        let mut sender = World::new(Role::Client);
        sender
            .raise_networked(&Shout { text: "help".into() }, RecipientFilter::All)
            .unwrap();
        let outgoing = sender.take_outgoing();
        let Some(Outgoing::Event { payload, .. }) = outgoing.first() else {
            panic!("expected a queued event");
        };

        let mut receiver = World::new(Role::Server);
        let heard = log();
        let h = heard.clone();
        let session = replica_net::SessionId::new_v4();
        receiver.subscribe_network::<Shout, _>(move |_, origin, shout| {
            assert_eq!(origin, Origin::Session(session));
            push(&h, shout.text);
        });
        assert_eq!(receiver.dispatch_network(Origin::Session(session), payload).unwrap(), 1);
        assert_eq!(*heard.lock().unwrap(), vec!["help"]);
    }

    #[test]
    fn test_ui_refresh_requests_coalesce() {
        let mut world = World::new(Role::Server);
        let entity = world.create_entity();
        world.request_ui_refresh(entity, UiKey::new("console"));
        world.request_ui_refresh(entity, UiKey::new("console"));
        assert_eq!(world.take_ui_refreshes().len(), 1);
        assert!(world.take_ui_refreshes().is_empty());
    }
}
