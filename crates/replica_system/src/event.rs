//! Typed event bus.
//!
//! Handlers are stored per event type in subscription order and resolved
//! once, at subscription time, into a `(ComponentTypeId, TypeId)` keyed
//! registry. Dispatch itself lives on [`World`](crate::World) because every
//! handler receives `&mut World`; the bus only hands out cloned handler
//! lists so handlers may subscribe or raise further events re-entrantly.
//!
//! Three kinds of subscription exist:
//!
//! - **directed** — `(component, event)`: runs when the event is raised at
//!   an entity that owns the component.
//! - **broadcast** — `event`: runs on every broadcast raise.
//! - **network** — `message type`: runs when a networked event of that type
//!   arrives from a remote peer.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use replica_component::{ComponentTypeId, Entity};
use replica_net::{MessageTypeId, NetError, SessionId};

use crate::world::World;

/// Signature of a directed handler.
pub type DirectedFn<E> = dyn Fn(&mut World, Entity, &mut E) + Send + Sync;

/// Signature of a broadcast handler.
pub type BroadcastFn<E> = dyn Fn(&mut World, &mut E) + Send + Sync;

/// Type-erased network handler: decodes its payload then runs.
pub type NetworkFn = dyn Fn(&mut World, Origin, &[u8]) -> Result<(), NetError> + Send + Sync;

/// Where a networked event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Received by a client from the server.
    Server,
    /// Received by the server from a client session.
    Session(SessionId),
}

/// Events whose raiser checks a cancellation flag after dispatch.
///
/// Cancelling never stops delivery: every subscribed handler still runs.
pub trait Cancellable {
    /// Mark the event cancelled.
    fn cancel(&mut self);
    /// Whether any handler cancelled it.
    fn is_cancelled(&self) -> bool;
}

/// Identifies a subscription so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    kind: SubscriptionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubscriptionKind {
    Directed(TypeId),
    Broadcast(TypeId),
    Network(MessageTypeId),
}

struct DirectedEntry {
    id: u64,
    component: ComponentTypeId,
    handler: Arc<dyn Any + Send + Sync>,
}

struct BroadcastEntry {
    id: u64,
    handler: Arc<dyn Any + Send + Sync>,
}

struct NetworkEntry {
    id: u64,
    handler: Arc<NetworkFn>,
}

/// Handler registry. Owned by the world.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    directed: HashMap<TypeId, Vec<DirectedEntry>>,
    broadcast: HashMap<TypeId, Vec<BroadcastEntry>>,
    network: HashMap<MessageTypeId, Vec<NetworkEntry>>,
    recording: Option<Vec<Subscription>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self, kind: SubscriptionKind) -> Subscription {
        self.next_id += 1;
        let subscription = Subscription {
            id: self.next_id,
            kind,
        };
        if let Some(recorded) = &mut self.recording {
            recorded.push(subscription);
        }
        subscription
    }

    /// Register a directed handler for `E` on entities owning `component`.
    pub fn subscribe_directed<E: 'static>(
        &mut self,
        component: ComponentTypeId,
        handler: Box<DirectedFn<E>>,
    ) -> Subscription {
        let subscription = self.issue(SubscriptionKind::Directed(TypeId::of::<E>()));
        // Stored as `Arc<Box<DirectedFn<E>>>` so it can be downcast by event type.
        let handler: Arc<dyn Any + Send + Sync> = Arc::new(handler);
        self.directed
            .entry(TypeId::of::<E>())
            .or_default()
            .push(DirectedEntry {
                id: subscription.id,
                component,
                handler,
            });
        subscription
    }

    /// Register a broadcast handler for `E`.
    pub fn subscribe_broadcast<E: 'static>(&mut self, handler: Box<BroadcastFn<E>>) -> Subscription {
        let subscription = self.issue(SubscriptionKind::Broadcast(TypeId::of::<E>()));
        let handler: Arc<dyn Any + Send + Sync> = Arc::new(handler);
        self.broadcast
            .entry(TypeId::of::<E>())
            .or_default()
            .push(BroadcastEntry {
                id: subscription.id,
                handler,
            });
        subscription
    }

    /// Register a type-erased network handler.
    pub fn subscribe_network(&mut self, kind: MessageTypeId, handler: Arc<NetworkFn>) -> Subscription {
        let subscription = self.issue(SubscriptionKind::Network(kind));
        self.network.entry(kind).or_default().push(NetworkEntry {
            id: subscription.id,
            handler,
        });
        subscription
    }

    /// Remove a subscription. Returns `true` if it was still registered.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let id = subscription.id;
        match subscription.kind {
            SubscriptionKind::Directed(ty) => remove_by_id(self.directed.get_mut(&ty), |e| e.id == id),
            SubscriptionKind::Broadcast(ty) => {
                remove_by_id(self.broadcast.get_mut(&ty), |e| e.id == id)
            }
            SubscriptionKind::Network(kind) => {
                remove_by_id(self.network.get_mut(&kind), |e| e.id == id)
            }
        }
    }

    /// Start collecting every subscription issued until
    /// [`EventBus::stop_recording`] is called.
    pub fn start_recording(&mut self) {
        self.recording = Some(Vec::new());
    }

    /// Stop collecting and return what was issued since
    /// [`EventBus::start_recording`].
    pub fn stop_recording(&mut self) -> Vec<Subscription> {
        self.recording.take().unwrap_or_default()
    }

    /// Directed handlers for `E`, in subscription order.
    pub(crate) fn directed_handlers<E: 'static>(&self) -> Vec<(ComponentTypeId, Arc<dyn Any + Send + Sync>)> {
        self.directed
            .get(&TypeId::of::<E>())
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| (e.component, Arc::clone(&e.handler)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Broadcast handlers for `E`, in subscription order.
    pub(crate) fn broadcast_handlers<E: 'static>(&self) -> Vec<Arc<dyn Any + Send + Sync>> {
        self.broadcast
            .get(&TypeId::of::<E>())
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
            .unwrap_or_default()
    }

    /// Network handlers for a message type, in subscription order.
    pub(crate) fn network_handlers(&self, kind: MessageTypeId) -> Vec<Arc<NetworkFn>> {
        self.network
            .get(&kind)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
            .unwrap_or_default()
    }

    /// Total number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.directed.values().map(Vec::len).sum::<usize>()
            + self.broadcast.values().map(Vec::len).sum::<usize>()
            + self.network.values().map(Vec::len).sum::<usize>()
    }
}

fn remove_by_id<T>(entries: Option<&mut Vec<T>>, matches: impl Fn(&T) -> bool) -> bool {
    let Some(entries) = entries else {
        return false;
    };
    let before = entries.len();
    entries.retain(|e| !matches(e));
    entries.len() != before
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

// ── Lifecycle events ────────────────────────────────────────────────────────

/// Raised at an entity right after a component was attached. Only handlers
/// subscribed for that component type receive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentAdded {
    /// The attached component.
    pub component: ComponentTypeId,
}

/// Raised after [`ComponentAdded`], once the component is fully attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStartup {
    /// The started component.
    pub component: ComponentTypeId,
}

/// Raised at an entity before a component's data is removed. Only handlers
/// subscribed for that component type receive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentRemoved {
    /// The component being removed.
    pub component: ComponentTypeId,
}

/// Broadcast after an entity and all of its components are gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDeleted {
    /// The deleted entity. Its id is parked, not yet reusable.
    pub entity: Entity,
}

/// Raised on a replica after server state was written into a component.
/// Only handlers subscribed for that component type receive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AfterStateApplied {
    /// The component that received state.
    pub component: ComponentTypeId,
}

/// Broadcast on the server when a session connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConnected {
    /// The new session.
    pub session: SessionId,
}

/// Broadcast on the server when a session disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDisconnected {
    /// The departed session.
    pub session: SessionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let mut bus = EventBus::new();
        let a = bus.subscribe_broadcast::<Ping>(Box::new(|_, _| {}));
        let _b = bus.subscribe_broadcast::<Ping>(Box::new(|_, _| {}));
        assert_eq!(bus.subscription_count(), 2);

        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));
        assert_eq!(bus.broadcast_handlers::<Ping>().len(), 1);
    }

    #[test]
    fn test_recording_captures_issued_subscriptions() {
        let mut bus = EventBus::new();
        let before = bus.subscribe_broadcast::<Ping>(Box::new(|_, _| {}));
        bus.start_recording();
        let inside = bus.subscribe_directed::<Ping>(ComponentTypeId(1), Box::new(|_, _, _| {}));
        let recorded = bus.stop_recording();
        assert_eq!(recorded, vec![inside]);
        assert!(!recorded.contains(&before));
    }

    #[test]
    fn test_directed_handlers_keep_subscription_order() {
        let mut bus = EventBus::new();
        bus.subscribe_directed::<Ping>(ComponentTypeId(7), Box::new(|_, _, _| {}));
        bus.subscribe_directed::<Ping>(ComponentTypeId(3), Box::new(|_, _, _| {}));
        let components: Vec<_> = bus
            .directed_handlers::<Ping>()
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        assert_eq!(components, vec![ComponentTypeId(7), ComponentTypeId(3)]);
    }
}
