//! Client-side application of replicated state.

use std::collections::HashMap;

use replica_component::{ComponentTypeId, Entity, FieldMap};
use replica_net::{ComponentDelta, EntitySnapshot, NetEntity, ServerMessage};
use tracing::trace;

use crate::error::SyncError;
use crate::event::AfterStateApplied;
use crate::sync::registry::ReplicationRegistry;
use crate::world::World;

/// Applies server traffic to a replica world.
///
/// Server entities are mapped to locally created ones on first sight.
/// Updates older than or equal to the last applied sequence for a
/// component are rejected with [`SyncError::StaleDelta`].
#[derive(Debug)]
pub struct ClientSynchronizer {
    registry: ReplicationRegistry,
    to_local: HashMap<NetEntity, Entity>,
    to_net: HashMap<Entity, NetEntity>,
    applied: HashMap<(NetEntity, ComponentTypeId), u64>,
}

impl ClientSynchronizer {
    /// Create a synchronizer for the given replicated types.
    #[must_use]
    pub fn new(registry: ReplicationRegistry) -> Self {
        Self {
            registry,
            to_local: HashMap::new(),
            to_net: HashMap::new(),
            applied: HashMap::new(),
        }
    }

    /// The local entity standing in for `net`.
    #[must_use]
    pub fn local_entity(&self, net: NetEntity) -> Option<Entity> {
        self.to_local.get(&net).copied()
    }

    /// The server entity behind a local replica.
    #[must_use]
    pub fn net_entity(&self, local: Entity) -> Option<NetEntity> {
        self.to_net.get(&local).copied()
    }

    /// Number of server entities currently replicated here.
    #[must_use]
    pub fn replicated_count(&self) -> usize {
        self.to_local.len()
    }

    /// Highest sequence applied to a component.
    #[must_use]
    pub fn last_applied(&self, net: NetEntity, component: ComponentTypeId) -> Option<u64> {
        self.applied.get(&(net, component)).copied()
    }

    /// Apply any replication message. Other messages are ignored.
    ///
    /// # Errors
    ///
    /// See [`ClientSynchronizer::apply_delta`].
    pub fn apply(&mut self, world: &mut World, message: &ServerMessage) -> Result<(), SyncError> {
        match message {
            ServerMessage::Snapshot(snapshot) => self.apply_snapshot(world, snapshot),
            ServerMessage::Delta(delta) => self.apply_delta(world, delta),
            ServerMessage::ComponentRemoved {
                entity,
                component,
                sequence,
            } => self.component_removed(world, *entity, *component, *sequence),
            ServerMessage::EntityLeft { entity } => {
                self.entity_left(world, *entity);
                Ok(())
            }
            ServerMessage::Event(_) | ServerMessage::UiState { .. } | ServerMessage::UiClosed { .. } => Ok(()),
        }
    }

    /// Create or refresh the replica of an entity entering view.
    /// Components already newer than the snapshot are left alone.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownComponent`] or [`SyncError::State`] if a
    /// component cannot be applied; earlier components stay applied.
    pub fn apply_snapshot(&mut self, world: &mut World, snapshot: &EntitySnapshot) -> Result<(), SyncError> {
        let entity = self.local_or_create(world, snapshot.entity);
        for state in &snapshot.components {
            if self.is_stale(snapshot.entity, state.component, snapshot.sequence) {
                trace!(net = %snapshot.entity, component = %state.component, "snapshot component older than replica");
                continue;
            }
            self.write(world, entity, snapshot.entity, state.component, &state.fields, snapshot.sequence)?;
        }
        Ok(())
    }

    /// Merge one component delta, synthesising the entity and a default
    /// component if they are unknown locally.
    ///
    /// # Errors
    ///
    /// - [`SyncError::StaleDelta`] if the sequence is not newer than the
    ///   last one applied; nothing changes.
    /// - [`SyncError::UnknownComponent`] if the type is not registered.
    /// - [`SyncError::State`] if the fields do not fit the component.
    pub fn apply_delta(&mut self, world: &mut World, delta: &ComponentDelta) -> Result<(), SyncError> {
        if let Some(last_applied) = self.last_applied(delta.entity, delta.component) {
            if delta.sequence <= last_applied {
                return Err(SyncError::StaleDelta {
                    entity: delta.entity,
                    component: delta.component,
                    sequence: delta.sequence,
                    last_applied,
                });
            }
        }
        if !self.registry.contains(delta.component) {
            return Err(SyncError::UnknownComponent(delta.component));
        }
        let entity = self.local_or_create(world, delta.entity);
        self.write(world, entity, delta.entity, delta.component, &delta.fields, delta.sequence)
    }

    /// Detach a component the server removed.
    ///
    /// # Errors
    ///
    /// [`SyncError::StaleDelta`] if a newer update was already applied,
    /// [`SyncError::UnknownComponent`] if the type is not registered.
    pub fn component_removed(
        &mut self,
        world: &mut World,
        net: NetEntity,
        component: ComponentTypeId,
        sequence: u64,
    ) -> Result<(), SyncError> {
        if let Some(last_applied) = self.last_applied(net, component) {
            if sequence < last_applied {
                return Err(SyncError::StaleDelta {
                    entity: net,
                    component,
                    sequence,
                    last_applied,
                });
            }
        }
        let ty = *self
            .registry
            .get(component)
            .ok_or(SyncError::UnknownComponent(component))?;
        if let Some(entity) = self.local_entity(net) {
            ty.detach(world, entity);
        }
        self.applied.remove(&(net, component));
        Ok(())
    }

    /// Discard the replica of an entity that left view. Returns the local
    /// entity that was deleted.
    pub fn entity_left(&mut self, world: &mut World, net: NetEntity) -> Option<Entity> {
        self.applied.retain(|(n, _), _| *n != net);
        let entity = self.to_local.remove(&net)?;
        self.to_net.remove(&entity);
        world.delete_entity(entity);
        Some(entity)
    }

    fn is_stale(&self, net: NetEntity, component: ComponentTypeId, sequence: u64) -> bool {
        self.last_applied(net, component).is_some_and(|last| sequence <= last)
    }

    fn local_or_create(&mut self, world: &mut World, net: NetEntity) -> Entity {
        if let Some(entity) = self.local_entity(net) {
            if world.is_alive(entity) {
                return entity;
            }
            self.to_net.remove(&entity);
        }
        let entity = world.create_entity();
        self.to_local.insert(net, entity);
        self.to_net.insert(entity, net);
        trace!(%net, %entity, "replica created");
        entity
    }

    fn write(
        &mut self,
        world: &mut World,
        entity: Entity,
        net: NetEntity,
        component: ComponentTypeId,
        fields: &FieldMap,
        sequence: u64,
    ) -> Result<(), SyncError> {
        let ty = *self
            .registry
            .get(component)
            .ok_or(SyncError::UnknownComponent(component))?;
        ty.write(world, entity, fields)?;
        self.applied.insert((net, component), sequence);
        world.raise_for_component(entity, component, &mut AfterStateApplied { component });
        Ok(())
    }
}
