//! Type-erased access to networked components.
//!
//! The synchronizers only see [`ComponentTypeId`]s on the wire. Registering
//! a [`NetworkedComponent`] records plain function pointers, monomorphised
//! for that type, that read, write and detach it through the world.

use std::collections::BTreeMap;

use replica_component::{ComponentTypeId, Entity, FieldMap, NetworkedComponent, StateError};
use tracing::debug;

use crate::error::SyncError;
use crate::world::World;

type ReadFn = fn(&World, Entity) -> Option<Result<FieldMap, StateError>>;
type WriteFn = fn(&mut World, Entity, &FieldMap) -> Result<(), SyncError>;
type DetachFn = fn(&mut World, Entity) -> bool;

/// Function table for one replicated component type.
#[derive(Debug, Clone, Copy)]
pub struct ReplicatedType {
    /// Component name.
    pub name: &'static str,
    read: ReadFn,
    write: WriteFn,
    detach: DetachFn,
}

impl ReplicatedType {
    fn of<C: NetworkedComponent>() -> Self {
        Self {
            name: C::type_name(),
            read: read_state::<C>,
            write: write_state::<C>,
            detach: detach::<C>,
        }
    }

    /// Networked fields of the entity's component, `None` if absent.
    #[must_use]
    pub fn read(&self, world: &World, entity: Entity) -> Option<Result<FieldMap, StateError>> {
        (self.read)(world, entity)
    }

    /// Merge `fields` into the entity's component, attaching a default
    /// instance first if it has none. Nothing changes if the fields do not
    /// fit.
    ///
    /// # Errors
    ///
    /// [`SyncError::Ecs`] if the entity is dead, [`SyncError::State`] if
    /// the fields do not fit the component.
    pub fn write(&self, world: &mut World, entity: Entity, fields: &FieldMap) -> Result<(), SyncError> {
        (self.write)(world, entity, fields)
    }

    /// Detach the component. Returns `false` if it was absent.
    pub fn detach(&self, world: &mut World, entity: Entity) -> bool {
        (self.detach)(world, entity)
    }
}

fn read_state<C: NetworkedComponent>(world: &World, entity: Entity) -> Option<Result<FieldMap, StateError>> {
    world.get::<C>(entity).map(NetworkedComponent::get_state)
}

fn write_state<C: NetworkedComponent>(world: &mut World, entity: Entity, fields: &FieldMap) -> Result<(), SyncError> {
    if let Some(existing) = world.get_mut::<C>(entity) {
        existing.handle_state(fields)?;
        return Ok(());
    }
    // Build off-world so a rejected state never leaves a default behind.
    let mut fresh = C::default();
    fresh.handle_state(fields)?;
    world.add_component(entity, fresh)?;
    Ok(())
}

fn detach<C: NetworkedComponent>(world: &mut World, entity: Entity) -> bool {
    world.remove_component::<C>(entity).is_some()
}

/// Every component type both peers agreed to replicate.
///
/// Server and client must register the same set of types.
#[derive(Debug, Clone, Default)]
pub struct ReplicationRegistry {
    types: BTreeMap<ComponentTypeId, ReplicatedType>,
}

impl ReplicationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a networked component type. Registering twice is harmless.
    pub fn register<C: NetworkedComponent>(&mut self) -> &mut Self {
        let id = C::component_type_id();
        if self.types.insert(id, ReplicatedType::of::<C>()).is_none() {
            debug!(component = C::type_name(), %id, "replicated type registered");
        }
        self
    }

    /// Look up a type.
    #[must_use]
    pub fn get(&self, id: ComponentTypeId) -> Option<&ReplicatedType> {
        self.types.get(&id)
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.types.contains_key(&id)
    }

    /// Registered types in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentTypeId, &ReplicatedType)> {
        self.types.iter().map(|(id, ty)| (*id, ty))
    }

    /// Returns `true` if the entity carries at least one registered type.
    #[must_use]
    pub fn is_replicated(&self, world: &World, entity: Entity) -> bool {
        world
            .components()
            .components_of(entity)
            .iter()
            .any(|id| self.types.contains_key(id))
    }

    /// Current state of every registered component on the entity, in id
    /// order. Components whose state cannot be read are skipped.
    #[must_use]
    pub fn collect_state(&self, world: &World, entity: Entity) -> Vec<(ComponentTypeId, FieldMap)> {
        let mut out = Vec::new();
        for &id in world.components().components_of(entity) {
            let Some(ty) = self.types.get(&id) else {
                continue;
            };
            match ty.read(world, entity) {
                Some(Ok(fields)) => out.push((id, fields)),
                Some(Err(err)) => {
                    tracing::warn!(%entity, component = ty.name, error = %err, "state unreadable");
                }
                None => {}
            }
        }
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

#[cfg(test)]
mod tests {
    use replica_component::Component;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::world::Role;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Battery {
        charge: f32,
        max_charge: f32,
    }

    replica_component::networked!(Battery, "Battery");

    #[test]
    fn test_write_synthesises_default_then_merges() {
        let mut registry = ReplicationRegistry::new();
        registry.register::<Battery>();
        let mut world = World::new(Role::Client);
        let entity = world.create_entity();

        let mut fields = FieldMap::new();
        fields.insert("charge".into(), replica_component::FieldValue::F32(40.0));
        let ty = registry.get(Battery::component_type_id()).unwrap();
        ty.write(&mut world, entity, &fields).unwrap();

        assert_eq!(
            world.get::<Battery>(entity),
            Some(&Battery {
                charge: 40.0,
                max_charge: 0.0
            })
        );
        assert!(registry.is_replicated(&world, entity));
        assert_eq!(registry.collect_state(&world, entity).len(), 1);
        assert!(ty.detach(&mut world, entity));
        assert!(!registry.is_replicated(&world, entity));
    }

    #[test]
    fn test_rejected_write_attaches_nothing() {
        let mut registry = ReplicationRegistry::new();
        registry.register::<Battery>();
        let mut world = World::new(Role::Client);
        let entity = world.create_entity();

        let mut fields = FieldMap::new();
        fields.insert("charge".into(), replica_component::FieldValue::from("full"));
        let ty = registry.get(Battery::component_type_id()).unwrap();
        let err = ty.write(&mut world, entity, &fields).unwrap_err();
        assert!(matches!(err, SyncError::State(_)));
        assert!(!world.has_component::<Battery>(entity));
    }

    #[test]
    fn test_write_to_dead_entity_fails() {
        let mut registry = ReplicationRegistry::new();
        registry.register::<Battery>();
        let mut world = World::new(Role::Client);
        let ty = registry.get(Battery::component_type_id()).unwrap();
        let err = ty.write(&mut world, Entity(77), &FieldMap::new()).unwrap_err();
        assert!(matches!(err, SyncError::Ecs(_)));
    }
}
