//! Dense per-type component storage.
//!
//! Each component type gets one [`Column`]: a packed `Vec<T>` with a parallel
//! vector of owning entities and a sparse entity → row index. Removal is a
//! swap-remove, so rows stay packed for iteration. The [`ComponentStore`]
//! owns one type-erased column per registered type plus the per-entity list
//! of attached component types.

use std::any::Any;
use std::collections::HashMap;

use crate::component::{Component, ComponentMeta, ComponentTypeId};
use crate::entity::Entity;
use crate::error::EcsError;

/// Packed storage for every instance of one component type.
#[derive(Debug)]
pub struct Column<T> {
    meta: ComponentMeta,
    entities: Vec<Entity>,
    data: Vec<T>,
    index: HashMap<Entity, usize>,
}

impl<T: Component> Column<T> {
    /// Create a new empty column.
    #[must_use]
    pub fn new() -> Self {
        Self {
            meta: T::meta(),
            entities: Vec::new(),
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a value for `entity`. Returns the value back if the entity
    /// already has one.
    pub fn insert(&mut self, entity: Entity, value: T) -> Result<&mut T, T> {
        if self.index.contains_key(&entity) {
            return Err(value);
        }
        let row = self.data.len();
        self.entities.push(entity);
        self.data.push(value);
        self.index.insert(entity, row);
        Ok(&mut self.data[row])
    }

    /// Remove and return the value stored for `entity`.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let row = self.index.remove(&entity)?;
        self.entities.swap_remove(row);
        let value = self.data.swap_remove(row);
        if let Some(&moved) = self.entities.get(row) {
            self.index.insert(moved, row);
        }
        Some(value)
    }

    /// Returns a reference to the value stored for `entity`.
    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.index.get(&entity).map(|&row| &self.data[row])
    }

    /// Returns a mutable reference to the value stored for `entity`.
    #[must_use]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.index.get(&entity).map(|&row| &mut self.data[row])
    }

    /// Iterate `(entity, value)` pairs in row order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.data.iter())
    }
}

impl<T: Component> Default for Column<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view of a [`Column`].
pub trait AnyColumn: Send + Sync {
    /// Metadata of the stored component type.
    fn meta(&self) -> &ComponentMeta;
    /// The Rust type name stored in this column, for collision diagnostics.
    fn rust_type(&self) -> &'static str;
    /// Whether `entity` has a value in this column.
    fn contains(&self, entity: Entity) -> bool;
    /// Drop the value stored for `entity`. Returns `true` if one existed.
    fn remove_erased(&mut self, entity: Entity) -> bool;
    /// Entities with a value in this column, in row order.
    fn entities(&self) -> &[Entity];
    /// Upcast for downcasting to the concrete column.
    fn as_any(&self) -> &dyn Any;
    /// Mutable upcast for downcasting to the concrete column.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> AnyColumn for Column<T> {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    fn rust_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn contains(&self, entity: Entity) -> bool {
        self.index.contains_key(&entity)
    }

    fn remove_erased(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn entities(&self) -> &[Entity] {
        &self.entities
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// All component columns plus the set of live entities.
///
/// The store does not raise events; the world wraps it and is responsible
/// for lifecycle notifications.
#[derive(Default)]
pub struct ComponentStore {
    columns: HashMap<ComponentTypeId, Box<dyn AnyColumn>>,
    entity_components: HashMap<Entity, Vec<ComponentTypeId>>,
}

impl ComponentStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entity` as alive with no components.
    pub fn insert_entity(&mut self, entity: Entity) {
        self.entity_components.entry(entity).or_default();
    }

    /// Returns `true` if `entity` is alive in this store.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entity_components.contains_key(&entity)
    }

    /// Remove `entity` and all of its components. Returns the component
    /// types it had, in attach order, or `None` if it was not alive.
    pub fn remove_entity(&mut self, entity: Entity) -> Option<Vec<ComponentTypeId>> {
        let types = self.entity_components.remove(&entity)?;
        for type_id in &types {
            if let Some(column) = self.columns.get_mut(type_id) {
                column.remove_erased(entity);
            }
        }
        Some(types)
    }

    /// Component types attached to `entity`, in attach order.
    #[must_use]
    pub fn components_of(&self, entity: Entity) -> &[ComponentTypeId] {
        self.entity_components
            .get(&entity)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Iterate all live entities.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entity_components.keys().copied()
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entity_components.len()
    }

    /// Attach `value` to `entity`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::NoSuchEntity`] if the entity is not alive.
    /// - [`EcsError::DuplicateComponent`] if a `T` is already attached.
    /// - [`EcsError::TypeNameCollision`] if another Rust type already uses
    ///   `T`'s component name.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) -> Result<&mut T, EcsError> {
        let type_id = T::component_type_id();
        let Some(types) = self.entity_components.get_mut(&entity) else {
            return Err(EcsError::NoSuchEntity(entity));
        };
        let column = self
            .columns
            .entry(type_id)
            .or_insert_with(|| Box::new(Column::<T>::new()));
        let existing = column.rust_type();
        let Some(column) = column.as_any_mut().downcast_mut::<Column<T>>() else {
            return Err(EcsError::TypeNameCollision {
                id: type_id,
                existing,
                requested: std::any::type_name::<T>(),
            });
        };
        match column.insert(entity, value) {
            Ok(slot) => {
                types.push(type_id);
                Ok(slot)
            }
            Err(_) => Err(EcsError::DuplicateComponent {
                entity,
                name: T::type_name(),
            }),
        }
    }

    /// Detach and return the `T` on `entity`, if any.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let value = self.column_mut::<T>()?.remove(entity)?;
        self.forget_type(entity, T::component_type_id());
        Some(value)
    }

    /// Detach a component by type id without knowing its Rust type.
    pub fn remove_by_id(&mut self, entity: Entity, type_id: ComponentTypeId) -> bool {
        let removed = self
            .columns
            .get_mut(&type_id)
            .is_some_and(|column| column.remove_erased(entity));
        if removed {
            self.forget_type(entity, type_id);
        }
        removed
    }

    fn forget_type(&mut self, entity: Entity, type_id: ComponentTypeId) {
        if let Some(types) = self.entity_components.get_mut(&entity) {
            types.retain(|&t| t != type_id);
        }
    }

    /// Returns `true` if `entity` has a `T`.
    #[must_use]
    pub fn contains<T: Component>(&self, entity: Entity) -> bool {
        self.contains_id(entity, T::component_type_id())
    }

    /// Returns `true` if `entity` has a component with the given type id.
    #[must_use]
    pub fn contains_id(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.columns
            .get(&type_id)
            .is_some_and(|column| column.contains(entity))
    }

    /// Returns the `T` on `entity`.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.column::<T>()?.get(entity)
    }

    /// Returns the `T` on `entity` mutably.
    #[must_use]
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.column_mut::<T>()?.get_mut(entity)
    }

    /// Returns the typed column for `T`, if any instance was ever stored.
    #[must_use]
    pub fn column<T: Component>(&self) -> Option<&Column<T>> {
        self.columns
            .get(&T::component_type_id())?
            .as_any()
            .downcast_ref::<Column<T>>()
    }

    fn column_mut<T: Component>(&mut self) -> Option<&mut Column<T>> {
        self.columns
            .get_mut(&T::component_type_id())?
            .as_any_mut()
            .downcast_mut::<Column<T>>()
    }

    /// Entities that have a component with the given type id.
    #[must_use]
    pub fn entities_with(&self, type_id: ComponentTypeId) -> &[Entity] {
        self.columns
            .get(&type_id)
            .map(|column| column.entities())
            .unwrap_or_default()
    }

    /// Metadata for a stored component type.
    #[must_use]
    pub fn meta(&self, type_id: ComponentTypeId) -> Option<&ComponentMeta> {
        self.columns.get(&type_id).map(|column| column.meta())
    }
}

impl std::fmt::Debug for ComponentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentStore")
            .field("columns", &self.columns.len())
            .field("entities", &self.entity_components.len())
            .finish()
    }
}
