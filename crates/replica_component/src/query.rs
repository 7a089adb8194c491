//! Component queries.
//!
//! A query names a tuple of component types, e.g. `(Health, Transform)`, and
//! yields every entity that has all of them. Matching entities are captured
//! when the query starts; values are fetched lazily as iteration advances.
//! Entities that lose a component mid-iteration are skipped and entities
//! gaining one are not visited, so callers may mutate the store between
//! steps of a [`QuerySnapshot`] without invalidating it.

use std::marker::PhantomData;

use crate::column::ComponentStore;
use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;

/// A tuple of component types that can be queried together.
pub trait QueryData {
    /// The borrowed values produced for one entity.
    type Item<'w>;

    /// Component types an entity must have to match.
    fn component_types() -> Vec<ComponentTypeId>;

    /// Fetch the values for `entity`, or `None` if any is missing.
    fn fetch(store: &ComponentStore, entity: Entity) -> Option<Self::Item<'_>>;
}

macro_rules! impl_query_data {
    ($($name:ident),+) => {
        impl<$($name: Component),+> QueryData for ($($name,)+) {
            type Item<'w> = ($(&'w $name,)+);

            fn component_types() -> Vec<ComponentTypeId> {
                vec![$($name::component_type_id()),+]
            }

            fn fetch(store: &ComponentStore, entity: Entity) -> Option<Self::Item<'_>> {
                Some(($(store.get::<$name>(entity)?,)+))
            }
        }
    };
}

impl_query_data!(A);
impl_query_data!(A, B);
impl_query_data!(A, B, C);
impl_query_data!(A, B, C, D);

/// Entities that currently have every component in `types`.
///
/// Scans the smallest matching column and filters by the others. Order
/// follows that column's row order.
#[must_use]
pub fn matching_entities(store: &ComponentStore, types: &[ComponentTypeId]) -> Vec<Entity> {
    let Some(smallest) = types
        .iter()
        .min_by_key(|type_id| store.entities_with(**type_id).len())
    else {
        return Vec::new();
    };
    store
        .entities_with(*smallest)
        .iter()
        .copied()
        .filter(|&entity| types.iter().all(|&t| store.contains_id(entity, t)))
        .collect()
}

/// An owned query cursor over the entities that matched at creation time.
///
/// Holding a snapshot does not borrow the store, so the store can be
/// mutated between calls to [`QuerySnapshot::next`].
#[derive(Debug)]
pub struct QuerySnapshot<Q> {
    entities: Vec<Entity>,
    position: usize,
    _query: PhantomData<fn() -> Q>,
}

impl<Q: QueryData> QuerySnapshot<Q> {
    /// Capture the entities currently matching `Q`.
    #[must_use]
    pub fn new(store: &ComponentStore) -> Self {
        Self {
            entities: matching_entities(store, &Q::component_types()),
            position: 0,
            _query: PhantomData,
        }
    }

    /// Advance to the next captured entity that still matches and fetch
    /// its values.
    pub fn next<'w>(&mut self, store: &'w ComponentStore) -> Option<(Entity, Q::Item<'w>)> {
        while let Some(&entity) = self.entities.get(self.position) {
            self.position += 1;
            if let Some(item) = Q::fetch(store, entity) {
                return Some((entity, item));
            }
        }
        None
    }

    /// Advance to the next captured entity that still matches.
    pub fn next_entity(&mut self, store: &ComponentStore) -> Option<Entity> {
        self.next(store).map(|(entity, _)| entity)
    }

    /// Rewind to the first captured entity.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// The entities captured when the snapshot was taken.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Number of captured entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Borrowing iterator form of a query.
#[derive(Debug)]
pub struct QueryIter<'w, Q> {
    store: &'w ComponentStore,
    snapshot: QuerySnapshot<Q>,
}

impl<'w, Q: QueryData> QueryIter<'w, Q> {
    /// Start a query over `store`.
    #[must_use]
    pub fn new(store: &'w ComponentStore) -> Self {
        Self {
            store,
            snapshot: QuerySnapshot::new(store),
        }
    }
}

impl<'w, Q: QueryData> Iterator for QueryIter<'w, Q> {
    type Item = (Entity, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        self.snapshot.next(self.store)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Health(u32);

    impl Component for Health {
        fn type_name() -> &'static str {
            "Health"
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Oxygen(u32);

    impl Component for Oxygen {
        fn type_name() -> &'static str {
            "Oxygen"
        }
    }

    fn populated() -> ComponentStore {
        let mut store = ComponentStore::new();
        for id in 1..=4 {
            store.insert_entity(Entity(id));
            store.insert(Entity(id), Health(id as u32 * 10)).unwrap();
        }
        store.insert(Entity(2), Oxygen(21)).unwrap();
        store.insert(Entity(4), Oxygen(19)).unwrap();
        store
    }

    #[test]
    fn test_single_component_query() {
        let store = populated();
        let found: Vec<_> = QueryIter::<(Health,)>::new(&store)
            .map(|(e, (h,))| (e, h.0))
            .collect();
        assert_eq!(found.len(), 4);
        assert!(found.contains(&(Entity(3), 30)));
    }

    #[test]
    fn test_multi_component_query() {
        let store = populated();
        let mut found: Vec<_> = QueryIter::<(Health, Oxygen)>::new(&store)
            .map(|(e, (h, o))| (e, h.0, o.0))
            .collect();
        found.sort();
        assert_eq!(found, vec![(Entity(2), 20, 21), (Entity(4), 40, 19)]);
    }

    #[test]
    fn test_query_is_restartable() {
        let store = populated();
        let first: Vec<_> = QueryIter::<(Health,)>::new(&store).map(|(e, _)| e).collect();
        let second: Vec<_> = QueryIter::<(Health,)>::new(&store).map(|(e, _)| e).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_snapshot_tolerates_mutation() {
        let mut store = populated();
        let mut snapshot = QuerySnapshot::<(Health,)>::new(&store);
        let mut visited = Vec::new();

        while let Some(entity) = snapshot.next_entity(&store) {
            visited.push(entity);
            if visited.len() == 1 {
                // Strip a not-yet-visited entity and add a brand new one.
                let victim = snapshot.entities()[2];
                store.remove::<Health>(victim);
                store.insert_entity(Entity(99));
                store.insert(Entity(99), Health(0)).unwrap();
            }
        }

        assert_eq!(visited.len(), 3);
        assert!(!visited.contains(&Entity(99)));
    }

    #[test]
    fn test_snapshot_rewind() {
        let store = populated();
        let mut snapshot = QuerySnapshot::<(Oxygen,)>::new(&store);
        assert_eq!(snapshot.len(), 2);
        while snapshot.next(&store).is_some() {}
        snapshot.rewind();
        assert!(snapshot.next(&store).is_some());
    }

    #[test]
    fn test_empty_query_for_unknown_type() {
        let store = ComponentStore::new();
        assert!(QuerySnapshot::<(Health,)>::new(&store).is_empty());
    }
}
