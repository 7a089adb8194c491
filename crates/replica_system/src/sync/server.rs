//! Server-side delta computation and interest management.

use std::collections::{BTreeSet, HashMap};

use replica_component::{ComponentTypeId, Entity, FieldMap, diff_fields};
use replica_math::Transform;
use replica_net::{ComponentDelta, ComponentState, EntitySnapshot, ServerMessage, SessionId};
use tracing::{trace, warn};

use crate::error::SyncError;
use crate::session::{Session, SessionRegistry, attached_entities};
use crate::sync::registry::ReplicationRegistry;
use crate::world::World;

/// Produces replication traffic from a server world.
#[derive(Debug)]
pub struct ServerSynchronizer {
    registry: ReplicationRegistry,
    interest_range: Option<f32>,
    /// Last replicated fields per component, the base for the next diff.
    baselines: HashMap<(Entity, ComponentTypeId), FieldMap>,
}

impl ServerSynchronizer {
    /// Create a synchronizer. `interest_range` limits each session to
    /// entities near its attached entity; `None` replicates everything.
    #[must_use]
    pub fn new(registry: ReplicationRegistry, interest_range: Option<f32>) -> Self {
        Self {
            registry,
            interest_range,
            baselines: HashMap::new(),
        }
    }

    /// The replicated component types.
    #[must_use]
    pub fn registry(&self) -> &ReplicationRegistry {
        &self.registry
    }

    /// Number of components with a recorded baseline.
    #[must_use]
    pub fn baseline_count(&self) -> usize {
        self.baselines.len()
    }

    /// Drain the world's change set and compute this tick's traffic.
    ///
    /// Deletions and removals go first, then deltas for sessions already
    /// viewing the entity, then view changes. An entity entering a view gets
    /// one snapshot of its current state and no separate delta.
    pub fn collect(&mut self, world: &mut World, sessions: &mut SessionRegistry) -> Vec<(SessionId, ServerMessage)> {
        let tick = world.tick();
        let changes = world.take_changes();
        let mut out = Vec::new();

        for &entity in &changes.deleted {
            self.baselines.retain(|(e, _), _| *e != entity);
            for session in sessions.iter_mut() {
                if session.forget(entity) {
                    out.push((session.id(), ServerMessage::EntityLeft { entity: entity.into() }));
                }
            }
        }

        for &(entity, component) in &changes.removed {
            if !self.registry.contains(component) {
                continue;
            }
            self.baselines.remove(&(entity, component));
            for session in sessions.iter().filter(|s| s.sees(entity)) {
                out.push((
                    session.id(),
                    ServerMessage::ComponentRemoved {
                        entity: entity.into(),
                        component,
                        sequence: tick,
                    },
                ));
            }
        }

        for &(entity, component) in &changes.dirty {
            if !self.registry.contains(component) {
                continue;
            }
            let current = match self.read_state(world, entity, component) {
                Ok(Some(fields)) => fields,
                Ok(None) => continue,
                Err(err) => {
                    warn!(%entity, %component, error = %err, "state unreadable, delta skipped");
                    continue;
                }
            };
            let delta = match self.baselines.insert((entity, component), current.clone()) {
                Some(previous) => delta_between(entity, component, tick, &previous, &current),
                // First sighting: the full state, even if it has no fields.
                None => Some(ComponentDelta {
                    entity: entity.into(),
                    component,
                    sequence: tick,
                    fields: current,
                }),
            };
            let Some(delta) = delta else {
                continue;
            };
            for session in sessions.iter().filter(|s| s.sees(entity)) {
                out.push((session.id(), ServerMessage::Delta(delta.clone())));
            }
        }

        self.update_views(world, sessions, tick, &mut out);
        trace!(tick, messages = out.len(), "replication collected");
        out
    }

    /// Delta of `component` on `entity` against `previous`, stamped with
    /// the current tick. `None` if no networked field differs or the entity
    /// does not have the component.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownComponent`] if the type is not replicated,
    /// [`SyncError::State`] if its state cannot be read.
    pub fn compute_delta(
        &self,
        world: &World,
        entity: Entity,
        component: ComponentTypeId,
        previous: &FieldMap,
    ) -> Result<Option<ComponentDelta>, SyncError> {
        let Some(current) = self.read_state(world, entity, component)? else {
            return Ok(None);
        };
        Ok(delta_between(entity, component, world.tick(), previous, &current))
    }

    fn read_state(&self, world: &World, entity: Entity, component: ComponentTypeId) -> Result<Option<FieldMap>, SyncError> {
        let ty = self
            .registry
            .get(component)
            .ok_or(SyncError::UnknownComponent(component))?;
        Ok(ty.read(world, entity).transpose()?)
    }

    fn update_views(
        &self,
        world: &World,
        sessions: &mut SessionRegistry,
        tick: u64,
        out: &mut Vec<(SessionId, ServerMessage)>,
    ) {
        if sessions.is_empty() {
            return;
        }
        let replicated: BTreeSet<Entity> = world
            .entities()
            .filter(|&e| self.registry.is_replicated(world, e))
            .collect();
        let attached = attached_entities(world);

        for session in sessions.iter_mut() {
            let anchor = attached.get(&session.id()).copied();
            let desired = self.interest(world, session, anchor, &replicated);

            for &entity in session.view.difference(&desired) {
                out.push((session.id(), ServerMessage::EntityLeft { entity: entity.into() }));
            }
            for &entity in desired.difference(&session.view) {
                out.push((session.id(), ServerMessage::Snapshot(self.snapshot(world, entity, tick))));
            }
            session.view = desired;
        }
    }

    /// Entities `session` should see this tick.
    fn interest(
        &self,
        world: &World,
        session: &Session,
        anchor: Option<Entity>,
        replicated: &BTreeSet<Entity>,
    ) -> BTreeSet<Entity> {
        let mut desired: BTreeSet<Entity> = match self.interest_range {
            None => replicated.clone(),
            Some(range) => {
                let origin = anchor.and_then(|a| world.get::<Transform>(a));
                replicated
                    .iter()
                    .copied()
                    .filter(|&e| {
                        // Entities without a position are global.
                        Some(e) == anchor
                            || world
                                .get::<Transform>(e)
                                .is_none_or(|t| origin.is_some_and(|o| t.within_range(o, range)))
                    })
                    .collect()
            }
        };
        desired.extend(session.pinned().iter().filter(|e| replicated.contains(e)));
        for hidden in session.hidden() {
            desired.remove(hidden);
        }
        desired
    }

    /// Full networked state of one entity.
    #[must_use]
    pub fn snapshot(&self, world: &World, entity: Entity, tick: u64) -> EntitySnapshot {
        EntitySnapshot {
            entity: entity.into(),
            sequence: tick,
            components: self
                .registry
                .collect_state(world, entity)
                .into_iter()
                .map(|(component, fields)| ComponentState { component, fields })
                .collect(),
        }
    }
}

fn delta_between(
    entity: Entity,
    component: ComponentTypeId,
    sequence: u64,
    previous: &FieldMap,
    current: &FieldMap,
) -> Option<ComponentDelta> {
    let fields = diff_fields(previous, current);
    (!fields.is_empty()).then(|| ComponentDelta {
        entity: entity.into(),
        component,
        sequence,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use replica_component::{Component, FieldValue};
    use replica_math::Vec2;
    use replica_net::{Consumer, NetEntity, spsc};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::session::Actor;
    use crate::world::Role;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Door {
        open: bool,
        locked: bool,
        timer: f32,
    }

    replica_component::networked!(#[fields("open", "locked")] Door, "Door");

    fn setup(range: Option<f32>) -> (World, SessionRegistry, ServerSynchronizer) {
        let mut registry = ReplicationRegistry::new();
        registry.register::<Door>().register::<Transform>();
        (
            World::new(Role::Server),
            SessionRegistry::new(),
            ServerSynchronizer::new(registry, range),
        )
    }

    fn join(sessions: &mut SessionRegistry) -> (SessionId, Consumer<ServerMessage>) {
        let id = SessionId::new_v4();
        let (tx, rx) = spsc();
        sessions.connect(id, tx);
        (id, rx)
    }

    fn door_at(world: &mut World, x: f32) -> Entity {
        let door = world.create_entity();
        world.add_component(door, Door::default()).unwrap();
        world
            .add_component(door, Transform::from_position(Vec2::new(x, 0.0)))
            .unwrap();
        door
    }

    #[test]
    fn test_entering_entity_gets_single_snapshot() {
        let (mut world, mut sessions, mut sync) = setup(None);
        let (id, _rx) = join(&mut sessions);
        let door = door_at(&mut world, 0.0);

        let out = sync.collect(&mut world, &mut sessions);
        assert_eq!(out.len(), 1);
        let (to, ServerMessage::Snapshot(snapshot)) = &out[0] else {
            panic!("expected snapshot, got {out:?}");
        };
        assert_eq!(*to, id);
        assert_eq!(snapshot.entity, NetEntity::from(door));
        assert_eq!(snapshot.components.len(), 2);
        assert!(sessions.get(id).unwrap().sees(door));
    }

    #[test]
    fn test_delta_carries_only_changed_networked_fields() {
        let (mut world, mut sessions, mut sync) = setup(None);
        let (_id, _rx) = join(&mut sessions);
        let door = door_at(&mut world, 0.0);
        sync.collect(&mut world, &mut sessions);
        world.advance_tick();

        let state = world.get_mut::<Door>(door).unwrap();
        state.open = true;
        state.timer = 3.0;
        let out = sync.collect(&mut world, &mut sessions);

        assert_eq!(out.len(), 1);
        let ServerMessage::Delta(delta) = &out[0].1 else {
            panic!("expected delta, got {out:?}");
        };
        assert_eq!(delta.component, Door::component_type_id());
        assert_eq!(delta.sequence, 1);
        assert_eq!(delta.fields.len(), 1);
        assert_eq!(delta.fields["open"], FieldValue::Bool(true));
    }

    #[test]
    fn test_compute_delta_against_previous_state() {
        let (mut world, _sessions, sync) = setup(None);
        let door = door_at(&mut world, 0.0);
        let (_, previous) = sync
            .registry()
            .collect_state(&world, door)
            .into_iter()
            .find(|(id, _)| *id == Door::component_type_id())
            .unwrap();

        assert_eq!(
            sync.compute_delta(&world, door, Door::component_type_id(), &previous).unwrap(),
            None
        );

        world.get_mut::<Door>(door).unwrap().locked = true;
        let delta = sync
            .compute_delta(&world, door, Door::component_type_id(), &previous)
            .unwrap()
            .unwrap();
        assert_eq!(delta.fields.len(), 1);
        assert_eq!(delta.fields["locked"], FieldValue::Bool(true));

        let unknown = ComponentTypeId::from_name("Nope");
        assert!(matches!(
            sync.compute_delta(&world, door, unknown, &previous),
            Err(SyncError::UnknownComponent(id)) if id == unknown
        ));
    }

    #[test]
    fn test_unchanged_write_sends_nothing() {
        let (mut world, mut sessions, mut sync) = setup(None);
        let (_id, _rx) = join(&mut sessions);
        let door = door_at(&mut world, 0.0);
        sync.collect(&mut world, &mut sessions);

        world.get_mut::<Door>(door).unwrap().timer = 9.0;
        assert!(sync.collect(&mut world, &mut sessions).is_empty());
    }

    #[test]
    fn test_removal_and_deletion_reach_viewers() {
        let (mut world, mut sessions, mut sync) = setup(None);
        let (_id, _rx) = join(&mut sessions);
        let door = door_at(&mut world, 0.0);
        sync.collect(&mut world, &mut sessions);

        world.remove_component::<Door>(door);
        let out = sync.collect(&mut world, &mut sessions);
        assert!(matches!(
            out.as_slice(),
            [(_, ServerMessage::ComponentRemoved { component, .. })] if *component == Door::component_type_id()
        ));

        world.delete_entity(door);
        let out = sync.collect(&mut world, &mut sessions);
        assert!(matches!(out.as_slice(), [(_, ServerMessage::EntityLeft { .. })]));
        assert_eq!(sync.baseline_count(), 0);
    }

    #[test]
    fn test_interest_range_follows_attached_entity() {
        let (mut world, mut sessions, mut sync) = setup(Some(10.0));
        let (id, _rx) = join(&mut sessions);
        let player = world.create_entity();
        world.add_component(player, Actor { session: id }).unwrap();
        world.add_component(player, Transform::default()).unwrap();
        let near = door_at(&mut world, 5.0);
        let far = door_at(&mut world, 50.0);

        sync.collect(&mut world, &mut sessions);
        let view = sessions.get(id).unwrap().view().clone();
        assert!(view.contains(&player));
        assert!(view.contains(&near));
        assert!(!view.contains(&far));

        world.advance_tick();
        world.get_mut::<Transform>(player).unwrap().position = Vec2::new(48.0, 0.0);
        let out = sync.collect(&mut world, &mut sessions);
        let left: Vec<_> = out
            .iter()
            .filter_map(|(_, m)| match m {
                ServerMessage::EntityLeft { entity } => Some(*entity),
                _ => None,
            })
            .collect();
        let entered: Vec<_> = out
            .iter()
            .filter_map(|(_, m)| match m {
                ServerMessage::Snapshot(s) => Some(s.entity),
                _ => None,
            })
            .collect();
        assert_eq!(left, vec![NetEntity::from(near)]);
        assert_eq!(entered, vec![NetEntity::from(far)]);
    }

    #[test]
    fn test_hidden_entity_never_replicates() {
        let (mut world, mut sessions, mut sync) = setup(None);
        let (id, _rx) = join(&mut sessions);
        let secret = door_at(&mut world, 0.0);
        sessions.hide(id, secret);
        assert!(sync.collect(&mut world, &mut sessions).is_empty());

        sessions.reset_visibility(id, secret);
        assert_eq!(sync.collect(&mut world, &mut sessions).len(), 1);
    }

    #[test]
    fn test_visibility_override_dies_with_entity() {
        let (_, mut sessions, mut sync) = setup(None);
        let config = crate::config::RuntimeConfig::new().with_entity_grace_ticks(1);
        let mut world = World::with_config(Role::Server, &config);
        let (id, _rx) = join(&mut sessions);
        let secret = door_at(&mut world, 0.0);
        let pinned = door_at(&mut world, 1.0);
        sessions.hide(id, secret);
        sessions.pin(id, pinned);
        sync.collect(&mut world, &mut sessions);

        world.delete_entity(secret);
        world.delete_entity(pinned);
        sync.collect(&mut world, &mut sessions);
        let session = sessions.get(id).unwrap();
        assert!(session.hidden().is_empty());
        assert!(session.pinned().is_empty());

        world.advance_tick();
        let fresh = door_at(&mut world, 0.0);
        assert!(fresh == secret || fresh == pinned);
        sync.collect(&mut world, &mut sessions);
        assert!(sessions.get(id).unwrap().sees(fresh));
    }

    #[test]
    fn test_late_joiner_gets_current_state() {
        let (mut world, mut sessions, mut sync) = setup(None);
        let door = door_at(&mut world, 0.0);
        sync.collect(&mut world, &mut sessions);
        world.get_mut::<Door>(door).unwrap().locked = true;
        sync.collect(&mut world, &mut sessions);

        let (_id, _rx) = join(&mut sessions);
        let out = sync.collect(&mut world, &mut sessions);
        let ServerMessage::Snapshot(snapshot) = &out[0].1 else {
            panic!("expected snapshot");
        };
        let door_state = snapshot
            .components
            .iter()
            .find(|c| c.component == Door::component_type_id())
            .unwrap();
        assert_eq!(door_state.fields["locked"], FieldValue::Bool(true));
        assert!(!door_state.fields.contains_key("timer"));
    }
}
