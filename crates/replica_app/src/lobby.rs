//! Gives every connected session an avatar and removes it when they leave.
//!
//! The avatar carries the session's [`Actor`] marker and a [`Transform`],
//! so it anchors range-limited interest for that session.

use replica_math::{Transform, Vec2};
use replica_system::session::attached_entities;
use replica_system::{Actor, SessionConnected, SessionDisconnected, System, World};
use tracing::{debug, warn};

/// Where new avatars appear.
pub const SPAWN_POINT: Vec2 = Vec2::ZERO;

/// Avatar lifecycle system.
#[derive(Debug, Default)]
pub struct Lobby;

impl System for Lobby {
    fn name(&self) -> &'static str {
        "lobby"
    }

    fn initialize(&mut self, world: &mut World) {
        world.subscribe_broadcast::<SessionConnected, _>(|world, event| {
            let avatar = world.create_entity();
            let spawned = world
                .add_component(avatar, Actor { session: event.session })
                .and_then(|()| world.add_component(avatar, Transform::from_position(SPAWN_POINT)));
            match spawned {
                Ok(()) => debug!(session = %event.session, %avatar, "avatar spawned"),
                Err(err) => warn!(session = %event.session, error = %err, "avatar spawn failed"),
            }
        });

        world.subscribe_broadcast::<SessionDisconnected, _>(|world, event| {
            if let Some(avatar) = attached_entities(world).get(&event.session).copied() {
                world.delete_entity(avatar);
                debug!(session = %event.session, %avatar, "avatar removed");
            }
        });
    }
}
