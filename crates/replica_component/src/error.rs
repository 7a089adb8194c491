//! Component-store error types.

use crate::component::ComponentTypeId;
use crate::entity::Entity;

/// Errors raised by entity and component operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EcsError {
    /// A component of this type is already attached to the entity.
    #[error("{entity} already has component {name}")]
    DuplicateComponent {
        /// The entity the add was attempted on.
        entity: Entity,
        /// Name of the duplicated component type.
        name: &'static str,
    },

    /// A required component is absent.
    #[error("{entity} has no component {name}")]
    MissingComponent {
        /// The entity that was queried.
        entity: Entity,
        /// Name of the missing component type.
        name: &'static str,
    },

    /// The entity was never created or has been deleted.
    #[error("{0} does not exist")]
    NoSuchEntity(Entity),

    /// Two distinct Rust types share a component name.
    #[error("component name collision on id {id}: '{existing}' vs '{requested}'")]
    TypeNameCollision {
        /// The colliding type id.
        id: ComponentTypeId,
        /// Rust type already stored under this id.
        existing: &'static str,
        /// Rust type that attempted to use the same id.
        requested: &'static str,
    },
}

/// Errors raised while extracting or applying networked component state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The component could not be encoded into its field map.
    #[error("state encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The field map could not be decoded back into the component.
    #[error("state decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The component does not serialise to named fields or a unit.
    #[error("component '{0}' does not serialise to named fields")]
    NotAStruct(&'static str),
}
