//! 2D transform component.
//!
//! [`Transform`] places an entity on the station plane. It replicates to
//! clients and is what range-limited networking (`InRange` filters, interest
//! radius) measures distance with.

use glam::{Mat3, Vec2};
use serde::{Deserialize, Serialize};

/// A 2D transform: world position and rotation in radians.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    /// World-space position.
    pub position: Vec2,
    /// Rotation in radians, counter-clockwise.
    pub rotation: f32,
}

impl Transform {
    /// The identity transform: origin, no rotation.
    pub const IDENTITY: Self = Self {
        position: Vec2::ZERO,
        rotation: 0.0,
    };

    /// Create a transform at `position` with no rotation.
    #[must_use]
    pub fn from_position(position: Vec2) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Compute the 3×3 affine matrix for this transform.
    #[must_use]
    pub fn to_matrix(&self) -> Mat3 {
        Mat3::from_scale_angle_translation(Vec2::ONE, self.rotation, self.position)
    }

    /// Translate the transform by the given offset.
    #[must_use]
    pub fn translated(mut self, offset: Vec2) -> Self {
        self.position += offset;
        self
    }

    /// Rotate the transform by `radians`.
    #[must_use]
    pub fn rotated(mut self, radians: f32) -> Self {
        self.rotation += radians;
        self
    }

    /// Euclidean distance between two transforms' positions.
    #[must_use]
    pub fn distance(&self, other: &Transform) -> f32 {
        self.position.distance(other.position)
    }

    /// Returns `true` if `other` lies within `range` (inclusive).
    #[must_use]
    pub fn within_range(&self, other: &Transform, range: f32) -> bool {
        self.position.distance_squared(other.position) <= range * range
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

replica_component::networked!(Transform, "Transform");

#[cfg(test)]
mod tests {
    use replica_component::{Component, NetworkedComponent, Replication};

    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = Transform::IDENTITY;
        assert_eq!(t.position, Vec2::ZERO);
        assert_eq!(t.rotation, 0.0);
        assert_eq!(t.to_matrix(), Mat3::IDENTITY);
    }

    #[test]
    fn test_translated() {
        let t = Transform::IDENTITY.translated(Vec2::new(5.0, 0.0));
        assert_eq!(t.position, Vec2::new(5.0, 0.0));
    }

    #[test]
    fn test_within_range_is_inclusive() {
        let a = Transform::from_position(Vec2::new(0.0, 0.0));
        let b = Transform::from_position(Vec2::new(3.0, 4.0));
        assert_eq!(a.distance(&b), 5.0);
        assert!(a.within_range(&b, 5.0));
        assert!(!a.within_range(&b, 4.9));
    }

    #[test]
    fn test_transform_is_networked() {
        assert_eq!(Transform::replication(), Replication::Networked);
        let state = Transform::from_position(Vec2::new(1.0, 2.0))
            .get_state()
            .unwrap();
        assert!(state.contains_key("position"));
        assert!(state.contains_key("rotation"));
    }

    #[test]
    fn test_state_roundtrip_into_default() {
        let source = Transform::from_position(Vec2::new(7.5, -2.0)).rotated(1.0);
        let mut replica = Transform::default();
        replica.handle_state(&source.get_state().unwrap()).unwrap();
        assert_eq!(replica, source);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let t = Transform::from_position(Vec2::new(1.0, 2.0));
        let bytes = rmp_serde::to_vec(&t).unwrap();
        let restored: Transform = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(t, restored);
    }
}
