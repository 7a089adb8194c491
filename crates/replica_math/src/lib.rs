//! # replica_math
//!
//! Spatial types for the replicated ECS. Re-exports [`glam`] for linear
//! algebra and defines [`Transform`], the networked position component used
//! by range-based recipient filters and interest management.

pub mod transform;

pub use glam::{Mat3, Vec2};

pub use transform::Transform;
