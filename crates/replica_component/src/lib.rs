//! # replica_component
//!
//! The "E" and "C" of the replicated ECS: what an entity is, what a
//! component is, how components are stored and how they are queried.
//!
//! This crate provides:
//!
//! - [`Entity`] and [`EntityAllocator`] — `u64` ids, recycled after a grace period.
//! - [`Component`] — the contract all ECS data must satisfy.
//! - [`NetworkedComponent`] — components whose fields replicate to clients.
//! - [`FieldValue`] — one replicated field, lossless across the wire.
//! - [`ComponentStore`] — dense per-type storage.
//! - [`QueryData`] / [`QuerySnapshot`] — tuple queries with snapshot semantics.

pub mod column;
pub mod component;
pub mod entity;
pub mod error;
pub mod field;
pub mod query;

pub use column::{AnyColumn, Column, ComponentStore};
pub use component::{
    Component, ComponentMeta, ComponentTypeId, FieldMap, NetworkedComponent, Replication,
    diff_fields,
};
pub use entity::{DEFAULT_GRACE_TICKS, Entity, EntityAllocator};
pub use error::{EcsError, StateError};
pub use field::FieldValue;
pub use query::{QueryData, QueryIter, QuerySnapshot, matching_entities};
