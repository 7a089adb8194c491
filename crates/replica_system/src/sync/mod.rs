//! State replication.
//!
//! The server is the sole authority. At the end of every tick the
//! [`ServerSynchronizer`] turns the world's change set into per-session
//! traffic: field-level deltas for entities a session already sees, full
//! snapshots for entities entering its view, and removals for entities
//! leaving it. The [`ClientSynchronizer`] applies that traffic to a replica
//! world, discarding anything older than what it already applied.
//!
//! Every delta carries the server tick it was computed on as its sequence,
//! so sequences are strictly increasing per (entity, component).

pub mod client;
pub mod registry;
pub mod server;

pub use client::ClientSynchronizer;
pub use registry::{ReplicatedType, ReplicationRegistry};
pub use server::ServerSynchronizer;
