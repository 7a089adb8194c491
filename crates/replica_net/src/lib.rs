//! # replica_net
//!
//! Everything that crosses the server/client boundary.
//!
//! This crate provides:
//!
//! - [`messages`] — wire types: snapshots, deltas, events, bound-UI traffic.
//! - [`codec`] — MessagePack serialisation/deserialisation helpers.
//! - [`filter`] — recipient filters for networked events.
//! - [`queue`] — SPSC outboxes and the shared inbound queue.
//! - [`subjects`] — NATS subject layout.
//! - [`connection`] — NATS connection management.
//! - [`error`] — Network-layer error types.

pub mod codec;
pub mod connection;
pub mod error;
pub mod filter;
pub mod messages;
pub mod queue;
pub mod subjects;

pub use codec::{decode, encode, encode_typed};
pub use connection::NatsConnection;
pub use error::NetError;
pub use filter::RecipientFilter;
pub use messages::{
    ClientMessage, ComponentDelta, ComponentState, EntitySnapshot, MessageTypeId, NetEntity,
    NetMessage, ServerMessage, SessionId, TypedPayload, UiKey,
};
pub use queue::{
    Consumer, Inbound, InboundKind, InboundReceiver, InboundSender, Producer, inbound, spsc,
};
