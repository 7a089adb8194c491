//! # replica_system
//!
//! The simulation runtime of the replicated ECS.
//!
//! This crate provides:
//!
//! - [`World`] — entities, components, the event bus and per-tick bookkeeping.
//! - [`Scheduler`] / [`System`] — ordered, fault-isolated simulation logic.
//! - [`sync`] — server-side delta computation and client-side application.
//! - [`BoundUiServer`] / [`BoundUiClient`] — entity-bound user interfaces.
//! - [`DeferredQueue`] — off-thread work that lands back on the simulation.
//! - [`ServerRuntime`] / [`ClientRuntime`] — the tick pipelines tying it
//!   all together.
//!
//! ## Usage
//!
//! ```rust
//! use replica_net::inbound;
//! use replica_system::{ReplicationRegistry, RuntimeConfig, ServerRuntime, System, World};
//!
//! struct Clock;
//!
//! impl System for Clock {
//!     fn name(&self) -> &'static str {
//!         "clock"
//!     }
//!
//!     fn update(&mut self, world: &mut World, _dt: f64) -> anyhow::Result<()> {
//!         tracing::trace!(tick = world.tick(), "tick");
//!         Ok(())
//!     }
//! }
//!
//! let (_tx, rx) = inbound();
//! let mut server = ServerRuntime::new(&RuntimeConfig::default(), ReplicationRegistry::new(), rx);
//! server.add_system(Clock, 0);
//! server.start().unwrap();
//! let report = server.tick(1.0 / 60.0);
//! assert_eq!(report.succeeded, 1);
//! ```

pub mod client;
pub mod config;
pub mod deferred;
pub mod error;
pub mod event;
pub mod schedule;
pub mod server;
pub mod session;
pub mod sync;
pub mod ui;
pub mod world;

pub use client::ClientRuntime;
pub use config::RuntimeConfig;
pub use deferred::{DeferredQueue, DeferredSender, TaskHandle};
pub use error::{ScheduleError, SyncError, UiError};
pub use event::{
    AfterStateApplied, Cancellable, ComponentAdded, ComponentRemoved, ComponentStartup, EntityDeleted, EventBus,
    Origin, SessionConnected, SessionDisconnected, Subscription,
};
pub use schedule::{Scheduler, System, SystemFailure, TickReport};
pub use server::ServerRuntime;
pub use session::{Actor, Session, SessionRegistry};
pub use sync::{ClientSynchronizer, ReplicationRegistry, ServerSynchronizer};
pub use ui::{BoundUiClient, BoundUiServer, UiClosed, UiMessageEvent, UiOpened, UiStateReceived};
pub use world::{ChangeSet, Outgoing, Role, World};
