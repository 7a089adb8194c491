//! # replica_app — authoritative server
//!
//! Owns the canonical world and replicates it to clients over NATS.
//!
//! ## Startup Sequence
//!
//! 1. Parse configuration from flags and environment.
//! 2. Connect to NATS.
//! 3. Build the runtime, register replicated components and systems.
//! 4. Start the fixed-timestep loop on a blocking simulation thread.
//! 5. Run the I/O bridge on tokio until interrupted or the loop ends.

mod bridge;
mod config;
mod lobby;
mod tick;

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use replica_math::Transform;
use replica_net::{NatsConnection, inbound};
use replica_system::{ReplicationRegistry, ServerRuntime};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bridge::Bridge;
use config::ServerConfig;
use lobby::Lobby;
use tick::TickLoop;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("replica_app=info".parse()?))
        .init();

    let config = ServerConfig::parse();
    info!(?config, "replica server starting");

    let conn = NatsConnection::connect(&config.nats_url, config.subject_prefix.clone()).await?;

    let mut replication = ReplicationRegistry::new();
    replication.register::<Transform>();

    let (inbound_tx, inbound_rx) = inbound();
    let mut runtime = ServerRuntime::new(&config.runtime(), replication, inbound_rx);
    runtime.add_system(Lobby, 0);
    runtime.start().context("system schedule rejected")?;

    let tick_loop = TickLoop::new(config.tick(), runtime);
    let stop = tick_loop.stop_handle();
    let mut simulation = tokio::task::spawn_blocking(move || tick_loop.run());

    let bridge = Bridge::new(conn, inbound_tx, config.session_timeout());
    let finished = tokio::select! {
        joined = &mut simulation => Some(joined),
        result = bridge.run() => {
            if let Err(err) = result {
                error!(error = %err, "bridge failed");
            }
            None
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            None
        }
    };

    stop.store(true, Ordering::Relaxed);
    let runtime = match finished {
        Some(joined) => joined?,
        None => simulation.await?,
    };

    info!(
        tick = runtime.world().tick(),
        sessions = bridge.session_count(),
        "replica server shut down"
    );
    Ok(())
}
