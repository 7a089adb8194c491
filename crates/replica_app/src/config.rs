//! Server configuration.
//!
//! Every setting can come from a CLI flag or an environment variable; flags
//! win. Defaults suit a local NATS server.

use std::time::Duration;

use clap::Parser;
use replica_component::DEFAULT_GRACE_TICKS;
use replica_net::connection::DEFAULT_NATS_URL;
use replica_net::subjects::DEFAULT_PREFIX;
use replica_system::RuntimeConfig;

use crate::tick::{MAX_TICK_RATE, MIN_TICK_RATE, TickConfig};

/// Command-line and environment configuration for `replica_app`.
#[derive(Debug, Clone, Parser)]
#[command(name = "replica_app", about = "Authoritative server for the replicated ECS over NATS")]
pub struct ServerConfig {
    /// Target ticks per second
    #[arg(long, env = "REPLICA_TICK_RATE", default_value_t = 60.0, value_parser = parse_tick_rate)]
    pub tick_rate: f64,

    /// Stop after this many ticks (0 runs until interrupted)
    #[arg(long, env = "REPLICA_MAX_TICKS", default_value_t = 0)]
    pub max_ticks: u64,

    /// NATS server URL
    #[arg(short, long, env = "NATS_URL", default_value = DEFAULT_NATS_URL)]
    pub nats_url: String,

    /// NATS subject prefix
    #[arg(short = 'p', long, env = "REPLICA_SUBJECT_PREFIX", default_value = DEFAULT_PREFIX)]
    pub subject_prefix: String,

    /// Ticks a deleted entity id stays reserved before reuse
    #[arg(long, env = "REPLICA_ENTITY_GRACE_TICKS", default_value_t = DEFAULT_GRACE_TICKS)]
    pub entity_grace_ticks: u64,

    /// Replicate only entities within this distance of a session's actor
    #[arg(long, env = "REPLICA_INTEREST_RANGE")]
    pub interest_range: Option<f32>,

    /// Close sessions silent for this many seconds (0 never closes them)
    #[arg(long, env = "REPLICA_SESSION_TIMEOUT_SECS", default_value_t = DEFAULT_SESSION_TIMEOUT_SECS)]
    pub session_timeout_secs: u64,
}

/// Default idle timeout for sessions, in seconds.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30;

fn parse_tick_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw.parse().map_err(|err| format!("{err}"))?;
    if !(MIN_TICK_RATE..=MAX_TICK_RATE).contains(&rate) {
        return Err(format!("must be between {MIN_TICK_RATE} and {MAX_TICK_RATE}"));
    }
    Ok(rate)
}

impl ServerConfig {
    /// Settings for the simulation runtime.
    #[must_use]
    pub fn runtime(&self) -> RuntimeConfig {
        let config = RuntimeConfig::new().with_entity_grace_ticks(self.entity_grace_ticks);
        match self.interest_range {
            Some(range) => config.with_interest_range(range),
            None => config,
        }
    }

    /// How long a session may stay silent, `None` if forever.
    #[must_use]
    pub fn session_timeout(&self) -> Option<Duration> {
        (self.session_timeout_secs > 0).then(|| Duration::from_secs(self.session_timeout_secs))
    }

    /// Settings for the tick loop.
    #[must_use]
    pub fn tick(&self) -> TickConfig {
        TickConfig {
            tick_rate: self.tick_rate,
            max_ticks: self.max_ticks,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
            nats_url: DEFAULT_NATS_URL.to_string(),
            subject_prefix: DEFAULT_PREFIX.to_string(),
            entity_grace_ticks: DEFAULT_GRACE_TICKS,
            interest_range: None,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}
