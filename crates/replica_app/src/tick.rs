//! Fixed-timestep driver for the server runtime.
//!
//! Each iteration runs one [`ServerRuntime::tick`], then sleeps for whatever
//! remains of the tick budget. Overruns are logged and the next tick starts
//! immediately; the loop never tries to catch up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use replica_system::ServerRuntime;
use tracing::{debug, error, info, warn};

/// Slowest accepted tick rate, in ticks per second.
pub const MIN_TICK_RATE: f64 = 0.01;

/// Fastest accepted tick rate, in ticks per second.
pub const MAX_TICK_RATE: f64 = 10_000.0;

const DEFAULT_TICK_RATE: f64 = 60.0;

/// Configuration for the tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_ticks: 0,
        }
    }
}

impl TickConfig {
    /// Wall-clock budget of one tick. A rate outside
    /// [`MIN_TICK_RATE`]..=[`MAX_TICK_RATE`] falls back to the default.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        let rate = if (MIN_TICK_RATE..=MAX_TICK_RATE).contains(&self.tick_rate) {
            self.tick_rate
        } else {
            warn!(tick_rate = self.tick_rate, fallback = DEFAULT_TICK_RATE, "tick rate out of range");
            DEFAULT_TICK_RATE
        };
        Duration::from_secs_f64(1.0 / rate)
    }
}

/// Owns the runtime for the lifetime of the simulation thread.
#[derive(Debug)]
pub struct TickLoop {
    config: TickConfig,
    runtime: ServerRuntime,
    stop: Arc<AtomicBool>,
    ticks_run: u64,
}

impl TickLoop {
    /// Wrap a started runtime.
    #[must_use]
    pub fn new(config: TickConfig, runtime: ServerRuntime) -> Self {
        Self {
            config,
            runtime,
            stop: Arc::new(AtomicBool::new(false)),
            ticks_run: 0,
        }
    }

    /// Flag that ends the loop after the current tick when set.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Ticks run so far.
    #[must_use]
    pub fn ticks_run(&self) -> u64 {
        self.ticks_run
    }

    /// The driven runtime.
    #[must_use]
    pub fn runtime(&self) -> &ServerRuntime {
        &self.runtime
    }

    /// Run one tick and log any system failures.
    pub fn step(&mut self, dt: f64) {
        let report = self.runtime.tick(dt);
        for failure in &report.failures {
            error!(
                tick = self.runtime.world().tick(),
                system = failure.system,
                reason = %failure.reason,
                "system failed"
            );
        }
        self.ticks_run += 1;
    }

    /// Run until `max_ticks` is reached or the stop flag is set, then shut
    /// the runtime down and hand it back.
    pub fn run(mut self) -> ServerRuntime {
        let tick_duration = self.config.tick_duration();
        let dt = tick_duration.as_secs_f64();

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        while !self.stop.load(Ordering::Relaxed) {
            let start = Instant::now();
            self.step(dt);

            if self.config.max_ticks > 0 && self.ticks_run >= self.config.max_ticks {
                info!(ticks = self.ticks_run, "tick loop complete");
                break;
            }

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            } else {
                warn!(
                    tick = self.runtime.world().tick(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }

        debug!(ticks = self.ticks_run, "tick loop exiting");
        self.runtime.shutdown();
        self.runtime
    }
}
