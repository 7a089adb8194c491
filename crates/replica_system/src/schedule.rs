//! System scheduler.
//!
//! Systems are long-lived objects with a lifecycle: `initialize` once (where
//! they subscribe to events), `update` once per tick, `shutdown` once. The
//! scheduler orders them by their declared `after` / `before` constraints
//! using a topological sort; systems with no constraint between them run in
//! ascending `priority`, then registration order.
//!
//! A system whose `update` fails or panics is logged and skipped for that
//! tick; the remaining systems still run.

use std::collections::{BTreeSet, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, error, info};

use crate::error::ScheduleError;
use crate::event::Subscription;
use crate::world::World;

/// A unit of simulation logic.
pub trait System: Send {
    /// Unique name, used for ordering constraints and logs.
    fn name(&self) -> &'static str;

    /// Systems that must update before this one.
    fn after(&self) -> &'static [&'static str] {
        &[]
    }

    /// Systems that must update after this one.
    fn before(&self) -> &'static [&'static str] {
        &[]
    }

    /// Called once before the first tick. Subscriptions made here are
    /// removed automatically on shutdown.
    fn initialize(&mut self, _world: &mut World) {}

    /// Called once per tick with the elapsed time in seconds.
    ///
    /// # Errors
    ///
    /// Any error is logged by the scheduler; the tick continues.
    fn update(&mut self, _world: &mut World, _dt: f64) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the scheduler shuts down, in reverse update order.
    fn shutdown(&mut self, _world: &mut World) {}
}

/// A system that failed during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFailure {
    /// The failing system.
    pub system: &'static str,
    /// Error text or panic message.
    pub reason: String,
}

/// Outcome of one [`Scheduler::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Systems whose update completed successfully.
    pub succeeded: usize,
    /// Systems whose update returned an error or panicked.
    pub failures: Vec<SystemFailure>,
}

struct Entry {
    system: Box<dyn System>,
    priority: i32,
    initialized: bool,
    subscriptions: Vec<Subscription>,
}

/// Orders and runs [`System`]s.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
    order: Vec<usize>,
}

impl Scheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a system. Lower `priority` runs earlier among unconstrained
    /// systems. Takes effect at the next [`Scheduler::start`].
    pub fn register(&mut self, system: impl System + 'static, priority: i32) {
        self.entries.push(Entry {
            system: Box::new(system),
            priority,
            initialized: false,
            subscriptions: Vec::new(),
        });
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// System names in update order, as of the last successful start.
    #[must_use]
    pub fn update_order(&self) -> Vec<&'static str> {
        self.order.iter().map(|&i| self.entries[i].system.name()).collect()
    }

    /// Compute the update order, then initialize every system not yet
    /// initialized, in registration order.
    ///
    /// # Errors
    ///
    /// - [`ScheduleError::DuplicateSystem`] if two systems share a name.
    /// - [`ScheduleError::UnknownDependency`] if a constraint names an
    ///   unregistered system.
    /// - [`ScheduleError::DependencyCycle`] if constraints are circular.
    ///
    /// No system is initialized when an error is returned.
    pub fn start(&mut self, world: &mut World) -> Result<(), ScheduleError> {
        self.order = self.compute_order()?;
        for entry in &mut self.entries {
            if entry.initialized {
                continue;
            }
            world.event_bus_mut().start_recording();
            entry.system.initialize(world);
            entry.subscriptions = world.event_bus_mut().stop_recording();
            entry.initialized = true;
            debug!(
                system = entry.system.name(),
                subscriptions = entry.subscriptions.len(),
                "system initialized"
            );
        }
        info!(order = ?self.update_order(), "scheduler started");
        Ok(())
    }

    fn compute_order(&self) -> Result<Vec<usize>, ScheduleError> {
        let mut by_name: HashMap<&'static str, usize> = HashMap::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let name = entry.system.name();
            if by_name.insert(name, index).is_some() {
                return Err(ScheduleError::DuplicateSystem(name.to_string()));
            }
        }

        let lookup = |system: &'static str, dependency: &'static str| {
            by_name
                .get(dependency)
                .copied()
                .ok_or_else(|| ScheduleError::UnknownDependency {
                    system: system.to_string(),
                    dependency: dependency.to_string(),
                })
        };

        let count = self.entries.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut indegree = vec![0usize; count];
        for (index, entry) in self.entries.iter().enumerate() {
            let name = entry.system.name();
            for &dependency in entry.system.after() {
                let first = lookup(name, dependency)?;
                successors[first].push(index);
                indegree[index] += 1;
            }
            for &dependent in entry.system.before() {
                let then = lookup(name, dependent)?;
                successors[index].push(then);
                indegree[then] += 1;
            }
        }

        let mut ready: BTreeSet<(i32, usize)> = (0..count)
            .filter(|&i| indegree[i] == 0)
            .map(|i| (self.entries[i].priority, i))
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some((_, index)) = ready.pop_first() {
            order.push(index);
            for &next in &successors[index] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.insert((self.entries[next].priority, next));
                }
            }
        }

        if order.len() < count {
            let systems = (0..count)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.entries[i].system.name().to_string())
                .collect();
            return Err(ScheduleError::DependencyCycle { systems });
        }
        Ok(order)
    }

    /// Update every started system once, in order.
    pub fn tick(&mut self, world: &mut World, dt: f64) -> TickReport {
        let mut report = TickReport::default();
        for &index in &self.order {
            let system = &mut self.entries[index].system;
            let name = system.name();
            let outcome = catch_unwind(AssertUnwindSafe(|| system.update(world, dt)));
            match outcome {
                Ok(Ok(())) => report.succeeded += 1,
                Ok(Err(err)) => {
                    error!(system = name, tick = world.tick(), error = %err, "system update failed");
                    report.failures.push(SystemFailure {
                        system: name,
                        reason: format!("{err:#}"),
                    });
                }
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!(system = name, tick = world.tick(), panic = %reason, "system update panicked");
                    report.failures.push(SystemFailure { system: name, reason });
                }
            }
        }
        report
    }

    /// Shut every started system down in reverse update order and drop
    /// their subscriptions.
    pub fn shutdown(&mut self, world: &mut World) {
        for &index in self.order.iter().rev() {
            let entry = &mut self.entries[index];
            if !entry.initialized {
                continue;
            }
            entry.system.shutdown(world);
            for subscription in entry.subscriptions.drain(..) {
                world.unsubscribe(subscription);
            }
            entry.initialized = false;
            debug!(system = entry.system.name(), "system shut down");
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.entries.iter().map(|e| e.system.name()).collect();
        f.debug_struct("Scheduler")
            .field("systems", &names)
            .field("order", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::event::EntityDeleted;
    use crate::world::Role;

    type Trace = Arc<Mutex<Vec<String>>>;

    struct Probe {
        name: &'static str,
        after: &'static [&'static str],
        before: &'static [&'static str],
        trace: Trace,
        fail: Option<&'static str>,
    }

    impl Probe {
        fn new(name: &'static str, trace: &Trace) -> Self {
            Self {
                name,
                after: &[],
                before: &[],
                trace: trace.clone(),
                fail: None,
            }
        }
    }

    impl System for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn after(&self) -> &'static [&'static str] {
            self.after
        }

        fn before(&self) -> &'static [&'static str] {
            self.before
        }

        fn initialize(&mut self, world: &mut World) {
            let trace = self.trace.clone();
            let name = self.name;
            world.subscribe_broadcast::<EntityDeleted, _>(move |_, _| {
                trace.lock().unwrap().push(format!("{name} saw delete"));
            });
        }

        fn update(&mut self, _world: &mut World, _dt: f64) -> anyhow::Result<()> {
            self.trace.lock().unwrap().push(self.name.to_string());
            match self.fail {
                Some("error") => anyhow::bail!("{} gave up", self.name),
                Some(_) => panic!("{} exploded", self.name),
                None => Ok(()),
            }
        }

        fn shutdown(&mut self, _world: &mut World) {
            self.trace.lock().unwrap().push(format!("{} down", self.name));
        }
    }

    fn taken(trace: &Trace) -> Vec<String> {
        std::mem::take(&mut *trace.lock().unwrap())
    }

    #[test]
    fn test_after_constraint_orders_systems() {
        let trace = Trace::default();
        let mut world = World::new(Role::Server);
        let mut scheduler = Scheduler::new();
        scheduler.register(
            Probe {
                after: &["physics"],
                ..Probe::new("doors", &trace)
            },
            0,
        );
        scheduler.register(Probe::new("physics", &trace), 0);
        scheduler.start(&mut world).unwrap();

        scheduler.tick(&mut world, 0.016);
        assert_eq!(taken(&trace), vec!["physics", "doors"]);
    }

    #[test]
    fn test_before_constraint_and_priority_tiebreak() {
        let trace = Trace::default();
        let mut world = World::new(Role::Server);
        let mut scheduler = Scheduler::new();
        scheduler.register(Probe::new("atmos", &trace), 5);
        scheduler.register(Probe::new("power", &trace), 1);
        scheduler.register(
            Probe {
                before: &["power"],
                ..Probe::new("input", &trace)
            },
            9,
        );
        scheduler.start(&mut world).unwrap();

        // input must precede power; atmos has no constraint and priority 5.
        assert_eq!(scheduler.update_order(), vec!["atmos", "input", "power"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let trace = Trace::default();
        let mut world = World::new(Role::Server);
        let mut scheduler = Scheduler::new();
        scheduler.register(
            Probe {
                after: &["b"],
                ..Probe::new("a", &trace)
            },
            0,
        );
        scheduler.register(
            Probe {
                after: &["a"],
                ..Probe::new("b", &trace)
            },
            0,
        );
        scheduler.register(Probe::new("c", &trace), 0);

        let err = scheduler.start(&mut world).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::DependencyCycle {
                systems: vec!["a".into(), "b".into()]
            }
        );
        assert_eq!(world.event_bus_mut().subscription_count(), 0);
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let trace = Trace::default();
        let mut world = World::new(Role::Server);
        let mut scheduler = Scheduler::new();
        scheduler.register(
            Probe {
                after: &["ghost"],
                ..Probe::new("a", &trace)
            },
            0,
        );
        assert!(matches!(
            scheduler.start(&mut world),
            Err(ScheduleError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let trace = Trace::default();
        let mut world = World::new(Role::Server);
        let mut scheduler = Scheduler::new();
        scheduler.register(Probe::new("a", &trace), 0);
        scheduler.register(Probe::new("a", &trace), 1);
        assert_eq!(
            scheduler.start(&mut world),
            Err(ScheduleError::DuplicateSystem("a".into()))
        );
    }

    #[test]
    fn test_failing_systems_do_not_stop_the_tick() {
        let trace = Trace::default();
        let mut world = World::new(Role::Server);
        let mut scheduler = Scheduler::new();
        scheduler.register(
            Probe {
                fail: Some("error"),
                ..Probe::new("a", &trace)
            },
            0,
        );
        scheduler.register(
            Probe {
                fail: Some("panic"),
                ..Probe::new("b", &trace)
            },
            1,
        );
        scheduler.register(Probe::new("c", &trace), 2);
        scheduler.start(&mut world).unwrap();

        let report = scheduler.tick(&mut world, 0.016);
        assert_eq!(taken(&trace), vec!["a", "b", "c"]);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].reason, "a gave up");
        assert_eq!(report.failures[1].reason, "b exploded");
    }

    #[test]
    fn test_shutdown_reverses_order_and_unsubscribes() {
        let trace = Trace::default();
        let mut world = World::new(Role::Server);
        let mut scheduler = Scheduler::new();
        scheduler.register(Probe::new("first", &trace), 0);
        scheduler.register(Probe::new("second", &trace), 1);
        scheduler.start(&mut world).unwrap();

        let entity = world.create_entity();
        world.delete_entity(entity);
        assert_eq!(taken(&trace), vec!["first saw delete", "second saw delete"]);

        scheduler.shutdown(&mut world);
        assert_eq!(taken(&trace), vec!["second down", "first down"]);

        let entity = world.create_entity();
        world.delete_entity(entity);
        assert!(taken(&trace).is_empty());
    }
}
