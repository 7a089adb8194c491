//! Work that finishes off the simulation thread and lands on it later.
//!
//! [`DeferredQueue::spawn`] runs a job on a worker thread; its result is
//! handed to an `apply` closure that runs on the simulation thread at the
//! start of a later tick, with full access to the world. Cancelling the
//! returned [`TaskHandle`] turns a pending `apply` into a no-op, so a system
//! that shuts down never sees stale results.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, trace};

use crate::schedule::panic_message;
use crate::world::World;

type ApplyFn = Box<dyn FnOnce(&mut World) + Send>;

struct Completed {
    cancelled: Arc<AtomicBool>,
    apply: ApplyFn,
}

/// Cancels a deferred task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Drop the task's `apply` if it has not run yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`TaskHandle::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Cloneable submission side of a [`DeferredQueue`], usable from any thread.
#[derive(Clone)]
pub struct DeferredSender {
    tx: UnboundedSender<Completed>,
}

impl DeferredSender {
    /// Queue `apply` to run on the simulation thread at the next drain.
    pub fn submit(&self, apply: impl FnOnce(&mut World) + Send + 'static) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.enqueue(cancelled.clone(), Box::new(apply));
        TaskHandle { cancelled }
    }

    fn enqueue(&self, cancelled: Arc<AtomicBool>, apply: ApplyFn) {
        if self.tx.send(Completed { cancelled, apply }).is_err() {
            trace!("deferred queue gone, result dropped");
        }
    }
}

impl std::fmt::Debug for DeferredSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredSender").finish_non_exhaustive()
    }
}

/// Results of off-thread work waiting for the simulation thread.
pub struct DeferredQueue {
    sender: DeferredSender,
    rx: UnboundedReceiver<Completed>,
}

impl DeferredQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: DeferredSender { tx },
            rx,
        }
    }

    /// A handle other threads can submit through.
    #[must_use]
    pub fn sender(&self) -> DeferredSender {
        self.sender.clone()
    }

    /// Queue `apply` to run at the next [`DeferredQueue::apply_ready`].
    pub fn submit(&self, apply: impl FnOnce(&mut World) + Send + 'static) -> TaskHandle {
        self.sender.submit(apply)
    }

    /// Run `job` on a worker thread, then `apply` its output on the
    /// simulation thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the worker thread cannot be spawned.
    pub fn spawn<R, J, A>(&self, job: J, apply: A) -> std::io::Result<TaskHandle>
    where
        R: Send + 'static,
        J: FnOnce() -> R + Send + 'static,
        A: FnOnce(&mut World, R) + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = TaskHandle {
            cancelled: cancelled.clone(),
        };
        let sender = self.sender.clone();
        std::thread::Builder::new()
            .name("deferred-job".into())
            .spawn(move || {
                let output = job();
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                sender.enqueue(cancelled, Box::new(move |world: &mut World| apply(world, output)));
            })?;
        Ok(handle)
    }

    /// Run every queued `apply` that was not cancelled. Returns how many
    /// completed; an `apply` that panics is logged and not counted.
    pub fn apply_ready(&mut self, world: &mut World) -> usize {
        let mut applied = 0;
        while let Ok(completed) = self.rx.try_recv() {
            if completed.cancelled.load(Ordering::Acquire) {
                trace!("cancelled deferred result skipped");
                continue;
            }
            let apply = completed.apply;
            match catch_unwind(AssertUnwindSafe(|| apply(world))) {
                Ok(()) => applied += 1,
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!(tick = world.tick(), panic = %reason, "deferred result panicked");
                }
            }
        }
        applied
    }
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredQueue").finish_non_exhaustive()
    }
}
