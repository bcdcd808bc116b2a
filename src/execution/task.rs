//! Step-Interruptible Tasks
//!
//! Work handed to a [`Worker`](super::Worker) is expressed as a sequence of
//! steps. The worker consults its cancellation signal and deadline before
//! every step, and [`StepContext::sleep`] wakes early on either, so a task
//! never has to poll for cancellation itself.

use std::error::Error;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Extra wait past the deadline so `elapsed > deadline` holds on wakeup.
const DEADLINE_SLACK: Duration = Duration::from_millis(1);

/// Result of running a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work remains
    Continue,
    /// The task finished normally
    Done,
}

/// Why a task stopped before returning [`Step::Done`].
///
/// Raised inside the worker's own thread; callers only ever see the
/// resulting [`WorkerState`](super::WorkerState).
#[derive(Debug, Error)]
pub enum Interrupt {
    /// Forced stop requested through [`Worker::terminate`](super::Worker::terminate)
    #[error("terminated by request")]
    Terminated,

    /// Soft deadline exceeded
    #[error("timeout, {elapsed:?} > {deadline:?}")]
    Timeout { elapsed: Duration, deadline: Duration },

    /// The task itself failed
    #[error("{0}")]
    Failed(Box<dyn Error + Send + Sync>),
}

impl Interrupt {
    /// Wraps a task error.
    pub fn failed(error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Interrupt::Failed(error.into())
    }
}

/// A unit of work driven step by step on a worker thread.
pub trait Task: Send + 'static {
    /// Runs one step. Long waits should go through [`StepContext::sleep`].
    fn step(&mut self, ctx: &StepContext) -> Result<Step, Interrupt>;
}

/// Task built from a closure, see [`from_fn`].
pub struct FnTask<F>(F);

impl<F> Task for FnTask<F>
where
    F: FnMut(&StepContext) -> Result<Step, Interrupt> + Send + 'static,
{
    fn step(&mut self, ctx: &StepContext) -> Result<Step, Interrupt> {
        (self.0)(ctx)
    }
}

/// Creates a task that calls `f` once per step.
///
/// ```rust
/// use benchwatch::execution::{from_fn, Step};
///
/// let mut remaining = 3;
/// let _task = from_fn(move |_ctx| {
///     remaining -= 1;
///     Ok(if remaining == 0 { Step::Done } else { Step::Continue })
/// });
/// ```
pub fn from_fn<F>(f: F) -> FnTask<F>
where
    F: FnMut(&StepContext) -> Result<Step, Interrupt> + Send + 'static,
{
    FnTask(f)
}

/// Locks a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancellation signal bound to exactly one worker thread.
#[derive(Debug, Default)]
pub(crate) struct CancelSignal {
    raised: Mutex<bool>,
    wakeup: Condvar,
    target: Mutex<Option<ThreadId>>,
}

impl CancelSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records the thread this signal belongs to.
    pub(crate) fn bind(&self, thread: ThreadId) {
        *lock(&self.target) = Some(thread);
    }

    /// Raises the signal if it is bound to `thread`.
    ///
    /// Returns `false` without raising when the binding does not match.
    pub(crate) fn raise_for(&self, thread: ThreadId) -> bool {
        if *lock(&self.target) != Some(thread) {
            return false;
        }
        self.raise();
        true
    }

    /// Raises the signal unconditionally.
    pub(crate) fn raise(&self) {
        *lock(&self.raised) = true;
        self.wakeup.notify_all();
    }

    pub(crate) fn clear(&self) {
        *lock(&self.raised) = false;
    }

    pub(crate) fn is_raised(&self) -> bool {
        *lock(&self.raised)
    }

    /// Blocks until the signal is raised or `until` passes.
    ///
    /// Without `until`, only the signal ends the wait.
    fn wait_until(&self, until: Option<Instant>) {
        let mut raised = lock(&self.raised);
        while !*raised {
            raised = match until {
                None => self.wakeup.wait(raised).unwrap_or_else(PoisonError::into_inner),
                Some(until) => {
                    let now = Instant::now();
                    if now >= until {
                        return;
                    }
                    self.wakeup
                        .wait_timeout(raised, until - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
            };
        }
    }
}

/// Execution context passed to every step of a task.
pub struct StepContext {
    worker: String,
    signal: Arc<CancelSignal>,
    started: Instant,
    deadline: Option<Duration>,
}

impl StepContext {
    /// Starts the clock; called on the worker thread as execution begins.
    pub(crate) fn new(worker: String, signal: Arc<CancelSignal>, deadline: Option<Duration>) -> Self {
        Self {
            worker,
            signal,
            started: Instant::now(),
            deadline,
        }
    }

    /// Name of the worker running this task.
    pub fn worker_name(&self) -> &str {
        &self.worker
    }

    /// Time since the task began executing.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_sub(self.elapsed()))
    }

    /// Returns true once a forced stop has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_raised()
    }

    /// Fails with the pending interrupt, if any.
    ///
    /// A forced stop takes precedence over an expired deadline.
    pub fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.signal.is_raised() {
            return Err(Interrupt::Terminated);
        }
        if let Some(deadline) = self.deadline {
            let elapsed = self.elapsed();
            if elapsed > deadline {
                return Err(Interrupt::Timeout { elapsed, deadline });
            }
        }
        Ok(())
    }

    /// Sleeps for `duration`, waking early on a forced stop or deadline.
    ///
    /// A duration too large to represent as an instant sleeps until one
    /// of those happens.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupt> {
        let wake_at = Instant::now().checked_add(duration);
        let limit = self
            .deadline
            .and_then(|d| self.started.checked_add(d.saturating_add(DEADLINE_SLACK)));

        loop {
            self.checkpoint()?;
            if wake_at.map_or(false, |at| Instant::now() >= at) {
                return Ok(());
            }
            let until = match (wake_at, limit) {
                (Some(wake_at), Some(limit)) => Some(wake_at.min(limit)),
                (wake_at, limit) => wake_at.or(limit),
            };
            self.signal.wait_until(until);
        }
    }
}
