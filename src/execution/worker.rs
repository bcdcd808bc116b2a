//! Cancellable Worker
//!
//! Runs a [`Task`] on its own OS thread with support for:
//! - Forced stop from outside the task's control flow
//! - An optional soft deadline enforced between steps and inside waits
//! - Reuse of the same handle once the previous thread has been joined
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Running -> { Completed | TimedOut | ForciblyStopped | Failed } -> Idle
//! ```
//!
//! Terminal states return to `Idle` only when [`Worker::join`] (or
//! [`Worker::detach`]) observes the thread.

use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::task::{lock, CancelSignal, Interrupt, Step, StepContext, Task};

/// State of a worker handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum WorkerState {
    /// No thread associated
    Idle,
    /// Thread running the task
    Running,
    /// Task returned `Step::Done`
    Completed,
    /// Soft deadline exceeded
    TimedOut,
    /// Stopped through `terminate`
    ForciblyStopped,
    /// Task returned an error or panicked
    Failed(String),
}

impl WorkerState {
    /// Returns true for states a running thread ends in.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerState::Idle | WorkerState::Running)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Completed => write!(f, "completed"),
            WorkerState::TimedOut => write!(f, "timed out"),
            WorkerState::ForciblyStopped => write!(f, "forcibly stopped"),
            WorkerState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of a [`Worker::terminate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The stop signal was delivered to the running thread
    Signalled,
    /// The thread had already exited; nothing was delivered
    AlreadyExited,
    /// No thread is associated with the handle
    NothingToTerminate,
}

/// Errors raised by worker handle operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The stop signal could not be tied to exactly the worker's thread.
    #[error("failed to deliver stop signal to worker '{name}': {reason}")]
    DeliveryFailure { name: String, reason: String },

    /// The OS refused to create the thread.
    #[error("failed to spawn worker '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Exit record shared by a run's thread and everyone joining it.
struct RunStatus {
    state: Mutex<WorkerState>,
    exited: Mutex<bool>,
    exit: Condvar,
}

impl RunStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Running),
            exited: Mutex::new(false),
            exit: Condvar::new(),
        }
    }

    fn state(&self) -> WorkerState {
        lock(&self.state).clone()
    }

    fn set(&self, state: WorkerState) {
        *lock(&self.state) = state;
    }

    fn has_exited(&self) -> bool {
        *lock(&self.exited)
    }

    fn mark_exited(&self) {
        *lock(&self.exited) = true;
        self.exit.notify_all();
    }

    /// Blocks until the thread has exited or `until` passes.
    ///
    /// Waits without a limit when `until` is `None`. Returns whether the
    /// thread has exited.
    fn wait_exit(&self, until: Option<Instant>) -> bool {
        let mut exited = lock(&self.exited);
        while !*exited {
            exited = match until {
                None => self.exit.wait(exited).unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(until) => {
                    let now = Instant::now();
                    if now >= until {
                        return false;
                    }
                    self.exit
                        .wait_timeout(exited, until - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
            };
        }
        true
    }
}

/// Marks the run exited once everything the task owned has been dropped,
/// including while unwinding from a panic.
struct ExitGuard(Arc<RunStatus>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.set(WorkerState::Failed("worker panicked".to_string()));
        }
        self.0.mark_exited();
    }
}

/// Bookkeeping for the thread currently associated with a handle.
struct Run {
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    signal: Arc<CancelSignal>,
    status: Arc<RunStatus>,
    started_at: Instant,
    deadline: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    run: Option<Run>,
    last: Option<WorkerState>,
}

/// Handle owning at most one background thread at a time.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use benchwatch::execution::{from_fn, Step, Worker, WorkerState};
///
/// let worker = Worker::new("sleeper");
/// worker
///     .start(from_fn(|ctx| {
///         ctx.sleep(Duration::from_secs(60))?;
///         Ok(Step::Done)
///     }), None)
///     .unwrap();
///
/// worker.terminate().unwrap();
/// assert_eq!(worker.join(), WorkerState::ForciblyStopped);
/// ```
pub struct Worker {
    name: String,
    inner: Mutex<Inner>,
}

impl Worker {
    /// Creates an idle worker. The name is also used for its threads.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts `task` on a new thread and returns immediately.
    ///
    /// Returns `Ok(false)` without starting anything if a thread is
    /// still running on this handle. A thread that already exited but was
    /// never joined is reaped first.
    ///
    /// With a `deadline`, the task is interrupted once its elapsed time,
    /// measured from the moment it begins executing, exceeds the deadline.
    pub fn start<T: Task>(&self, task: T, deadline: Option<Duration>) -> Result<bool, WorkerError> {
        let mut inner = lock(&self.inner);

        if let Some(run) = &inner.run {
            if !run.status.has_exited() {
                debug!("Worker '{}' already running - start ignored", self.name);
                return Ok(false);
            }
            let previous = self.reap(&mut inner);
            debug!("Reaped previous run of worker '{}' ({})", self.name, previous);
        }

        let signal = Arc::new(CancelSignal::new());
        let status = Arc::new(RunStatus::new());

        let thread_name = self.name.clone();
        let thread_signal = Arc::clone(&signal);
        let thread_status = Arc::clone(&status);

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                // Declared first so it drops after the task and context
                let exit = ExitGuard(thread_status);
                let ctx = StepContext::new(thread_name, thread_signal, deadline);
                let outcome = drive(task, &ctx);
                exit.0.set(settle(ctx.worker_name(), outcome));
            })
            .map_err(|source| WorkerError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        let thread_id = handle.thread().id();
        signal.bind(thread_id);

        match deadline {
            Some(limit) => info!("Worker '{}' started (deadline: {:.2?})", self.name, limit),
            None => info!("Worker '{}' started", self.name),
        }

        inner.run = Some(Run {
            thread: Some(handle),
            thread_id,
            signal,
            status,
            started_at: Instant::now(),
            deadline,
        });

        Ok(true)
    }

    /// Requests a forced stop of the running thread without waiting for it.
    ///
    /// The task is interrupted at its next step boundary or inside any
    /// [`StepContext::sleep`]. Follow with [`Worker::join`] before reusing
    /// anything the task touched.
    pub fn terminate(&self) -> Result<TerminateOutcome, WorkerError> {
        let inner = lock(&self.inner);

        let Some(run) = &inner.run else {
            info!("No thread found for worker '{}' - nothing to terminate", self.name);
            return Ok(TerminateOutcome::NothingToTerminate);
        };

        if run.status.has_exited() {
            debug!("Worker '{}' already exited", self.name);
            return Ok(TerminateOutcome::AlreadyExited);
        }

        if !run.signal.raise_for(run.thread_id) {
            run.signal.clear();
            return Err(WorkerError::DeliveryFailure {
                name: self.name.clone(),
                reason: format!("signal is not bound to thread {:?}", run.thread_id),
            });
        }

        info!("Termination requested for worker '{}'", self.name);
        Ok(TerminateOutcome::Signalled)
    }

    /// Blocks until the worker thread exits and returns the state it ended in.
    ///
    /// Resets the handle to `Idle`. Concurrent callers all wait for the
    /// same exit and receive the same state. Returns `Idle` when no thread
    /// is associated.
    pub fn join(&self) -> WorkerState {
        let (status, handle) = {
            let mut inner = lock(&self.inner);
            let Some(run) = inner.run.as_mut() else {
                return WorkerState::Idle;
            };
            (Arc::clone(&run.status), run.thread.take())
        };

        self.await_run(&status, handle)
    }

    /// Like [`Worker::join`] but gives up after `grace`.
    ///
    /// Returns `None` if the thread is still running; it stays associated.
    pub fn join_timeout(&self, grace: Duration) -> Option<WorkerState> {
        let status = match &lock(&self.inner).run {
            Some(run) => Arc::clone(&run.status),
            None => return Some(WorkerState::Idle),
        };

        if !status.wait_exit(Instant::now().checked_add(grace)) {
            return None;
        }

        let handle = {
            let mut inner = lock(&self.inner);
            match inner.run.as_mut() {
                Some(run) if Arc::ptr_eq(&run.status, &status) => run.thread.take(),
                _ => None,
            }
        };
        Some(self.await_run(&status, handle))
    }

    /// Forgets a thread that did not exit after being signalled.
    ///
    /// The thread keeps running unobserved until its task reaches a step
    /// boundary. Only use this when [`Worker::join_timeout`] gave up.
    pub fn detach(&self) -> bool {
        let mut inner = lock(&self.inner);

        let Some(run) = inner.run.take() else {
            return false;
        };

        run.signal.raise();
        warn!(
            "Detaching worker '{}' after {:.2?} - its thread is no longer tracked",
            self.name,
            run.started_at.elapsed()
        );
        inner.last = Some(WorkerState::ForciblyStopped);
        true
    }

    /// Current state of the handle.
    pub fn state(&self) -> WorkerState {
        let inner = lock(&self.inner);
        match &inner.run {
            Some(run) => run.status.state(),
            None => WorkerState::Idle,
        }
    }

    /// State the most recently joined or detached run ended in.
    pub fn last_outcome(&self) -> Option<WorkerState> {
        lock(&self.inner).last.clone()
    }

    /// Returns true while the associated thread has not exited.
    pub fn is_running(&self) -> bool {
        let inner = lock(&self.inner);
        inner.run.as_ref().map_or(false, |run| !run.status.has_exited())
    }

    /// Time since the current run was started.
    pub fn runtime(&self) -> Option<Duration> {
        lock(&self.inner).run.as_ref().map(|run| run.started_at.elapsed())
    }

    /// Deadline of the current run, if any.
    pub fn deadline(&self) -> Option<Duration> {
        lock(&self.inner).run.as_ref().and_then(|run| run.deadline)
    }

    /// Joins an exited thread still held by the handle.
    fn reap(&self, inner: &mut Inner) -> WorkerState {
        let Some(run) = inner.run.as_mut() else {
            return WorkerState::Idle;
        };
        let status = Arc::clone(&run.status);
        let panicked = run.thread.take().map_or(false, |handle| handle.join().is_err());
        self.finish(inner, &status, panicked)
    }

    /// Waits for the run owning `status` to exit.
    ///
    /// Only the caller holding `handle` joins the OS thread and resets the
    /// handle; everyone else waits for the exit record.
    fn await_run(&self, status: &Arc<RunStatus>, handle: Option<JoinHandle<()>>) -> WorkerState {
        let Some(handle) = handle else {
            status.wait_exit(None);
            return status.state();
        };

        // The run stays registered while joining so `terminate` still reaches it
        let panicked = handle.join().is_err();

        let mut inner = lock(&self.inner);
        self.finish(&mut inner, status, panicked)
    }

    /// Records the final state of the run owning `status` and returns to `Idle`.
    ///
    /// Leaves the handle alone if that run was already detached or reaped.
    fn finish(&self, inner: &mut Inner, status: &Arc<RunStatus>, panicked: bool) -> WorkerState {
        let run = match inner.run.take() {
            Some(run) if Arc::ptr_eq(&run.status, status) => run,
            other => {
                inner.run = other;
                return status.state();
            }
        };

        let state = if panicked {
            error!("Worker '{}' panicked", self.name);
            WorkerState::Failed("worker panicked".to_string())
        } else {
            run.status.state()
        };

        debug!(
            "Worker '{}' joined after {:.2?}: {}",
            self.name,
            run.started_at.elapsed(),
            state
        );
        inner.last = Some(state.clone());
        state
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let inner = lock(&self.inner);
        if let Some(run) = &inner.run {
            run.signal.raise();
        }
    }
}

/// Runs `task` until it finishes or is interrupted.
fn drive<T: Task>(mut task: T, ctx: &StepContext) -> Result<(), Interrupt> {
    loop {
        ctx.checkpoint()?;
        if task.step(ctx)? == Step::Done {
            return Ok(());
        }
    }
}

/// Maps the way a task ended to the worker's terminal state.
fn settle(name: &str, outcome: Result<(), Interrupt>) -> WorkerState {
    match outcome {
        Ok(()) => {
            debug!("Worker '{}' completed", name);
            WorkerState::Completed
        }
        Err(Interrupt::Terminated) => {
            info!("Worker '{}' stopped by request", name);
            WorkerState::ForciblyStopped
        }
        Err(timeout @ Interrupt::Timeout { .. }) => {
            warn!("Worker '{}' {}", name, timeout);
            WorkerState::TimedOut
        }
        Err(Interrupt::Failed(e)) => {
            error!("Worker '{}' failed: {}", name, e);
            WorkerState::Failed(e.to_string())
        }
    }
}
