//! Supervised Execution Module
//!
//! Provides a cancellable background worker that can be force-stopped
//! from outside and can enforce a soft deadline on its own execution.
//!
//! # Architecture
//!
//! - [`task`]: Step-interruptible task abstraction and execution context
//! - [`worker`]: Worker handle owning one OS thread at a time
//! - [`step`]: External commands run as supervised tasks

pub mod step;
pub mod task;
pub mod worker;

pub use step::CommandTask;
pub use task::{from_fn, FnTask, Interrupt, Step, StepContext, Task};
pub use worker::{TerminateOutcome, Worker, WorkerError, WorkerState};
