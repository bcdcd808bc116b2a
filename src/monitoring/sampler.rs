//! Resource Sampler
//!
//! Periodically captures host resource snapshots on a background
//! [`Worker`] and appends them to a CSV sink until stopped.
//!
//! `stop` returns only after the sampling thread has exited, so the sink
//! is complete and safe to read once it returns.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use thiserror::Error;

use super::gpu::GpuProbe;
use super::metrics::{MetricsSource, SystemMetrics};
use super::sink::{SinkError, SnapshotSink};
use super::snapshot::Snapshot;
use crate::execution::task::lock;
use crate::execution::{Interrupt, Step, StepContext, Task, Worker, WorkerError, WorkerState};

/// Default time between samples.
pub const DEFAULT_CYCLE: Duration = Duration::from_secs(1);

type SourceFactory = Box<dyn Fn() -> Box<dyn MetricsSource> + Send + Sync>;

/// Errors raised when starting a sampler.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Wall-clock timestamps that never go backwards within one run.
struct SampleClock {
    wall: NaiveDateTime,
    origin: Instant,
}

impl SampleClock {
    fn start() -> Self {
        Self {
            wall: Local::now().naive_local(),
            origin: Instant::now(),
        }
    }

    fn now(&self) -> NaiveDateTime {
        let offset = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + offset
    }
}

/// One sampling cycle per step: capture, append, flush, sleep.
struct SamplingLoop {
    sink: SnapshotSink,
    source: Box<dyn MetricsSource>,
    cycle: Duration,
    clock: SampleClock,
}

impl Task for SamplingLoop {
    fn step(&mut self, ctx: &StepContext) -> Result<Step, Interrupt> {
        let readings = self.source.capture().map_err(Interrupt::failed)?;
        let snapshot = Snapshot::new(self.clock.now(), readings);
        self.sink.append(&snapshot).map_err(Interrupt::failed)?;

        ctx.sleep(self.cycle)?;
        Ok(Step::Continue)
    }
}

/// Samples host resources into a sink on a background thread.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use benchwatch::monitoring::ResourceSampler;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let sampler = ResourceSampler::new();
///     sampler.start("data/nafnet/upscale.csv", Duration::from_secs(1))?;
///
///     // ... run the workload being measured ...
///
///     sampler.stop()?;
///     Ok(())
/// }
/// ```
pub struct ResourceSampler {
    worker: Worker,
    source: SourceFactory,
    sink_path: Mutex<Option<PathBuf>>,
}

impl ResourceSampler {
    /// Creates a sampler reading host metrics and GPU 0.
    pub fn new() -> Self {
        Self::with_gpu_index(0)
    }

    /// Creates a sampler reading host metrics and the given GPU.
    pub fn with_gpu_index(index: usize) -> Self {
        Self::with_source(move || SystemMetrics::with_gpu(GpuProbe::new(index)))
    }

    /// Creates a sampler with a custom metrics source.
    ///
    /// `factory` is called once per `start`.
    pub fn with_source<M, F>(factory: F) -> Self
    where
        M: MetricsSource + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        Self {
            worker: Worker::new("resource-sampler"),
            source: Box::new(move || Box::new(factory()) as Box<dyn MetricsSource>),
            sink_path: Mutex::new(None),
        }
    }

    /// Starts sampling into `sink_path` every `cycle`.
    ///
    /// Returns `Ok(false)` without touching any file if sampling is
    /// already running. Otherwise the sink is created (or truncated) and
    /// its header written before this returns.
    pub fn start(&self, sink_path: impl AsRef<Path>, cycle: Duration) -> Result<bool, SamplerError> {
        let mut current = lock(&self.sink_path);

        if self.worker.is_running() {
            debug!("Monitoring already running - start ignored");
            return Ok(false);
        }

        let path = sink_path.as_ref().to_path_buf();
        let sink = SnapshotSink::create(&path)?;
        info!("Monitoring starts. Saving to {}", path.display());

        let task = SamplingLoop {
            sink,
            source: (self.source)(),
            cycle,
            clock: SampleClock::start(),
        };

        let started = self.worker.start(task, None)?;
        *current = Some(path);
        Ok(started)
    }

    /// Stops sampling and waits for the sampling thread to exit.
    ///
    /// Safe to call when nothing was started; returns `Idle` then.
    /// Otherwise returns the state the sampling thread ended in:
    /// `ForciblyStopped` normally, `Failed` if metrics became unavailable.
    pub fn stop(&self) -> Result<WorkerState, WorkerError> {
        let mut current = lock(&self.sink_path);

        self.worker.terminate()?;
        let state = self.worker.join();

        match current.take() {
            Some(path) => info!("Monitoring stopped. Sink: {}", path.display()),
            None => info!("Monitoring stopped."),
        }
        if let WorkerState::Failed(reason) = &state {
            warn!("Sampling had already ended: {}", reason);
        }

        Ok(state)
    }

    /// Returns true while the sampling thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    /// Sink of the current run, if started.
    pub fn sink_path(&self) -> Option<PathBuf> {
        lock(&self.sink_path).clone()
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceSampler {
    fn drop(&mut self) {
        if self.worker.is_running() {
            if let Err(e) = self.stop() {
                warn!("Failed to stop sampler on drop: {}", e);
            }
        }
    }
}
