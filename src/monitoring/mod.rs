//! Resource Monitoring Module
//!
//! Samples host resource usage on a background worker and records it
//! as CSV telemetry for benchmark analysis.
//!
//! # Components
//!
//! - [`ResourceSampler`]: Periodic sampling into a sink
//! - [`SystemMetrics`]: CPU, memory, disk and GPU readings
//! - [`SnapshotSink`]: CSV writer for telemetry rows
//! - [`SinkSummary`]: Aggregates over a finished sink

pub mod gpu;
pub mod metrics;
pub mod sampler;
pub mod sink;
pub mod snapshot;
pub mod summary;

pub use gpu::{GpuProbe, GpuReading};
pub use metrics::{MetricsError, MetricsSource, SystemMetrics};
pub use sampler::{ResourceSampler, SamplerError, DEFAULT_CYCLE};
pub use sink::{read_sink, SinkError, SnapshotSink};
pub use snapshot::{HostReadings, Snapshot, SINK_HEADER};
pub use summary::SinkSummary;
