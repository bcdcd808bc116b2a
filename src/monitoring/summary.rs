//! Resource Usage Summary
//!
//! Aggregates the rows of a finished sink for performance analysis
//! and reporting.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::sink::{read_sink, SinkError};
use super::snapshot::Snapshot;

/// Aggregate view over the rows of one sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkSummary {
    /// Number of rows
    pub samples: usize,
    /// Mean CPU usage percentage
    pub average_cpu: f32,
    /// Highest resident memory in MB
    pub peak_memory_mb: f64,
    /// Lowest resident memory in MB
    pub min_memory_mb: f64,
    /// Highest GPU utilization percentage
    pub peak_gpu_utilization: f32,
    /// Highest GPU memory in MB
    pub peak_gpu_memory_mb: f64,
    /// MB read from disk between the first and last row
    pub disk_read_mb: f64,
    /// MB written to disk between the first and last row
    pub disk_write_mb: f64,
    /// Seconds between the first and last row
    pub span_secs: f64,
}

impl SinkSummary {
    /// Summarizes rows in capture order.
    pub fn from_snapshots(snapshots: &[Snapshot]) -> Self {
        let (Some(first), Some(last)) = (snapshots.first(), snapshots.last()) else {
            return Self::default();
        };

        let samples = snapshots.len();
        let average_cpu = snapshots.iter().map(|s| s.cpu_percent).sum::<f32>() / samples as f32;

        let span_secs = (last.captured_at - first.captured_at)
            .to_std()
            .map(|span| span.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            samples,
            average_cpu,
            peak_memory_mb: snapshots.iter().map(|s| s.memory_used_mb).fold(0.0, f64::max),
            min_memory_mb: snapshots.iter().map(|s| s.memory_used_mb).fold(f64::INFINITY, f64::min),
            peak_gpu_utilization: snapshots.iter().map(|s| s.gpu_utilization).fold(0.0, f32::max),
            peak_gpu_memory_mb: snapshots.iter().map(|s| s.gpu_memory_used_mb).fold(0.0, f64::max),
            disk_read_mb: (last.disk_read_mb - first.disk_read_mb).max(0.0),
            disk_write_mb: (last.disk_write_mb - first.disk_write_mb).max(0.0),
            span_secs,
        }
    }

    /// Reads a sink and summarizes it.
    pub fn from_sink(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let snapshots = read_sink(path)?;
        Ok(Self::from_snapshots(&snapshots))
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }
}

impl fmt::Display for SinkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "No resource data collected");
        }

        write!(
            f,
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {:.0} MB\n  Min Memory: {:.0} MB\n  \
             Peak GPU: {:.0}%\n  Peak GPU Memory: {:.0} MB\n  Disk Read: {:.1} MB\n  Disk Write: {:.1} MB\n  \
             Samples: {} over {:.1}s",
            self.average_cpu,
            self.peak_memory_mb,
            self.min_memory_mb,
            self.peak_gpu_utilization,
            self.peak_gpu_memory_mb,
            self.disk_read_mb,
            self.disk_write_mb,
            self.samples,
            self.span_secs
        )
    }
}
