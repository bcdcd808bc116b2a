//! Host Resource Metrics
//!
//! The [`MetricsSource`] trait is the sampler's only view of the host.
//! [`SystemMetrics`] implements it with `sysinfo` for CPU and memory,
//! kernel disk counters for cumulative I/O and `nvidia-smi` for the GPU.

use sysinfo::System;
use thiserror::Error;

use super::gpu::GpuProbe;
use super::snapshot::HostReadings;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Bytes per sector in `/proc/diskstats`, independent of the device.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const SECTOR_SIZE: u64 = 512;

#[cfg(target_os = "linux")]
const DISKSTATS_PATH: &str = "/proc/diskstats";

/// The metrics source cannot produce a reading.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("{metric} metrics unavailable: {reason}")]
    Unavailable { metric: &'static str, reason: String },
}

impl MetricsError {
    pub fn unavailable(metric: &'static str, reason: impl Into<String>) -> Self {
        MetricsError::Unavailable {
            metric,
            reason: reason.into(),
        }
    }
}

/// Synchronous source of host resource readings.
pub trait MetricsSource: Send {
    /// Captures the current readings.
    fn capture(&mut self) -> Result<HostReadings, MetricsError>;
}

/// Cumulative disk I/O in bytes since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskCounters {
    pub read_bytes: u64,
    pub written_bytes: u64,
}

/// Host metrics from the operating system and the first configured GPU.
pub struct SystemMetrics {
    system: System,
    gpu: GpuProbe,
}

impl SystemMetrics {
    /// Creates a source reading GPU 0.
    pub fn new() -> Self {
        Self::with_gpu(GpuProbe::default())
    }

    /// Creates a source reading the given GPU.
    ///
    /// The first CPU refresh happens here, so the first capture reports
    /// usage since construction.
    pub fn with_gpu(gpu: GpuProbe) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system, gpu }
    }

    #[cfg(target_os = "linux")]
    fn disk_counters(&mut self) -> Result<DiskCounters, MetricsError> {
        use std::path::Path;

        let raw = std::fs::read_to_string(DISKSTATS_PATH)
            .map_err(|e| MetricsError::unavailable("disk", format!("{}: {}", DISKSTATS_PATH, e)))?;

        Ok(parse_diskstats(&raw, |device| Path::new("/sys/block").join(device).exists()))
    }

    #[cfg(not(target_os = "linux"))]
    fn disk_counters(&mut self) -> Result<DiskCounters, MetricsError> {
        self.system.refresh_processes();

        let counters = self
            .system
            .processes()
            .values()
            .map(|process| process.disk_usage())
            .fold(DiskCounters::default(), |acc, usage| DiskCounters {
                read_bytes: acc.read_bytes + usage.total_read_bytes,
                written_bytes: acc.written_bytes + usage.total_written_bytes,
            });
        Ok(counters)
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemMetrics {
    fn capture(&mut self) -> Result<HostReadings, MetricsError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let disk = self.disk_counters()?;
        let gpu = self.gpu.query()?;

        Ok(HostReadings {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            memory_used_mb: self.system.used_memory() as f64 / BYTES_PER_MB,
            swap_used_mb: self.system.used_swap() as f64 / BYTES_PER_MB,
            disk_read_mb: disk.read_bytes as f64 / BYTES_PER_MB,
            disk_write_mb: disk.written_bytes as f64 / BYTES_PER_MB,
            gpu_utilization: gpu.utilization,
            gpu_memory_used_mb: gpu.memory_used_mb,
        })
    }
}

/// Sums read/written sectors over whole disks in `/proc/diskstats` content.
///
/// Format: `major minor name reads merged sectors_read ms writes merged sectors_written ...`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_diskstats(raw: &str, is_whole_disk: impl Fn(&str) -> bool) -> DiskCounters {
    let mut counters = DiskCounters::default();

    for line in raw.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue;
        }

        let device = parts[2];
        if device.starts_with("loop") || device.starts_with("ram") || !is_whole_disk(device) {
            continue;
        }

        let sectors_read: u64 = parts[5].parse().unwrap_or(0);
        let sectors_written: u64 = parts[9].parse().unwrap_or(0);
        counters.read_bytes += sectors_read * SECTOR_SIZE;
        counters.written_bytes += sectors_written * SECTOR_SIZE;
    }

    counters
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKSTATS: &str = "\
   7       0 loop0 100 0 8000 10 0 0 0 0 0 20 10 0 0 0 0
   8       0 sda 1000 50 20000 400 500 20 10000 300 0 600 700 0 0 0 0
   8       1 sda1 900 40 18000 350 450 15 9000 250 0 500 600 0 0 0 0
 259       0 nvme0n1 2000 0 4000 100 100 0 2000 50 0 100 150 0 0 0 0
   1       0 ram0 5 0 10 0 0 0 0 0 0 0 0
   8      16 sdb short line
";

    fn is_whole(device: &str) -> bool {
        matches!(device, "sda" | "nvme0n1" | "loop0" | "ram0")
    }

    #[test]
    fn test_parse_diskstats_whole_disks_only() {
        let counters = parse_diskstats(DISKSTATS, is_whole);

        assert_eq!(counters.read_bytes, (20000 + 4000) * SECTOR_SIZE);
        assert_eq!(counters.written_bytes, (10000 + 2000) * SECTOR_SIZE);
    }

    #[test]
    fn test_parse_diskstats_empty() {
        assert_eq!(parse_diskstats("", is_whole), DiskCounters::default());
    }

    #[test]
    fn test_parse_diskstats_skips_partitions() {
        let only_partitions = parse_diskstats(DISKSTATS, |device| device == "sda1");
        assert_eq!(only_partitions.read_bytes, 18000 * SECTOR_SIZE);

        let nothing = parse_diskstats(DISKSTATS, |_| false);
        assert_eq!(nothing, DiskCounters::default());
    }

    #[test]
    fn test_unavailable_message() {
        let err = MetricsError::unavailable("gpu", "no GPU at index 0");
        assert_eq!(err.to_string(), "gpu metrics unavailable: no GPU at index 0");
    }

    #[test]
    fn test_system_metrics_without_gpu() {
        let mut metrics = SystemMetrics::with_gpu(GpuProbe::at("/nonexistent/benchwatch/nvidia-smi", 0));
        let err = metrics.capture().unwrap_err();
        assert!(matches!(err, MetricsError::Unavailable { metric: "gpu", .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_disk_counters_readable() {
        let mut metrics = SystemMetrics::with_gpu(GpuProbe::at("/nonexistent", 0));
        assert!(metrics.disk_counters().is_ok());
    }
}
