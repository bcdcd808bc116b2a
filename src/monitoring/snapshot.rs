//! Telemetry Rows
//!
//! A [`Snapshot`] is one timestamped capture of host resource metrics,
//! serialized as one row of the sink. Column order and header names are
//! fixed; analysis tooling depends on them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Header row of every sink, in column order.
pub const SINK_HEADER: [&str; 8] = ["Checked at", "CPU", "VMem", "SMem", "Read", "Write", "GPU", "GMem"];

/// Format of the capture timestamp column (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Raw readings from a metrics source, before timestamping.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HostReadings {
    /// CPU utilization percentage across all cores
    pub cpu_percent: f32,
    /// Resident memory used in MB
    pub memory_used_mb: f64,
    /// Swap used in MB
    pub swap_used_mb: f64,
    /// Cumulative disk reads in MB
    pub disk_read_mb: f64,
    /// Cumulative disk writes in MB
    pub disk_write_mb: f64,
    /// Accelerator utilization percentage
    pub gpu_utilization: f32,
    /// Accelerator memory used in MB
    pub gpu_memory_used_mb: f64,
}

/// One row of the telemetry sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "Checked at", with = "timestamp")]
    pub captured_at: NaiveDateTime,
    #[serde(rename = "CPU")]
    pub cpu_percent: f32,
    #[serde(rename = "VMem")]
    pub memory_used_mb: f64,
    #[serde(rename = "SMem")]
    pub swap_used_mb: f64,
    #[serde(rename = "Read")]
    pub disk_read_mb: f64,
    #[serde(rename = "Write")]
    pub disk_write_mb: f64,
    #[serde(rename = "GPU")]
    pub gpu_utilization: f32,
    #[serde(rename = "GMem")]
    pub gpu_memory_used_mb: f64,
}

impl Snapshot {
    /// Stamps a set of readings with their capture time.
    pub fn new(captured_at: NaiveDateTime, readings: HostReadings) -> Self {
        Self {
            captured_at,
            cpu_percent: readings.cpu_percent,
            memory_used_mb: readings.memory_used_mb,
            swap_used_mb: readings.swap_used_mb,
            disk_read_mb: readings.disk_read_mb,
            disk_write_mb: readings.disk_write_mb,
            gpu_utilization: readings.gpu_utilization,
            gpu_memory_used_mb: readings.gpu_memory_used_mb,
        }
    }
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    /// Accepts any fractional precision on read.
    const PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, PARSE_FORMAT).map_err(de::Error::custom)
    }
}
