//! Accelerator Metrics
//!
//! Queries utilization and memory usage of one NVIDIA GPU through
//! `nvidia-smi`. The driver is treated as an opaque metric source: any
//! failure to produce a reading is reported as unavailable.
//!
//! # Binary Resolution Priority
//!
//! 1. `BENCHWATCH_NVIDIA_SMI` environment variable
//! 2. `nvidia-smi` found on the system `PATH`

use std::env;
use std::path::PathBuf;
use std::process::Command;

use log::{debug, info, warn};
use once_cell::sync::Lazy;

use super::metrics::MetricsError;

/// Environment variable overriding the `nvidia-smi` location.
pub const NVIDIA_SMI_ENV: &str = "BENCHWATCH_NVIDIA_SMI";

const NVIDIA_SMI: &str = "nvidia-smi";

const QUERY_ARGS: &[&str] = &[
    "--query-gpu=utilization.gpu,memory.used",
    "--format=csv,noheader,nounits",
];

/// Lazily-resolved path to the `nvidia-smi` binary, if any.
pub static NVIDIA_SMI_PATH: Lazy<Option<PathBuf>> = Lazy::new(|| {
    // Priority 1: Explicit override
    if let Some(path) = env::var_os(NVIDIA_SMI_ENV).map(PathBuf::from) {
        if path.is_file() {
            info!("Using nvidia-smi from {}: {}", NVIDIA_SMI_ENV, path.display());
            return Some(path);
        }
        warn!("{} points to a missing file: {}", NVIDIA_SMI_ENV, path.display());
    }

    // Priority 2: System PATH
    let found = env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(NVIDIA_SMI))
            .find(|candidate| candidate.is_file())
    });

    match &found {
        Some(path) => info!("Using system nvidia-smi: {}", path.display()),
        None => warn!("nvidia-smi not found - GPU metrics unavailable"),
    }
    found
});

/// Utilization and memory of one accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpuReading {
    /// Utilization percentage
    pub utilization: f32,
    /// Memory used in MiB
    pub memory_used_mb: f64,
}

/// Queries one accelerator by index.
#[derive(Debug, Clone)]
pub struct GpuProbe {
    binary: Option<PathBuf>,
    index: usize,
}

impl GpuProbe {
    /// Probe for the GPU at `index` using the resolved `nvidia-smi`.
    pub fn new(index: usize) -> Self {
        Self {
            binary: NVIDIA_SMI_PATH.clone(),
            index,
        }
    }

    /// Probe using an explicit `nvidia-smi` binary.
    pub fn at(binary: impl Into<PathBuf>, index: usize) -> Self {
        Self {
            binary: Some(binary.into()),
            index,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Runs the query and returns the configured GPU's reading.
    pub fn query(&self) -> Result<GpuReading, MetricsError> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| MetricsError::unavailable("gpu", "nvidia-smi not found"))?;

        let output = Command::new(binary)
            .args(QUERY_ARGS)
            .output()
            .map_err(|e| MetricsError::unavailable("gpu", format!("failed to run {}: {}", binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MetricsError::unavailable(
                "gpu",
                format!("nvidia-smi exited with {:?}: {}", output.status.code(), stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("nvidia-smi output: {}", stdout.trim());
        parse_query_output(&stdout, self.index)
    }
}

impl Default for GpuProbe {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Picks the `index`-th line of query output.
fn parse_query_output(stdout: &str, index: usize) -> Result<GpuReading, MetricsError> {
    let line = stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .nth(index)
        .ok_or_else(|| MetricsError::unavailable("gpu", format!("no GPU at index {}", index)))?;

    parse_query_line(line)
        .ok_or_else(|| MetricsError::unavailable("gpu", format!("unparsable nvidia-smi line: {}", line.trim())))
}

/// Parses `"<utilization>, <memory.used>"`.
fn parse_query_line(line: &str) -> Option<GpuReading> {
    let mut fields = line.split(',').map(str::trim);
    let utilization = fields.next()?.parse().ok()?;
    let memory_used_mb = fields.next()?.parse().ok()?;

    Some(GpuReading {
        utilization,
        memory_used_mb,
    })
}
