//! BenchWatch - Supervised Benchmark Runner
//!
//! Runs work on background threads that can be stopped on demand or after
//! a deadline, and samples host resource usage into CSV telemetry while
//! the work runs.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`execution`]: Stoppable workers and the step-based task model
//! - [`monitoring`]: Periodic resource sampling and sink analysis
//! - [`config`]: YAML configuration for benchmark runs
//! - [`report`]: JSON persistence of run outcomes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use benchwatch::execution::{CommandTask, Worker};
//! use benchwatch::monitoring::{ResourceSampler, SinkSummary};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Sample host resources every second
//!     let sampler = ResourceSampler::new();
//!     sampler.start("monitor.csv", Duration::from_secs(1))?;
//!
//!     // Run the benchmark with a ten minute deadline
//!     let worker = Worker::new("benchmark");
//!     worker.start(CommandTask::new("python infer.py"), Some(Duration::from_secs(600)))?;
//!     let outcome = worker.join();
//!
//!     sampler.stop()?;
//!     println!("{}: {}", outcome, SinkSummary::from_sink("monitor.csv")?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod execution;
pub mod monitoring;
pub mod report;

// Re-export commonly used types
pub use config::{load_config, MonitorConfig};
pub use execution::{CommandTask, Worker, WorkerState};
pub use monitoring::{ResourceSampler, SinkSummary};
pub use report::RunReport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "BenchWatch";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "BenchWatch");
    }

    #[test]
    fn test_module_exports_worker() {
        let worker = Worker::new("export-check");
        assert_eq!(worker.name(), "export-check");
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[test]
    fn test_module_exports_config() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
