//! Run Report Persistence
//!
//! Records the outcome of a benchmark invocation (per-run timings,
//! worker outcomes and the resource summary) as pretty-printed JSON.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::WorkerState;
use crate::monitoring::SinkSummary;

/// Errors from saving or loading a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Timing and outcome of one command run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunRecord {
    /// 1-based run number
    pub run: usize,
    /// Wall-clock seconds until the run's thread exited
    pub elapsed_secs: f64,
    /// State the run's worker ended in
    pub outcome: WorkerState,
}

/// Outcome of a whole benchmark invocation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunReport {
    /// Benchmarked command, absent for monitor-only runs
    pub command: Option<String>,

    /// Telemetry sink written during the runs
    pub sink: PathBuf,

    /// When the invocation started
    pub started_at: SystemTime,

    /// One record per command run
    pub runs: Vec<RunRecord>,

    /// State the sampling thread ended in
    pub sampler_outcome: Option<WorkerState>,

    /// Aggregates over the sink
    pub summary: Option<SinkSummary>,
}

impl RunReport {
    /// Creates an empty report starting now.
    pub fn new(command: Option<String>, sink: impl Into<PathBuf>) -> Self {
        Self {
            command,
            sink: sink.into(),
            started_at: SystemTime::now(),
            runs: Vec::new(),
            sampler_outcome: None,
            summary: None,
        }
    }

    /// Appends the next run's timing and outcome.
    pub fn record_run(&mut self, elapsed: Duration, outcome: WorkerState) {
        self.runs.push(RunRecord {
            run: self.runs.len() + 1,
            elapsed_secs: elapsed.as_secs_f64(),
            outcome,
        });
    }

    /// Returns true if every recorded run completed.
    pub fn all_completed(&self) -> bool {
        self.runs.iter().all(|record| record.outcome == WorkerState::Completed)
    }

    /// Total seconds across all runs.
    pub fn total_elapsed_secs(&self) -> f64 {
        self.runs.iter().map(|record| record.elapsed_secs).sum()
    }

    /// Mean seconds per run, zero without runs.
    pub fn mean_elapsed_secs(&self) -> f64 {
        if self.runs.is_empty() {
            return 0.0;
        }
        self.total_elapsed_secs() / self.runs.len() as f64
    }

    /// Saves the report, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;

        info!("Saved run report to {}", path.display());
        Ok(())
    }

    /// Loads a report saved with [`RunReport::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_report_creation() {
        let report = RunReport::new(Some("python infer.py".to_string()), "monitor.csv");

        assert_eq!(report.command.as_deref(), Some("python infer.py"));
        assert_eq!(report.sink, PathBuf::from("monitor.csv"));
        assert!(report.runs.is_empty());
        assert!(report.all_completed());
        assert_eq!(report.mean_elapsed_secs(), 0.0);
    }

    #[test]
    fn test_record_runs() {
        let mut report = RunReport::new(None, "monitor.csv");
        report.record_run(Duration::from_secs(2), WorkerState::Completed);
        report.record_run(Duration::from_secs(4), WorkerState::Completed);

        assert_eq!(report.runs[0].run, 1);
        assert_eq!(report.runs[1].run, 2);
        assert_eq!(report.total_elapsed_secs(), 6.0);
        assert_eq!(report.mean_elapsed_secs(), 3.0);
        assert!(report.all_completed());
    }

    #[test]
    fn test_timed_out_run_not_completed() {
        let mut report = RunReport::new(None, "monitor.csv");
        report.record_run(Duration::from_secs(1), WorkerState::Completed);
        report.record_run(Duration::from_secs(10), WorkerState::TimedOut);

        assert!(!report.all_completed());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("reports/run.json");

        let mut report = RunReport::new(Some("sleep 1".to_string()), "monitor.csv");
        report.record_run(Duration::from_millis(1500), WorkerState::Failed("exit 1".to_string()));
        report.sampler_outcome = Some(WorkerState::ForciblyStopped);
        report.summary = Some(SinkSummary {
            samples: 2,
            average_cpu: 12.5,
            ..SinkSummary::default()
        });

        report.save(&path).unwrap();
        let loaded = RunReport::load(&path).unwrap();

        assert_eq!(loaded.runs, report.runs);
        assert_eq!(loaded.sampler_outcome, Some(WorkerState::ForciblyStopped));
        assert_eq!(loaded.summary.unwrap().samples, 2);
        assert_eq!(loaded.started_at, report.started_at);
    }

    #[test]
    fn test_load_nonexistent() {
        assert!(RunReport::load("/nonexistent/benchwatch/report.json").is_err());
    }
}
