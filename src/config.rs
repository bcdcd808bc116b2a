//! Monitor Configuration
//!
//! Settings for a benchmark run, optionally loaded from a YAML file.
//! Command-line flags override file values.
//!
//! # Example YAML Format
//!
//! ```yaml
//! sink: data/nafnet/upscale.csv
//! cycle_seconds: 1
//! command: python infer.py --model nafnet
//! timeout_seconds: 600
//! repeat: 3
//! gpu_index: 0
//! report: data/nafnet/upscale.json
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted sampling cycle (one day).
pub const MAX_CYCLE_SECONDS: f64 = 86_400.0;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for one benchmark invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// CSV sink for telemetry rows
    pub sink: Option<PathBuf>,

    /// Seconds between samples
    pub cycle_seconds: f64,

    /// Command to benchmark; monitoring only when absent
    pub command: Option<String>,

    /// Soft deadline per command run
    pub timeout_seconds: Option<f64>,

    /// How long to monitor when no command is given
    pub duration_seconds: f64,

    /// Number of times to run the command
    pub repeat: usize,

    /// Extra wait for a run to exit after its deadline or a stop request
    pub grace_seconds: f64,

    /// Index of the GPU to sample
    pub gpu_index: usize,

    /// Directory the command runs in
    pub working_dir: Option<PathBuf>,

    /// Where to write the JSON run report
    pub report: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sink: None,
            cycle_seconds: 1.0,
            command: None,
            timeout_seconds: None,
            duration_seconds: 3.0,
            repeat: 1,
            grace_seconds: 5.0,
            gpu_index: 0,
            working_dir: None,
            report: None,
        }
    }
}

impl MonitorConfig {
    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cycle_seconds.is_finite() && self.cycle_seconds > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "cycle_seconds must be positive, got {}",
                self.cycle_seconds
            )));
        }

        if self.cycle_seconds > MAX_CYCLE_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "cycle_seconds must be at most {}, got {}",
                MAX_CYCLE_SECONDS, self.cycle_seconds
            )));
        }

        if let Some(timeout) = self.timeout_seconds {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "timeout_seconds must be positive, got {}",
                    timeout
                )));
            }
        }

        if !(self.duration_seconds.is_finite() && self.duration_seconds >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "duration_seconds must not be negative, got {}",
                self.duration_seconds
            )));
        }

        if !(self.grace_seconds.is_finite() && self.grace_seconds >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "grace_seconds must not be negative, got {}",
                self.grace_seconds
            )));
        }

        if self.repeat == 0 {
            return Err(ConfigError::Invalid("repeat must be at least 1".to_string()));
        }

        if matches!(&self.command, Some(command) if command.trim().is_empty()) {
            return Err(ConfigError::Invalid("command must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn cycle(&self) -> Duration {
        seconds(self.cycle_seconds)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(seconds)
    }

    pub fn duration(&self) -> Duration {
        seconds(self.duration_seconds)
    }

    pub fn grace(&self) -> Duration {
        seconds(self.grace_seconds)
    }
}

/// Converts validated seconds; out-of-range values become zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Loads and validates a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<MonitorConfig, ConfigError> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Config content loaded ({} bytes)", content.len());

    let config: MonitorConfig = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.cycle(), Duration::from_secs(1));
        assert_eq!(config.repeat, 1);
        assert_eq!(config.gpu_index, 0);
        assert!(config.timeout().is_none());
        assert!(config.sink.is_none());
    }

    #[test]
    fn test_load_full_config() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bench.yaml");
        fs::write(
            &path,
            "sink: out/upscale.csv\n\
             cycle_seconds: 0.5\n\
             command: python infer.py\n\
             timeout_seconds: 600\n\
             repeat: 3\n\
             gpu_index: 1\n\
             report: out/upscale.json\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.sink, Some(PathBuf::from("out/upscale.csv")));
        assert_eq!(config.cycle(), Duration::from_millis(500));
        assert_eq!(config.command.as_deref(), Some("python infer.py"));
        assert_eq!(config.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.repeat, 3);
        assert_eq!(config.gpu_index, 1);
        assert_eq!(config.report, Some(PathBuf::from("out/upscale.json")));
        assert_eq!(config.grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bench.yaml");
        fs::write(&path, "sink: monitor.csv\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.cycle_seconds, 1.0);
        assert_eq!(config.duration(), Duration::from_secs(3));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/benchwatch.yaml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_malformed_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "cycle_seconds: [not, a, number]\n").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_cycle = MonitorConfig {
            cycle_seconds: 0.0,
            ..MonitorConfig::default()
        };
        assert!(zero_cycle.validate().is_err());

        let negative_timeout = MonitorConfig {
            timeout_seconds: Some(-1.0),
            ..MonitorConfig::default()
        };
        assert!(negative_timeout.validate().is_err());

        let no_runs = MonitorConfig {
            repeat: 0,
            ..MonitorConfig::default()
        };
        assert!(no_runs.validate().is_err());

        let blank_command = MonitorConfig {
            command: Some("   ".to_string()),
            ..MonitorConfig::default()
        };
        assert!(blank_command.validate().is_err());

        let huge_cycle = MonitorConfig {
            cycle_seconds: 1e19,
            ..MonitorConfig::default()
        };
        assert!(huge_cycle.validate().is_err());

        let one_day = MonitorConfig {
            cycle_seconds: MAX_CYCLE_SECONDS,
            ..MonitorConfig::default()
        };
        assert!(one_day.validate().is_ok());

        let nan_duration = MonitorConfig {
            duration_seconds: f64::NAN,
            ..MonitorConfig::default()
        };
        assert!(nan_duration.validate().is_err());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bench.yaml");
        fs::write(&path, "cycle_seconds: -2\n").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Invalid(_))));
    }
}
