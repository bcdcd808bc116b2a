//! BenchWatch CLI Entry Point
//!
//! Samples host resources while a benchmark command runs.
//!
//! # Usage
//!
//! ```bash
//! # Monitor for three seconds without running anything
//! benchwatch monitor.csv
//!
//! # Benchmark a command three times with a ten minute deadline per run
//! benchwatch upscale.csv --repeat 3 --timeout 600 -- python infer.py --model nafnet
//!
//! # Take settings from a YAML file, overriding the sink
//! benchwatch --config bench.yaml deblur.csv
//! ```

use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use benchwatch::config::{load_config, MonitorConfig};
use benchwatch::execution::{CommandTask, Worker, WorkerState};
use benchwatch::monitoring::{ResourceSampler, SinkSummary};
use benchwatch::report::RunReport;
use benchwatch::{APP_NAME, VERSION};

/// Command-line arguments; `None` leaves the configured value in place.
#[derive(Debug, Default)]
struct CliArgs {
    sink: Option<PathBuf>,
    config_path: Option<PathBuf>,
    cycle: Option<f64>,
    timeout: Option<f64>,
    duration: Option<f64>,
    repeat: Option<usize>,
    gpu_index: Option<usize>,
    working_dir: Option<PathBuf>,
    report: Option<PathBuf>,
    command: Option<String>,
    verbose: bool,
}

impl CliArgs {
    /// Overrides file settings with the flags that were given.
    fn apply(self, config: &mut MonitorConfig) {
        if let Some(sink) = self.sink {
            config.sink = Some(sink);
        }
        if let Some(cycle) = self.cycle {
            config.cycle_seconds = cycle;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_seconds = Some(timeout);
        }
        if let Some(duration) = self.duration {
            config.duration_seconds = duration;
        }
        if let Some(repeat) = self.repeat {
            config.repeat = repeat;
        }
        if let Some(index) = self.gpu_index {
            config.gpu_index = index;
        }
        if let Some(dir) = self.working_dir {
            config.working_dir = Some(dir);
        }
        if let Some(report) = self.report {
            config.report = Some(report);
        }
        if let Some(command) = self.command {
            config.command = Some(command);
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Supervised Benchmark Runner");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: benchwatch [OPTIONS] <SINK> [-- COMMAND...]");
    println!();
    println!("Arguments:");
    println!("  <SINK>              CSV file receiving resource samples");
    println!("  [COMMAND...]        Command to benchmark (run with bash -c)");
    println!();
    println!("Options:");
    println!("  --cycle SECS        Seconds between samples (default: 1)");
    println!("  --timeout SECS      Deadline per command run");
    println!("  --duration SECS     Monitoring time without a command (default: 3)");
    println!("  --repeat N          Number of command runs (default: 1)");
    println!("  --gpu-index N       GPU to sample (default: 0)");
    println!("  --working-dir PATH  Directory the command runs in");
    println!("  --report PATH       Write a JSON run report");
    println!("  --config PATH       Load settings from a YAML file");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  benchwatch monitor.csv --duration 10");
    println!("  benchwatch upscale.csv --repeat 3 -- python infer.py");
    println!("  benchwatch --config bench.yaml --timeout 600 deblur.csv");
}

/// Reads the value following an option.
fn option_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", name))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", name, value))
}

/// Parses command-line arguments into a CliArgs struct.
fn parse_arguments(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                cli.verbose = true;
            }
            "--cycle" => {
                cli.cycle = Some(parse_number(option_value(args, &mut i, arg)?, "cycle")?);
            }
            "--timeout" => {
                cli.timeout = Some(parse_number(option_value(args, &mut i, arg)?, "timeout")?);
            }
            "--duration" => {
                cli.duration = Some(parse_number(option_value(args, &mut i, arg)?, "duration")?);
            }
            "--repeat" => {
                cli.repeat = Some(parse_number(option_value(args, &mut i, arg)?, "repeat")?);
            }
            "--gpu-index" => {
                cli.gpu_index = Some(parse_number(option_value(args, &mut i, arg)?, "gpu-index")?);
            }
            "--working-dir" => {
                cli.working_dir = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--report" => {
                cli.report = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--config" => {
                cli.config_path = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--" => {
                let rest = &args[i + 1..];
                if rest.is_empty() {
                    return Err("Expected a command after --".to_string());
                }
                cli.command = Some(rest.join(" "));
                break;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if cli.sink.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                cli.sink = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    Ok(cli)
}

/// Validates the directory commands run in.
fn check_working_directory(dir: &Path) -> Result<(), Box<dyn Error>> {
    if !dir.exists() {
        return Err(format!("Working directory does not exist: {}", dir.display()).into());
    }

    if !dir.is_dir() {
        return Err(format!("Path is not a directory: {}", dir.display()).into());
    }

    info!("Working directory: {}", dir.display());
    Ok(())
}

/// Runs the command once and waits for it to settle.
///
/// A run that outlives its deadline plus the grace period is terminated;
/// one that ignores termination for another grace period is detached.
fn run_command(worker: &Worker, config: &MonitorConfig, command: &str) -> Result<(Duration, WorkerState), Box<dyn Error>> {
    let mut task = CommandTask::new(command);
    if let Some(dir) = &config.working_dir {
        task = task.with_working_dir(dir);
    }

    let started = Instant::now();
    worker.start(task, config.timeout())?;

    let outcome = match config.timeout() {
        None => worker.join(),
        Some(limit) => match worker.join_timeout(limit.saturating_add(config.grace())) {
            Some(state) => state,
            None => {
                warn!("Run still active {:.1?} past its deadline - terminating", config.grace());
                worker.terminate()?;
                match worker.join_timeout(config.grace()) {
                    Some(state) => state,
                    None => {
                        worker.detach();
                        WorkerState::ForciblyStopped
                    }
                }
            }
        },
    };

    Ok((started.elapsed(), outcome))
}

/// Main application entry point.
fn run() -> Result<ExitCode, Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let cli = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(cli.verbose);
    print_banner();

    // Load settings, then let flags override them
    let mut config = match &cli.config_path {
        Some(path) => load_config(path)?,
        None => MonitorConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    let sink = config
        .sink
        .clone()
        .ok_or("No sink given - pass <SINK> or set 'sink' in the config file")?;

    if let Some(dir) = &config.working_dir {
        check_working_directory(dir)?;
    }

    let mut report = RunReport::new(config.command.clone(), &sink);

    let sampler = ResourceSampler::with_gpu_index(config.gpu_index);
    sampler.start(&sink, config.cycle())?;

    match &config.command {
        Some(command) => {
            let worker = Worker::new("benchmark");
            for run in 1..=config.repeat {
                info!("Run {}/{}: {}", run, config.repeat, command);
                let (elapsed, outcome) = run_command(&worker, &config, command)?;

                match &outcome {
                    WorkerState::Completed => info!("Run {} completed in {:.2?}", run, elapsed),
                    other => error!("Run {} {} after {:.2?}", run, other, elapsed),
                }
                report.record_run(elapsed, outcome);
            }
        }
        None => {
            info!("No command given - monitoring for {:.1?}", config.duration());
            thread::sleep(config.duration());
        }
    }

    let sampler_outcome = sampler.stop()?;
    let sampler_failed = matches!(sampler_outcome, WorkerState::Failed(_));
    report.sampler_outcome = Some(sampler_outcome);

    match SinkSummary::from_sink(&sink) {
        Ok(summary) => {
            println!();
            println!("{}", summary);
            report.summary = Some(summary);
        }
        Err(e) => warn!("Could not summarize {}: {}", sink.display(), e),
    }

    if !report.runs.is_empty() {
        println!();
        for record in &report.runs {
            println!("Run {}: Elapsed={:.3}s ({})", record.run, record.elapsed_secs, record.outcome);
        }
        println!("Mean: {:.3}s over {} run(s)", report.mean_elapsed_secs(), report.runs.len());
    }

    if let Some(path) = &config.report {
        report.save(path)?;
    }

    if report.all_completed() && !sampler_failed {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("benchwatch")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_sink_only() {
        let cli = parse_arguments(&args(&["monitor.csv"])).unwrap();

        assert_eq!(cli.sink, Some(PathBuf::from("monitor.csv")));
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_options_and_command() {
        let cli = parse_arguments(&args(&[
            "upscale.csv",
            "--cycle",
            "0.5",
            "--timeout",
            "600",
            "--repeat",
            "3",
            "--gpu-index",
            "1",
            "-v",
            "--",
            "python",
            "infer.py",
            "--model",
            "nafnet",
        ]))
        .unwrap();

        assert_eq!(cli.cycle, Some(0.5));
        assert_eq!(cli.timeout, Some(600.0));
        assert_eq!(cli.repeat, Some(3));
        assert_eq!(cli.gpu_index, Some(1));
        assert!(cli.verbose);
        assert_eq!(cli.command.as_deref(), Some("python infer.py --model nafnet"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&["--cycle"])).is_err());
        assert!(parse_arguments(&args(&["--repeat", "many"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a.csv", "b.csv"])).is_err());
        assert!(parse_arguments(&args(&["a.csv", "--"])).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = MonitorConfig {
            sink: Some(PathBuf::from("file.csv")),
            repeat: 5,
            gpu_index: 2,
            ..MonitorConfig::default()
        };

        let cli = parse_arguments(&args(&["cli.csv", "--repeat", "2"])).unwrap();
        cli.apply(&mut config);

        assert_eq!(config.sink, Some(PathBuf::from("cli.csv")));
        assert_eq!(config.repeat, 2);
        assert_eq!(config.gpu_index, 2);
    }
}
