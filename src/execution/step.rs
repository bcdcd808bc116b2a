//! Supervised Command Execution
//!
//! Runs an external command as a step-interruptible task so that a
//! benchmark run can be stopped or timed out like any other worker:
//! - The command runs through `bash -c` in an optional working directory
//! - Each step polls the child, then waits one poll interval
//! - An interrupted task kills the child's whole process group when dropped

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use log::{debug, error, warn};
#[cfg(unix)]
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};

use super::task::{Interrupt, Step, StepContext, Task};

/// Default interval between child status checks.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A shell command run under a [`Worker`](super::Worker).
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use benchwatch::execution::{CommandTask, Worker};
///
/// let worker = Worker::new("inference");
/// let task = CommandTask::new("python infer.py --model nafnet").with_working_dir("/data");
/// worker.start(task, Some(Duration::from_secs(600))).unwrap();
/// println!("{}", worker.join());
/// ```
#[derive(Debug)]
pub struct CommandTask {
    command: String,
    working_dir: Option<PathBuf>,
    poll_interval: Duration,
    child: Option<Child>,
}

impl CommandTask {
    /// Creates a task for a shell command line.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            child: None,
        }
    }

    /// Sets the directory the command runs in.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets how often the child is checked for exit.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Spawns the command with bash.
    fn spawn(&self) -> io::Result<Child> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&self.command).stdin(Stdio::null());

        // Own process group so a stop reaches everything the shell forks
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
            debug!("Executing in directory: {}", dir.display());
        }

        cmd.spawn()
    }
}

impl Task for CommandTask {
    fn step(&mut self, ctx: &StepContext) -> Result<Step, Interrupt> {
        if self.child.is_none() {
            let child = self.spawn().map_err(|e| {
                Interrupt::failed(format!("failed to start '{}': {}", self.command, e))
            })?;
            debug!("Worker '{}' started command (pid {}): {}", ctx.worker_name(), child.id(), self.command);
            self.child = Some(child);
        }

        let Some(child) = self.child.as_mut() else {
            return Ok(Step::Done);
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                if status.success() {
                    debug!("Command completed: {}", self.command);
                    Ok(Step::Done)
                } else {
                    error!("Command failed with exit code: {:?}", status.code());
                    Err(Interrupt::failed(format!(
                        "command '{}' failed with exit code: {:?}",
                        self.command,
                        status.code()
                    )))
                }
            }
            Ok(None) => {
                ctx.sleep(self.poll_interval)?;
                Ok(Step::Continue)
            }
            Err(e) => Err(Interrupt::failed(e)),
        }
    }
}

impl Drop for CommandTask {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Ok(None) = child.try_wait() {
            warn!("Killing unfinished command (pid {}): {}", child.id(), self.command);
        }
        kill_process_group(&mut child);

        if let Err(e) = child.wait() {
            warn!("Failed to reap pid {}: {}", child.id(), e);
        }
    }
}

/// Kills the child and every process in its group.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    // The child leads its own group, so its pid is the group id
    let group = Pid::from_raw(child.id() as i32);

    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            warn!("Failed to kill process group {}: {}", group, e);
            if let Err(e) = child.kill() {
                warn!("Failed to kill pid {}: {}", child.id(), e);
            }
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("Failed to kill pid {}: {}", child.id(), e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::execution::{Worker, WorkerState};
    use std::time::Instant;
    use tempfile::tempdir;

    #[test]
    fn test_command_builder() {
        let task = CommandTask::new("echo hello")
            .with_working_dir("/tmp")
            .with_poll_interval(Duration::from_millis(10));

        assert_eq!(task.command(), "echo hello");
        assert_eq!(task.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(task.poll_interval, Duration::from_millis(10));
        assert!(task.child.is_none());
    }

    #[test]
    fn test_command_completes() {
        let temp_dir = tempdir().unwrap();
        let worker = Worker::new("echo");

        let task = CommandTask::new("echo hello > out.txt").with_working_dir(temp_dir.path());
        worker.start(task, None).unwrap();

        assert_eq!(worker.join(), WorkerState::Completed);
        let content = std::fs::read_to_string(temp_dir.path().join("out.txt")).unwrap();
        assert_eq!(content.trim(), "hello");
    }

    #[test]
    fn test_command_failure() {
        let worker = Worker::new("exit");
        worker.start(CommandTask::new("exit 3"), None).unwrap();

        match worker.join() {
            WorkerState::Failed(reason) => assert!(reason.contains("Some(3)"), "{}", reason),
            other => panic!("expected failure, got {}", other),
        }
    }

    #[test]
    fn test_command_timeout_kills_child() {
        let temp_dir = tempdir().unwrap();
        let marker = temp_dir.path().join("finished.txt");
        let worker = Worker::new("sleep");

        let command = format!("sleep 2 && touch {}", marker.display());
        let start = Instant::now();
        worker
            .start(CommandTask::new(command), Some(Duration::from_millis(200)))
            .unwrap();

        assert_eq!(worker.join(), WorkerState::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(2));

        std::thread::sleep(Duration::from_millis(2200));
        assert!(!marker.exists());
    }

    #[test]
    fn test_command_terminate() {
        let worker = Worker::new("terminated");
        worker.start(CommandTask::new("sleep 30"), None).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        worker.terminate().unwrap();
        assert_eq!(worker.join(), WorkerState::ForciblyStopped);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    /// True while `pid` exists and is not a zombie.
    #[cfg(target_os = "linux")]
    fn process_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map_or(false, |rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_terminate_kills_forked_children() {
        let temp_dir = tempdir().unwrap();
        let pid_file = temp_dir.path().join("sleep.pid");
        let worker = Worker::new("compound");

        let command = format!("sleep 30 & echo $! > {}; wait; echo done", pid_file.display());
        worker.start(CommandTask::new(command), None).unwrap();

        let started = Instant::now();
        let pid = loop {
            if let Ok(pid) = std::fs::read_to_string(&pid_file) {
                if !pid.trim().is_empty() {
                    break pid.trim().to_string();
                }
            }
            assert!(started.elapsed() < Duration::from_secs(5), "command never wrote its pid");
            std::thread::sleep(Duration::from_millis(10));
        };
        assert!(process_alive(&pid));

        worker.terminate().unwrap();
        assert_eq!(worker.join(), WorkerState::ForciblyStopped);

        let stopped = Instant::now();
        while process_alive(&pid) && stopped.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!process_alive(&pid), "forked sleep {} survived the stop", pid);
    }

    #[test]
    fn test_missing_working_dir() {
        let worker = Worker::new("bad-dir");
        let task = CommandTask::new("true").with_working_dir("/nonexistent/benchwatch/dir");
        worker.start(task, None).unwrap();

        match worker.join() {
            WorkerState::Failed(reason) => assert!(reason.contains("failed to start")),
            other => panic!("expected failure, got {}", other),
        }
    }
}
