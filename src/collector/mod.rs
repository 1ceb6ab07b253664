//! Collector side: spawning isolated workers and turning their event streams
//! into test reports
//!
//! Each test runs in a fresh process started from the test binary itself.
//! The collector allocates every pipe before the worker exists, hands the
//! worker its ends by descriptor number, and keeps only the read sides.

pub mod hooks;
pub mod monitor;
pub mod report;
pub mod runner;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::ipc::protocol::{AssertionOutcome, EventKind, WorkerSpec, WORKER_ENV};
use crate::ipc::transport::{set_cloexec, Pipe, RedirectSet, TransportHandle};
use crate::worker::{PlannedTest, TestDescriptor, TestId};

pub use hooks::{HookPayload, HookRegistry, HookRegistryBuilder, Phase};
pub use monitor::{supervise, StreamTracker, SuperviseOptions};
pub use runner::{RunSummary, Runner};

/// Final classification of one test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// Number of failed assertions
    Failed(usize),
    /// The worker died or sent a stream that could not be trusted
    Crashed,
    /// The worker was killed after exceeding its time budget
    TimedOut,
    /// The worker could not be started
    LaunchError(String),
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl std::fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Failed(n) => write!(f, "FAILED({})", n),
            Self::Crashed => write!(f, "CRASHED"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
            Self::LaunchError(msg) => write!(f, "LAUNCH_ERROR({})", msg),
        }
    }
}

/// Statistics accumulated by the collector for one test
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestStats {
    /// Duration of the test body; `None` when unavailable or never reported
    pub elapsed_seconds: Option<f64>,
    pub passed_count: usize,
    pub failed_count: usize,
    /// Failed assertions, in evaluation order
    pub failures: Vec<AssertionOutcome>,
}

impl TestStats {
    pub fn assertions(&self) -> usize {
        self.passed_count + self.failed_count
    }
}

/// Everything known about a finished test
#[derive(Debug, Clone)]
pub struct TestReport {
    pub test: PlannedTest,
    pub outcome: TestOutcome,
    pub stats: TestStats,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Captured standard output (empty unless captured)
    pub stdout: Vec<u8>,
    /// Captured standard error (empty unless captured)
    pub stderr: Vec<u8>,
    /// Event kinds received, in order
    pub events: Vec<EventKind>,
}

impl TestReport {
    /// Report for a worker that never started
    pub fn launch_error(test: PlannedTest, error: &Error) -> Self {
        Self {
            test,
            outcome: TestOutcome::LaunchError(error.to_string()),
            stats: TestStats::default(),
            exit_code: None,
            signal: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// A running worker and the collector's side of its pipes
#[derive(Debug)]
pub struct WorkerHandle {
    pub child: Child,
    /// Read end of the event pipe
    pub events: Pipe,
    /// Read end of the stdout capture pipe
    pub stdout: Option<Pipe>,
    /// Read end of the stderr capture pipe
    pub stderr: Option<Pipe>,
}

impl WorkerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Spawns workers
#[derive(Debug, Clone)]
pub struct Collector {
    program: PathBuf,
    redirect: RedirectSet,
    timeout: Option<Duration>,
    max_frame: u64,
    capture_max: usize,
}

impl Collector {
    /// Collector re-executing the current binary
    pub fn new(config: &Config) -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            Error::Internal(format!("Failed to get current executable path: {}", e))
        })?;
        Ok(Self::with_program(program, config))
    }

    /// Collector spawning `program` as the worker binary
    pub fn with_program(program: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            program: program.into(),
            redirect: config.capture.redirect_set(),
            timeout: config.worker.timeout(),
            max_frame: config.worker.max_frame_bytes,
            capture_max: config.capture.max_bytes,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Supervision settings for `test`, honoring its own time budget
    pub fn supervise_options(&self, test: &PlannedTest) -> SuperviseOptions {
        SuperviseOptions {
            timeout: test.timeout.or(self.timeout),
            max_frame: self.max_frame,
            capture_max: self.capture_max,
        }
    }

    /// Start the worker for one instance of `test`
    pub fn run_test(&self, test: &TestDescriptor, param: Option<usize>) -> Result<WorkerHandle> {
        self.spawn(&test.id(), param)
    }

    /// Start a worker running `id` and return the read side immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, id: &TestId, param: Option<usize>) -> Result<WorkerHandle> {
        let mut transport = TransportHandle::create(self.redirect)?;
        let fds = transport.worker_fds()?;
        let spec = WorkerSpec::new(id.clone(), param, fds);

        let mut cmd = Command::new(&self.program);
        cmd.env(WORKER_ENV, spec.to_env_value()?)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let handover = fds.all();
        // SAFETY: the closure only calls fcntl, which is async-signal-safe
        unsafe {
            cmd.pre_exec(move || {
                for fd in &handover {
                    set_cloexec(*fd, false)?;
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            Error::WorkerSpawn(format!("Failed to start {}: {}", self.program.display(), e))
        })?;
        tracing::debug!(
            "Spawned worker {} for {} (events on fd {})",
            child.id().unwrap_or(0),
            id,
            fds.events
        );

        transport.close_worker_ends();
        // The worker sees end-of-file on a redirected stdin
        transport.stdin = None;

        Ok(WorkerHandle {
            child,
            events: transport.events,
            stdout: transport.stdout,
            stderr: transport.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(TestOutcome::Passed.to_string(), "PASSED");
        assert_eq!(TestOutcome::Failed(2).to_string(), "FAILED(2)");
        assert_eq!(TestOutcome::TimedOut.to_string(), "TIMED_OUT");
        assert!(!TestOutcome::Crashed.is_passed());
    }

    #[test]
    fn test_per_test_timeout_overrides_config() {
        let mut config = Config::default();
        config.worker.timeout_secs = 30;
        let collector = Collector::with_program("/bin/true", &config);

        let mut planned = PlannedTest {
            id: TestId::new("a", "b"),
            param: None,
            timeout: None,
        };
        assert_eq!(collector.supervise_options(&planned).timeout, Some(Duration::from_secs(30)));
        planned.timeout = Some(Duration::from_millis(250));
        assert_eq!(
            collector.supervise_options(&planned).timeout,
            Some(Duration::from_millis(250))
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_program_is_launch_error() {
        let collector = Collector::with_program("/nonexistent/crucible-worker", &Config::default());
        let err = collector.spawn(&TestId::new("a", "b"), None).unwrap_err();
        assert!(matches!(err, Error::WorkerSpawn(_)));
    }
}
