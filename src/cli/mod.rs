//! Test binary entry point
//!
//! A test binary calls [`Harness::run`] from `main`. The same executable plays
//! both roles: started normally it is the collector, started by a collector
//! (with the worker handshake in its environment) it runs exactly one test.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::collector::hooks::{Hook, HookPayload, HookRegistryBuilder, Phase};
use crate::collector::{report, Collector, Runner};
use crate::common::config::Config;
use crate::common::{logging, paths, Result};
use crate::ipc::transport::StdStream;
use crate::worker::{spec_from_env, worker_main, Registry};

/// Exit code for failures of the collector itself
const COLLECTOR_ERROR: u8 = 2;

/// Collector command line
#[derive(Parser, Debug)]
#[command(about = "Run every test in an isolated worker process")]
#[command(version, long_about = None)]
pub struct Cli {
    /// Only run tests whose `category::name` contains this text
    #[arg(long)]
    pub filter: Option<String>,

    /// Time budget per test in seconds (0 disables it)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Capture worker stdout and stderr, shown for failing tests
    #[arg(long)]
    pub capture: bool,

    /// Give workers an empty stdin instead of inheriting ours
    #[arg(long)]
    pub capture_stdin: bool,

    /// Configuration file (default: platform config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List the planned tests without running them
    #[arg(long)]
    pub list: bool,

    /// Print every test as it starts and passes
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write logs to a file (default location when no path is given)
    #[arg(long, num_args = 0..=1, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(secs) = self.timeout {
            config.worker.timeout_secs = secs;
        }
        if self.capture {
            config.capture.stdout = true;
            config.capture.stderr = true;
        }
        if self.capture_stdin {
            config.capture.stdin = true;
        }
        if self.verbose {
            config.report.verbose = true;
        }
    }

    fn log_file(&self) -> Option<PathBuf> {
        match &self.log_file {
            Some(Some(path)) => Some(path.clone()),
            Some(None) => paths::default_log_file(),
            None => None,
        }
    }
}

/// Ties a test registry, hooks and the two process roles together
pub struct Harness {
    registry: Registry,
    hooks: Vec<(Phase, Hook)>,
    console: bool,
}

impl Harness {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            hooks: Vec::new(),
            console: true,
        }
    }

    /// Register an extra hook; runs after the console reporter
    pub fn hook<F>(mut self, phase: Phase, hook: F) -> Self
    where
        F: Fn(&HookPayload<'_>) + Send + Sync + 'static,
    {
        self.hooks.push((phase, Box::new(hook)));
        self
    }

    /// Do not print the default console report
    pub fn quiet(mut self) -> Self {
        self.console = false;
        self
    }

    /// Run as worker or collector depending on how the process was started
    pub fn run(self) -> ExitCode {
        if let Some(spec) = spec_from_env() {
            logging::init_worker();
            return match spec {
                Ok(spec) => worker_main(spec, &self.registry),
                Err(e) => {
                    eprintln!("Error: {e}");
                    ExitCode::from(COLLECTOR_ERROR)
                }
            };
        }
        self.run_collector(Cli::parse())
    }

    /// Run as the collector with explicit arguments
    pub fn run_collector(self, cli: Cli) -> ExitCode {
        let mut config = match Config::load(cli.config.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::from(COLLECTOR_ERROR);
            }
        };
        cli.apply(&mut config);

        let log_file = cli.log_file();
        let _guard = logging::init_collector(cli.verbose, log_file.as_deref());

        let plan = self.registry.plan(cli.filter.as_deref());
        if cli.list {
            for test in &plan {
                println!("{}", test);
            }
            return ExitCode::SUCCESS;
        }

        match self.collect(&config, &plan) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::from(COLLECTOR_ERROR)
            }
        }
    }

    fn collect(self, config: &Config, plan: &[crate::worker::PlannedTest]) -> Result<bool> {
        let mut builder = HookRegistryBuilder::new();
        if self.console {
            report::register(&mut builder, config.report.verbose);
        }
        for (phase, hook) in self.hooks {
            builder.register(phase, hook);
        }
        let hooks = builder.build();

        let redirect = config.capture.redirect_set();
        tracing::debug!(
            "Capturing: {}",
            StdStream::ALL
                .iter()
                .filter(|s| redirect.contains(**s))
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let collector = Collector::new(config)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let summary = runtime.block_on(Runner::new(&collector, &hooks).run(plan));
        Ok(summary.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["suite", "--timeout", "3", "--capture", "-v", "--filter", "math"]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.worker.timeout_secs, 3);
        assert!(config.capture.stdout && config.capture.stderr);
        assert!(!config.capture.stdin);
        assert!(config.report.verbose);
        assert_eq!(cli.filter.as_deref(), Some("math"));
    }

    #[test]
    fn test_log_file_flag() {
        let cli = Cli::parse_from(["suite"]);
        assert!(cli.log_file().is_none());

        let cli = Cli::parse_from(["suite", "--log-file", "/tmp/run.log"]);
        assert_eq!(cli.log_file(), Some(PathBuf::from("/tmp/run.log")));

        let cli = Cli::parse_from(["suite", "--log-file"]);
        assert_eq!(cli.log_file(), paths::default_log_file());
    }
}
