//! Sequential run orchestration

use crate::worker::PlannedTest;

use super::hooks::{HookPayload, HookRegistry};
use super::monitor::supervise;
use super::{Collector, TestOutcome, TestReport};

/// Totals for a whole run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub crashed: usize,
    pub timed_out: usize,
    pub launch_errors: usize,
    pub assertions: usize,
    pub failed_assertions: usize,
    pub reports: Vec<TestReport>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    /// Every test passed
    pub fn success(&self) -> bool {
        self.passed == self.total()
    }

    pub fn record(&mut self, report: TestReport) {
        match report.outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed(_) => self.failed += 1,
            TestOutcome::Crashed => self.crashed += 1,
            TestOutcome::TimedOut => self.timed_out += 1,
            TestOutcome::LaunchError(_) => self.launch_errors += 1,
        }
        self.assertions += report.stats.assertions();
        self.failed_assertions += report.stats.failed_count;
        self.reports.push(report);
    }
}

/// Runs planned tests one worker at a time
pub struct Runner<'a> {
    collector: &'a Collector,
    hooks: &'a HookRegistry,
}

impl<'a> Runner<'a> {
    pub fn new(collector: &'a Collector, hooks: &'a HookRegistry) -> Self {
        Self { collector, hooks }
    }

    /// Run a single planned test in its own worker
    pub async fn run_one(&self, test: &PlannedTest) -> TestReport {
        match self.collector.spawn(&test.id, test.param) {
            Ok(handle) => {
                let options = self.collector.supervise_options(test);
                supervise(handle, test, self.hooks, &options).await
            }
            Err(e) => {
                tracing::error!("Could not launch worker for {}: {}", test, e);
                let report = TestReport::launch_error(test.clone(), &e);
                self.hooks.dispatch(HookPayload::PostFini(&report));
                report
            }
        }
    }

    /// Run the whole plan, bracketed by the PRE/POST_EVERYTHING hooks
    pub async fn run(&self, plan: &[PlannedTest]) -> RunSummary {
        self.hooks.dispatch(HookPayload::PreEverything(plan));
        tracing::info!("Running {} tests", plan.len());

        let mut summary = RunSummary::default();
        for test in plan {
            let report = self.run_one(test).await;
            tracing::debug!("{}: {}", test, report.outcome);
            summary.record(report);
        }

        self.hooks.dispatch(HookPayload::PostEverything(&summary));
        summary
    }
}
