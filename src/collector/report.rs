//! Default console reporter
//!
//! Registered as ordinary hooks, so a harness can replace or extend it.

use colored::Colorize;

use super::hooks::{HookPayload, HookRegistryBuilder, Phase};
use super::runner::RunSummary;
use super::{TestOutcome, TestReport};

fn tag(label: &str) -> String {
    format!("[{}]", label)
}

fn elapsed(report: &TestReport) -> String {
    match report.stats.elapsed_seconds {
        Some(secs) => format!("({:.2}s)", secs),
        None => "(n/a)".to_string(),
    }
}

/// Line printed when a worker starts its test
pub fn format_running(test: &impl std::fmt::Display) -> String {
    format!("{} {}", tag("RUN ").blue(), test)
}

/// Lines describing a finished test; `None` for a quiet pass
pub fn format_result(report: &TestReport, verbose: bool) -> Option<String> {
    let detail = tag("----").dimmed().to_string();
    let mut lines = Vec::new();

    for failure in &report.stats.failures {
        lines.push(format!("{} {}:{}: Assertion Failed", detail, failure.file, failure.line));
        for text in failure.message.lines() {
            lines.push(format!("{}   {}", detail, text));
        }
    }

    match &report.outcome {
        TestOutcome::Passed => {
            if !verbose {
                return None;
            }
            lines.push(format!("{} {} {}", tag("PASS").green(), report.test, elapsed(report)));
        }
        TestOutcome::Failed(_) => {
            lines.push(format!("{} {} {}", tag("FAIL").red(), report.test, elapsed(report)));
        }
        TestOutcome::Crashed => {
            let cause = match (report.signal, report.exit_code) {
                (Some(signal), _) => format!("killed by signal {}", signal),
                (None, Some(code)) => format!("exited with code {}", code),
                (None, None) => "stream corrupted".to_string(),
            };
            let last = report
                .events
                .last()
                .map(|kind| format!(" after {}", kind))
                .unwrap_or_default();
            lines.push(format!("{} {}: Worker {}{}", detail, report.test, cause, last));
            lines.push(format!("{} {}: {}", tag("FAIL").red(), report.test, "CRASH!".red().bold()));
        }
        TestOutcome::TimedOut => {
            lines.push(format!("{} {}: Timed out.", detail, report.test));
            lines.push(format!("{} {}: {}", tag("FAIL").red(), report.test, "TIMEOUT".yellow().bold()));
        }
        TestOutcome::LaunchError(message) => {
            lines.push(format!("{} {}: {}", tag("ERR ").red().bold(), report.test, message));
        }
    }

    if !report.outcome.is_passed() {
        for (name, bytes) in [("stdout", &report.stdout), ("stderr", &report.stderr)] {
            if bytes.is_empty() {
                continue;
            }
            lines.push(format!("{} captured {}:", detail, name));
            for text in String::from_utf8_lossy(bytes).lines() {
                lines.push(format!("{}   {}", detail, text));
            }
        }
    }

    Some(lines.join("\n"))
}

/// Final synthesis line
pub fn format_synthesis(summary: &RunSummary) -> String {
    let failing = summary.failed + summary.timed_out + summary.launch_errors;
    let line = format!(
        "Synthesis: Tested: {} | Passing: {} | Failing: {} | Crashing: {}",
        summary.total(),
        summary.passed,
        failing,
        summary.crashed
    );
    let line = if summary.success() { line.green() } else { line.red() };
    format!("{} {}", tag("====").bold(), line.bold())
}

/// Register the console reporter hooks
pub fn register(builder: &mut HookRegistryBuilder, verbose: bool) {
    if verbose {
        builder.register(Phase::PreInit, |payload| {
            if let HookPayload::PreInit(test) = payload {
                println!("{}", format_running(test));
            }
        });
    }
    builder.register(Phase::PostFini, move |payload| {
        if let HookPayload::PostFini(report) = payload {
            if let Some(text) = format_result(report, verbose) {
                println!("{}", text);
            }
        }
    });
    builder.register(Phase::PostEverything, |payload| {
        if let HookPayload::PostEverything(summary) = payload {
            println!("{}", format_synthesis(summary));
        }
    });
}
