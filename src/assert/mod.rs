//! Assertion engine
//!
//! Every evaluated assertion produces exactly one ASSERT event, pass or fail,
//! flushed before the call returns. What happens on failure depends on the
//! entry point the test used:
//!
//! - [`TestContext::assert`] aborts: it returns `Err(Abort)`, which the test
//!   body propagates with `?` straight back to the lifecycle.
//! - [`TestContext::expect`] continues: it records the failure and returns
//!   `Ok(())`.

pub mod check;
pub mod messages;

use std::io::{self, Write};
use std::panic::Location;

use crate::ipc::codec::write_event;
use crate::ipc::protocol::{AssertionOutcome, EventKind};

pub use check::Check;
pub use messages::{MessageSpec, Template};

/// Marker returned when an abort-policy assertion fails
///
/// It carries no data: the failure itself has already been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort;

impl std::fmt::Display for Abort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("test aborted by a failed assertion")
    }
}

/// Result type of a test body
pub type TestResult = Result<(), Abort>;

/// What a failed assertion does to the running test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Leave the test body immediately (teardown still runs)
    Abort,
    /// Keep executing the test body
    Continue,
}

/// Per-test assertion state, handed to the test body
pub struct TestContext<'a> {
    sink: &'a mut dyn Write,
    executed: usize,
    failed: usize,
    transport_error: Option<io::Error>,
}

impl<'a> TestContext<'a> {
    pub fn new(sink: &'a mut dyn Write) -> Self {
        Self {
            sink,
            executed: 0,
            failed: 0,
            transport_error: None,
        }
    }

    /// Evaluate a check: emit its ASSERT event, then apply `action` if it
    /// failed
    ///
    /// If the event cannot be written the collector is gone; the error is kept
    /// and the test body is aborted regardless of `action`.
    #[track_caller]
    pub fn evaluate(&mut self, check: Check, action: FailureAction) -> TestResult {
        let location = Location::caller();
        let outcome = AssertionOutcome {
            passed: check.condition,
            file: location.file().to_string(),
            line: u64::from(location.line()),
            message: check.message.render(),
        };

        self.executed += 1;
        if !outcome.passed {
            self.failed += 1;
        }

        if self.transport_error.is_some() {
            return Err(Abort);
        }
        if let Err(e) = write_event(self.sink, EventKind::Assert, &outcome.encode()) {
            tracing::error!("Failed to report assertion at {}:{}: {}", outcome.file, outcome.line, e);
            self.transport_error = Some(e);
            return Err(Abort);
        }

        match (outcome.passed, action) {
            (true, _) | (false, FailureAction::Continue) => Ok(()),
            (false, FailureAction::Abort) => Err(Abort),
        }
    }

    /// Abort-policy assertion: use with `?`
    #[track_caller]
    pub fn assert(&mut self, check: Check) -> TestResult {
        self.evaluate(check, FailureAction::Abort)
    }

    /// Continue-policy assertion
    #[track_caller]
    pub fn expect(&mut self, check: Check) {
        // Continue never aborts unless the transport broke, which is
        // remembered and surfaced by the lifecycle
        let _ = self.evaluate(check, FailureAction::Continue);
    }

    /// Number of assertions evaluated so far
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Number of failed assertions so far
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Take the first transport error hit while reporting, if any
    pub fn take_transport_error(&mut self) -> Option<io::Error> {
        self.transport_error.take()
    }
}

/// Build an expression check from a boolean, keeping its source text
///
/// ```ignore
/// ctx.assert(check!(value > 0))?;
/// ctx.expect(check!(value == 3, "bad value: {}", value));
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        $crate::assert::check::expr($cond, stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        $crate::assert::check::expr($cond, stringify!($cond)).because(format!($($arg)+))
    };
}

/// Check that an expression panics, keeping its source text
#[macro_export]
macro_rules! check_panics {
    ($body:expr $(,)?) => {
        $crate::assert::check::panics(|| { let _ = &$body; }, stringify!($body))
    };
}
