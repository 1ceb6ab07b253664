//! Drives one test through its phases inside the worker
//!
//! ```text
//! PRE_INIT → suite init → test init → PRE_TEST → body → POST_TEST
//!          → test fini → suite fini → POST_FINI
//! ```
//!
//! The test body is the only place an abort can come from. Whether it returns
//! `Ok` or `Err(Abort)`, control continues at the same point: timing is
//! finalized and teardown runs.

use std::any::Any;
use std::io::{self, Write};
use std::time::Instant;

use crate::assert::TestContext;
use crate::common::{Error, Result};
use crate::ipc::codec::write_event;
use crate::ipc::protocol::{encode_elapsed, EventKind};

use super::descriptor::{Fixture, SuiteDescriptor, TestBody, TestDescriptor};

/// What happened inside the worker, as seen by the worker
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSummary {
    pub assertions: usize,
    pub failed: usize,
    /// `None` when the clock could not be read consistently
    pub elapsed: Option<f64>,
    /// The body left early through a failed abort-policy assertion
    pub aborted: bool,
}

/// Writes lifecycle events, remembering the first transport failure
///
/// Once the collector is unreachable there is no point writing more events,
/// but fixtures must still run.
struct PhaseEmitter<'a> {
    sink: &'a mut dyn Write,
    error: Option<io::Error>,
}

impl<'a> PhaseEmitter<'a> {
    fn emit(&mut self, kind: EventKind, payload: &[u8]) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = write_event(self.sink, kind, payload) {
            tracing::error!("Failed to send {} event: {}", kind, e);
            self.error = Some(e);
        }
    }

    fn broken(&self) -> bool {
        self.error.is_some()
    }
}

fn run_fixture(fixture: Option<Fixture>) {
    if let Some(f) = fixture {
        f();
    }
}

/// Run a test's full lifecycle, writing every event to `sink`
///
/// `param` is required for parameterized tests and ignored otherwise. A
/// transport failure does not skip teardown; it is returned once the
/// lifecycle has finished.
pub fn run_lifecycle(
    test: &TestDescriptor,
    suite: &SuiteDescriptor,
    param: Option<&(dyn Any + Send)>,
    sink: &mut dyn Write,
) -> Result<LifecycleSummary> {
    if matches!(test.body, TestBody::Parameterized { .. }) && param.is_none() {
        return Err(Error::WorkerSpec(format!(
            "{}::{} is parameterized but no parameter was supplied",
            test.category, test.name
        )));
    }

    let mut emitter = PhaseEmitter { sink, error: None };

    emitter.emit(EventKind::PreInit, &[]);
    if emitter.broken() {
        // Nothing user-visible has run yet
        return Err(Error::Io(emitter.error.take().unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "event pipe closed")
        })));
    }
    run_fixture(suite.init);
    run_fixture(test.init);
    emitter.emit(EventKind::PreTest, &[]);

    let mut summary = LifecycleSummary {
        assertions: 0,
        failed: 0,
        elapsed: None,
        aborted: false,
    };

    if !emitter.broken() {
        let mut ctx = TestContext::new(&mut *emitter.sink);

        let start = Instant::now();
        let result = match (test.body, param) {
            (TestBody::Simple(body), _) => body(&mut ctx),
            (TestBody::Parameterized { run, .. }, Some(p)) => run(&mut ctx, p),
            (TestBody::Parameterized { .. }, None) => Ok(()),
        };
        let end = Instant::now();

        summary.elapsed = end.checked_duration_since(start).map(|d| d.as_secs_f64());
        summary.aborted = result.is_err();
        summary.assertions = ctx.executed();
        summary.failed = ctx.failed();
        if let Some(e) = ctx.take_transport_error() {
            emitter.error = Some(e);
        }

        tracing::debug!(
            "Body of {}::{} finished: {} assertions, {} failed{}",
            test.category,
            test.name,
            summary.assertions,
            summary.failed,
            if summary.aborted { " (aborted)" } else { "" }
        );
    }

    emitter.emit(EventKind::PostTest, &encode_elapsed(summary.elapsed));
    run_fixture(test.fini);
    run_fixture(suite.fini);
    emitter.emit(EventKind::PostFini, &[]);

    match emitter.error {
        Some(e) => Err(Error::Io(e)),
        None => Ok(summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert::TestResult;
    use crate::check;
    use crate::ipc::codec::{EventReader, ReadOutcome, DEFAULT_MAX_FRAME};
    use crate::ipc::protocol::Event;
    use crate::worker::descriptor::Param;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn decode(bytes: Vec<u8>) -> Vec<Event> {
        let mut reader = EventReader::new(Cursor::new(bytes), DEFAULT_MAX_FRAME);
        let mut events = Vec::new();
        while let ReadOutcome::Event(event) = reader.read_event().unwrap() {
            events.push(event);
        }
        events
    }

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    fn mixed(ctx: &mut TestContext<'_>) -> TestResult {
        ctx.expect(check!(1 + 1 == 2));
        let value = 3;
        ctx.expect(check!(value == 4, "bad value: {}", value));
        ctx.expect(check!(value > 0));
        Ok(())
    }

    #[test]
    fn test_mixed_assertions_event_trail() {
        let test = TestDescriptor::new("lifecycle", "mixed", mixed);
        let suite = SuiteDescriptor::new("lifecycle");
        let mut sink = Vec::new();
        let summary = run_lifecycle(&test, &suite, None, &mut sink).unwrap();

        assert_eq!(summary.assertions, 3);
        assert_eq!(summary.failed, 1);
        assert!(!summary.aborted);
        assert!(summary.elapsed.is_some());

        let events = decode(sink);
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::PreInit,
                EventKind::PreTest,
                EventKind::Assert,
                EventKind::Assert,
                EventKind::Assert,
                EventKind::PostTest,
                EventKind::PostFini,
            ]
        );
        let failed = events[3].assertion().unwrap();
        assert!(!failed.passed);
        assert_eq!(failed.message, "bad value: 3");
        assert!(events[5].elapsed().unwrap().is_some());
    }

    static ABORT_TEARDOWN: AtomicUsize = AtomicUsize::new(0);
    static ABORT_UNREACHED: AtomicUsize = AtomicUsize::new(0);

    fn count_teardown() {
        ABORT_TEARDOWN.fetch_add(1, Ordering::SeqCst);
    }

    fn abort_first(ctx: &mut TestContext<'_>) -> TestResult {
        ctx.assert(check::fail())?;
        ABORT_UNREACHED.fetch_add(1, Ordering::SeqCst);
        ctx.expect(check!(true));
        Ok(())
    }

    #[test]
    fn test_abort_on_first_statement_still_tears_down() {
        let test = TestDescriptor::new("lifecycle", "abort", abort_first).fini(count_teardown);
        let suite = SuiteDescriptor::new("lifecycle").fini(count_teardown);
        let mut sink = Vec::new();
        let summary = run_lifecycle(&test, &suite, None, &mut sink).unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.assertions, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(ABORT_UNREACHED.load(Ordering::SeqCst), 0);
        assert_eq!(ABORT_TEARDOWN.load(Ordering::SeqCst), 2);

        assert_eq!(
            kinds(&decode(sink)),
            vec![
                EventKind::PreInit,
                EventKind::PreTest,
                EventKind::Assert,
                EventKind::PostTest,
                EventKind::PostFini,
            ]
        );
    }

    static TRACE: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    fn suite_init() {
        TRACE.lock().unwrap().push("suite init");
    }
    fn suite_fini() {
        TRACE.lock().unwrap().push("suite fini");
    }
    fn test_init() {
        TRACE.lock().unwrap().push("test init");
    }
    fn test_fini() {
        TRACE.lock().unwrap().push("test fini");
    }
    fn traced(_: &mut TestContext<'_>) -> TestResult {
        TRACE.lock().unwrap().push("body");
        Ok(())
    }

    #[test]
    fn test_fixture_order() {
        let test = TestDescriptor::new("order", "traced", traced)
            .init(test_init)
            .fini(test_fini);
        let suite = SuiteDescriptor::new("order").init(suite_init).fini(suite_fini);
        let mut sink = Vec::new();
        run_lifecycle(&test, &suite, None, &mut sink).unwrap();

        assert_eq!(
            *TRACE.lock().unwrap(),
            vec!["suite init", "test init", "body", "test fini", "suite fini"]
        );
    }

    fn squares() -> Vec<Param> {
        vec![Box::new(2u64), Box::new(5u64)]
    }

    fn square_is_small(ctx: &mut TestContext<'_>, param: &(dyn Any + Send)) -> TestResult {
        let value = param.downcast_ref::<u64>().copied().unwrap_or(0);
        ctx.assert(check!(value * value < 10))
    }

    #[test]
    fn test_parameterized_body_receives_parameter() {
        let test = TestDescriptor::parameterized("params", "square", square_is_small, squares);
        let suite = SuiteDescriptor::new("params");
        let params = squares();

        let mut sink = Vec::new();
        let small = run_lifecycle(&test, &suite, Some(params[0].as_ref()), &mut sink).unwrap();
        assert_eq!(small.failed, 0);

        let mut sink = Vec::new();
        let large = run_lifecycle(&test, &suite, Some(params[1].as_ref()), &mut sink).unwrap();
        assert_eq!(large.failed, 1);
        assert!(large.aborted);

        let mut sink = Vec::new();
        assert!(matches!(
            run_lifecycle(&test, &suite, None, &mut sink),
            Err(Error::WorkerSpec(_))
        ));
        assert!(sink.is_empty());
    }

    struct FailAfter {
        remaining: usize,
        written: Vec<u8>,
    }

    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.remaining -= 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    static BROKEN_TEARDOWN: AtomicUsize = AtomicUsize::new(0);

    fn count_broken_teardown() {
        BROKEN_TEARDOWN.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_transport_failure_runs_teardown_then_errors() {
        let test = TestDescriptor::new("lifecycle", "broken", mixed).fini(count_broken_teardown);
        let suite = SuiteDescriptor::new("lifecycle");
        // PRE_INIT, PRE_TEST and the first ASSERT get through
        let mut sink = FailAfter {
            remaining: 3,
            written: Vec::new(),
        };
        let err = run_lifecycle(&test, &suite, None, &mut sink).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(BROKEN_TEARDOWN.load(Ordering::SeqCst), 1);
        assert_eq!(
            kinds(&decode(sink.written)),
            vec![EventKind::PreInit, EventKind::PreTest, EventKind::Assert]
        );
    }
}
