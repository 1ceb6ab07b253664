//! Worker supervision: event draining, crash and timeout detection
//!
//! The event pipe is read without blocking the runtime, under the test's
//! deadline if it has one. A worker is considered finished normally only if
//! its stream contained the full phase sequence and ended on a frame boundary:
//!
//! ```text
//! PRE_INIT → PRE_TEST → ASSERT* → POST_TEST → POST_FINI → end of stream
//! ```
//!
//! Anything else (early end of stream, malformed or out-of-order frames, a
//! blown budget) kills the worker if needed and yields a synthesized report.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::unix::pipe as async_pipe;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::ipc::codec::FrameDecoder;
use crate::ipc::protocol::{Event, EventKind};
use crate::ipc::transport::{Pipe, PipeEnd};
use crate::worker::PlannedTest;

use super::hooks::{HookPayload, HookRegistry};
use super::{TestOutcome, TestReport, TestStats, WorkerHandle};

/// How long to wait for capture pipes to drain once the worker is gone
const CAPTURE_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8 * 1024;

/// Supervision settings for one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperviseOptions {
    pub timeout: Option<Duration>,
    pub max_frame: u64,
    pub capture_max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    Initialized,
    Running,
    Finished,
    Complete,
}

/// Validates event order and accumulates statistics for one worker
#[derive(Debug)]
pub struct StreamTracker {
    stage: Stage,
    stats: TestStats,
    trail: Vec<EventKind>,
}

impl Default for StreamTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTracker {
    pub fn new() -> Self {
        Self {
            stage: Stage::Start,
            stats: TestStats::default(),
            trail: Vec::new(),
        }
    }

    /// Account for one event; any violation of the phase order is a
    /// protocol error
    pub fn accept(&mut self, event: &Event) -> Result<()> {
        let next = match (self.stage, event.kind) {
            (Stage::Start, EventKind::PreInit) => Stage::Initialized,
            (Stage::Initialized, EventKind::PreTest) => Stage::Running,
            (Stage::Running, EventKind::Assert) => {
                let outcome = event.assertion()?;
                if outcome.passed {
                    self.stats.passed_count += 1;
                } else {
                    self.stats.failed_count += 1;
                    self.stats.failures.push(outcome);
                }
                Stage::Running
            }
            (Stage::Running, EventKind::PostTest) => {
                self.stats.elapsed_seconds = event.elapsed()?;
                Stage::Finished
            }
            (Stage::Finished, EventKind::PostFini) => Stage::Complete,
            (stage, kind) => {
                return Err(Error::protocol(format!(
                    "unexpected {} event in stage {:?}",
                    kind, stage
                )));
            }
        };
        self.stage = next;
        self.trail.push(event.kind);
        Ok(())
    }

    /// POST_FINI has been received
    pub fn is_complete(&self) -> bool {
        self.stage == Stage::Complete
    }

    /// POST_TEST has been received
    pub fn saw_post_test(&self) -> bool {
        matches!(self.stage, Stage::Finished | Stage::Complete)
    }

    pub fn stats(&self) -> &TestStats {
        &self.stats
    }

    pub fn trail(&self) -> &[EventKind] {
        &self.trail
    }

    /// Fill in the statistics of a test whose worker never reported POST_TEST
    pub fn synthesize_failure(&mut self) {
        if !self.saw_post_test() {
            self.stats.elapsed_seconds = None;
            self.stats.failed_count = self.stats.failed_count.max(1);
        }
    }

    pub fn into_parts(self) -> (TestStats, Vec<EventKind>) {
        (self.stats, self.trail)
    }
}

/// Read events until end of stream, feeding each to `tracker` and then to
/// `on_event`
///
/// Returns `Ok` when the stream ended on a frame boundary, whether or not the
/// phase sequence is complete.
pub async fn drain_events<R, F>(
    reader: &mut R,
    max_frame: u64,
    tracker: &mut StreamTracker,
    mut on_event: F,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&Event, &StreamTracker),
{
    let mut decoder = FrameDecoder::new(max_frame);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if decoder.has_partial() {
                return Err(Error::protocol("event stream ended inside a frame"));
            }
            return Ok(());
        }
        decoder.push(&chunk[..n]);

        while let Some(event) = decoder.next_event()? {
            tracing::trace!("Received {} ({} payload bytes)", event.kind, event.payload.len());
            tracker.accept(&event)?;
            on_event(&event, tracker);
        }
    }
}

/// Convert a collector-side read end into a reactor-driven pipe receiver
fn async_receiver(mut pipe: Pipe) -> Result<async_pipe::Receiver> {
    pipe.set_nonblocking(PipeEnd::Read, true)?;
    let file = pipe.into_reader()?;
    Ok(async_pipe::Receiver::from_file_unchecked(file)?)
}

/// Read a capture pipe to end of stream, keeping at most `max` bytes
///
/// Excess output is still read so the worker never blocks on a full pipe.
async fn capture<R: AsyncRead + Unpin>(mut reader: R, max: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut dropped = 0usize;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = max.saturating_sub(kept.len());
                let take = room.min(n);
                kept.extend_from_slice(&chunk[..take]);
                dropped += n - take;
            }
            Err(e) => {
                tracing::warn!("Capture pipe read failed: {}", e);
                break;
            }
        }
    }
    if dropped > 0 {
        tracing::debug!("Dropped {} bytes of captured output over the {} byte limit", dropped, max);
    }
    kept
}

fn spawn_capture(pipe: Option<Pipe>, max: usize) -> Result<Option<JoinHandle<Vec<u8>>>> {
    match pipe {
        Some(pipe) => {
            let receiver = async_receiver(pipe)?;
            Ok(Some(tokio::spawn(capture(receiver, max))))
        }
        None => Ok(None),
    }
}

async fn collect_capture(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut task) = task else {
        return Vec::new();
    };
    match tokio::time::timeout(CAPTURE_GRACE, &mut task).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            tracing::warn!("Capture task failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            // Something else (a grandchild) still holds the write end
            tracing::warn!("Captured stream still open after the worker exited");
            task.abort();
            Vec::new()
        }
    }
}

/// How the event stream ended
enum StreamEnd {
    /// End of stream on a frame boundary, worker exited
    Closed(Option<ExitStatus>),
    /// Malformed or out-of-order stream
    Corrupt(Error),
    /// Budget exceeded
    Expired,
}

/// Supervise a spawned worker until it finishes, crashes or runs out of time
///
/// Dispatches PRE_INIT, PRE_TEST and POST_TEST hooks as the matching events
/// arrive, and POST_FINI exactly once with the final report.
pub async fn supervise(
    handle: WorkerHandle,
    test: &PlannedTest,
    hooks: &HookRegistry,
    options: &SuperviseOptions,
) -> TestReport {
    let WorkerHandle {
        mut child,
        events,
        stdout,
        stderr,
    } = handle;
    let deadline = options.timeout.map(|t| Instant::now() + t);
    let mut tracker = StreamTracker::new();

    let setup = async_receiver(events).and_then(|events| {
        let stdout = spawn_capture(stdout, options.capture_max)?;
        let stderr = spawn_capture(stderr, options.capture_max)?;
        Ok((events, stdout, stderr))
    });
    let (mut events, stdout_task, stderr_task) = match setup {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!("Could not watch worker for {}: {}", test, e);
            let _ = child.kill().await;
            return TestReport::launch_error(test.clone(), &e);
        }
    };

    let on_event = |event: &Event, tracker: &StreamTracker| match event.kind {
        EventKind::PreInit => hooks.dispatch(HookPayload::PreInit(test)),
        EventKind::PreTest => hooks.dispatch(HookPayload::PreTest(test)),
        EventKind::PostTest => hooks.dispatch(HookPayload::PostTest {
            test,
            stats: tracker.stats(),
        }),
        _ => {}
    };

    let watch = async {
        if let Err(e) = drain_events(&mut events, options.max_frame, &mut tracker, on_event).await {
            return StreamEnd::Corrupt(e);
        }
        match child.wait().await {
            Ok(status) => StreamEnd::Closed(Some(status)),
            Err(e) => {
                tracing::error!("Failed to wait for worker of {}: {}", test, e);
                StreamEnd::Closed(None)
            }
        }
    };

    let end = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, watch)
            .await
            .unwrap_or(StreamEnd::Expired),
        None => watch.await,
    };

    let (outcome, status) = match end {
        StreamEnd::Closed(status) => {
            let clean = status.is_some_and(|s| s.success());
            if tracker.is_complete() && clean {
                let failed = tracker.stats().failed_count;
                let outcome = if failed == 0 {
                    TestOutcome::Passed
                } else {
                    TestOutcome::Failed(failed)
                };
                (outcome, status)
            } else {
                tracing::warn!(
                    "Worker for {} exited abnormally ({}) after {:?}",
                    test,
                    describe_status(status),
                    tracker.trail().last()
                );
                (TestOutcome::Crashed, status)
            }
        }
        StreamEnd::Corrupt(e) => {
            tracing::warn!("Untrustworthy event stream from worker for {}: {}", test, e);
            (TestOutcome::Crashed, kill(&mut child).await)
        }
        StreamEnd::Expired => {
            tracing::warn!(
                "Worker for {} exceeded its {:?} budget, killing it",
                test,
                options.timeout.unwrap_or_default()
            );
            (TestOutcome::TimedOut, kill(&mut child).await)
        }
    };

    if !outcome.is_passed() && !matches!(outcome, TestOutcome::Failed(_)) {
        tracker.synthesize_failure();
        if !tracker.saw_post_test() {
            hooks.dispatch(HookPayload::PostTest {
                test,
                stats: tracker.stats(),
            });
        }
    }

    let stdout = collect_capture(stdout_task).await;
    let stderr = collect_capture(stderr_task).await;
    let (stats, trail) = tracker.into_parts();

    let report = TestReport {
        test: test.clone(),
        outcome,
        stats,
        exit_code: status.and_then(|s| s.code()),
        signal: status.and_then(|s| s.signal()),
        stdout,
        stderr,
        events: trail,
    };
    hooks.dispatch(HookPayload::PostFini(&report));
    report
}

async fn kill(child: &mut tokio::process::Child) -> Option<ExitStatus> {
    if let Err(e) = child.start_kill() {
        tracing::debug!("Kill failed (worker already gone?): {}", e);
    }
    child.wait().await.ok()
}

fn describe_status(status: Option<ExitStatus>) -> String {
    match status {
        Some(s) => match (s.code(), s.signal()) {
            (Some(code), _) => format!("exit code {}", code),
            (None, Some(signal)) => format!("signal {}", signal),
            (None, None) => "unknown status".to_string(),
        },
        None => "status unavailable".to_string(),
    }
}
