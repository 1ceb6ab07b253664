//! Worker process entry point
//!
//! The collector re-executes the test binary with [`WORKER_ENV`] set. Before
//! any user code runs, the worker rebinds the requested standard streams to
//! the inherited pipes and takes ownership of the event pipe.

use std::ffi::OsString;
use std::fs::File;
use std::os::fd::RawFd;
use std::process::ExitCode;

use crate::common::{Error, Result};
use crate::ipc::protocol::{WorkerSpec, WORKER_ENV};
use crate::ipc::transport::{set_cloexec, Pipe, PipeEnd, StdStream};

use super::descriptor::{Registry, TestBody};
use super::lifecycle::{run_lifecycle, LifecycleSummary};

/// Read the worker handshake, if this process was started as a worker
pub fn spec_from_env() -> Option<Result<WorkerSpec>> {
    parse_spec(std::env::var_os(WORKER_ENV))
}

fn parse_spec(value: Option<OsString>) -> Option<Result<WorkerSpec>> {
    let value = value?;
    Some(match value.to_str() {
        Some(text) => WorkerSpec::from_env_value(text),
        None => Err(Error::WorkerSpec(format!("{} is not valid UTF-8", WORKER_ENV))),
    })
}

/// Run the single test described by `spec` and exit
pub fn worker_main(spec: WorkerSpec, registry: &Registry) -> ExitCode {
    match run_worker(&spec, registry) {
        Ok(summary) => {
            tracing::debug!(
                "Worker for {} done: {} assertions, {} failed",
                spec.test,
                summary.assertions,
                summary.failed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Worker for {} failed: {}", spec.test, e);
            ExitCode::FAILURE
        }
    }
}

fn run_worker(spec: &WorkerSpec, registry: &Registry) -> Result<LifecycleSummary> {
    redirect_streams(spec)?;
    let mut events = adopt_event_pipe(spec.event_fd)?;

    let (test, suite) = registry.find(&spec.test)?;
    let params = match test.body {
        TestBody::Parameterized { params, .. } => Some(params()),
        TestBody::Simple(_) => None,
    };
    let param = match (&params, spec.param) {
        (Some(list), Some(index)) => Some(
            list.get(index)
                .ok_or_else(|| {
                    Error::WorkerSpec(format!(
                        "{} has {} parameters, index {} requested",
                        spec.test,
                        list.len(),
                        index
                    ))
                })?
                .as_ref(),
        ),
        (Some(_), None) => {
            return Err(Error::WorkerSpec(format!("{} needs a parameter index", spec.test)));
        }
        (None, _) => None,
    };

    run_lifecycle(test, suite, param, &mut events)
}

fn redirect_streams(spec: &WorkerSpec) -> Result<()> {
    let requested = [
        (StdStream::Stdin, spec.stdin_fd),
        (StdStream::Stdout, spec.stdout_fd),
        (StdStream::Stderr, spec.stderr_fd),
    ];
    for (stream, fd) in requested {
        let Some(fd) = fd else { continue };
        // SAFETY: the collector handed this descriptor to us and nothing else
        // in the process knows about it
        let mut pipe = unsafe {
            match stream.worker_end() {
                PipeEnd::Read => Pipe::adopt_read(fd)?,
                PipeEnd::Write => Pipe::adopt_write(fd)?,
            }
        };
        pipe.redirect_standard_stream(stream)?;
    }
    Ok(())
}

fn adopt_event_pipe(fd: RawFd) -> Result<File> {
    // SAFETY: see `redirect_streams`
    let pipe = unsafe { Pipe::adopt_write(fd)? };
    // Processes spawned by the test must not keep the event stream open
    set_cloexec(fd, true)?;
    pipe.into_writer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert::{TestContext, TestResult};
    use crate::ipc::codec::{EventReader, ReadOutcome, DEFAULT_MAX_FRAME};
    use crate::ipc::protocol::EventKind;
    use crate::ipc::transport::WorkerFds;
    use crate::worker::descriptor::{TestDescriptor, TestId};
    use std::os::fd::{FromRawFd, IntoRawFd};

    fn passes(ctx: &mut TestContext<'_>) -> TestResult {
        ctx.assert(crate::check!(true))
    }

    /// Split a fresh pipe into a reader we keep and a raw write fd the worker
    /// code adopts
    fn event_pipe() -> (File, RawFd) {
        let pipe = Pipe::create().unwrap();
        let read_fd = unsafe { libc::fcntl(pipe.read_end().unwrap(), libc::F_DUPFD_CLOEXEC, 0) };
        assert!(read_fd >= 0);
        let write_fd = pipe.into_writer().unwrap().into_raw_fd();
        (unsafe { File::from_raw_fd(read_fd) }, write_fd)
    }

    fn worker_spec(event_fd: RawFd, test: TestId) -> WorkerSpec {
        WorkerSpec::new(
            test,
            None,
            WorkerFds {
                events: event_fd,
                stdin: None,
                stdout: None,
                stderr: None,
            },
        )
    }

    fn trail(reader: File) -> Vec<EventKind> {
        let mut reader = EventReader::new(reader, DEFAULT_MAX_FRAME);
        let mut kinds = Vec::new();
        while let ReadOutcome::Event(event) = reader.read_event().unwrap() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[test]
    fn test_run_worker_writes_to_event_fd() {
        let registry = Registry::new().test(TestDescriptor::new("boot", "passes", passes));
        let (reader, write_fd) = event_pipe();
        let spec = worker_spec(write_fd, TestId::new("boot", "passes"));

        let summary = run_worker(&spec, &registry).unwrap();
        assert_eq!(summary.assertions, 1);

        let kinds = trail(reader);
        assert_eq!(kinds.first(), Some(&EventKind::PreInit));
        assert_eq!(kinds.last(), Some(&EventKind::PostFini));
        assert_eq!(kinds.len(), 5);
    }

    #[test]
    fn test_run_worker_unknown_test() {
        let registry = Registry::new();
        let (reader, write_fd) = event_pipe();
        let spec = worker_spec(write_fd, TestId::new("boot", "missing"));

        assert!(matches!(run_worker(&spec, &registry), Err(Error::TestNotFound(_))));
        // The adopted event pipe was closed without a single event
        assert!(trail(reader).is_empty());
    }

    #[test]
    fn test_parse_spec() {
        assert!(parse_spec(None).is_none());

        let spec = worker_spec(7, TestId::new("boot", "passes"));
        let value = OsString::from(spec.to_env_value().unwrap());
        assert_eq!(parse_spec(Some(value)).unwrap().unwrap(), spec);

        let garbage = parse_spec(Some(OsString::from("{not json")));
        assert!(matches!(garbage, Some(Err(Error::WorkerSpec(_)))));
    }
}
