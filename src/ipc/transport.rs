//! Pipe transport between a worker and its collector
//!
//! Every worker gets one pipe for the event stream and, optionally, one pipe
//! per redirected standard stream. All descriptors are allocated before any
//! user code runs; both ends are close-on-exec until deliberately handed to a
//! worker, so a concurrently spawned worker never inherits another's pipe.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::common::{Error, Result};

/// One of the three process-global standard streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    pub const ALL: [StdStream; 3] = [StdStream::Stdin, StdStream::Stdout, StdStream::Stderr];

    /// The process-level descriptor number
    pub fn fd(self) -> RawFd {
        match self {
            Self::Stdin => libc::STDIN_FILENO,
            Self::Stdout => libc::STDOUT_FILENO,
            Self::Stderr => libc::STDERR_FILENO,
        }
    }

    /// Which pipe end gets bound to this stream inside the worker
    pub fn worker_end(self) -> PipeEnd {
        match self {
            Self::Stdin => PipeEnd::Read,
            Self::Stdout | Self::Stderr => PipeEnd::Write,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::Stdin => RedirectSet::REDIRECT_STDIN.0,
            Self::Stdout => RedirectSet::REDIRECT_STDOUT.0,
            Self::Stderr => RedirectSet::REDIRECT_STDERR.0,
        }
    }
}

impl std::fmt::Display for StdStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Set of standard streams to rebind inside a worker (default: none, inherit)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedirectSet(u8);

impl RedirectSet {
    pub const REDIRECT_STDIN: RedirectSet = RedirectSet(0b001);
    pub const REDIRECT_STDOUT: RedirectSet = RedirectSet(0b010);
    pub const REDIRECT_STDERR: RedirectSet = RedirectSet(0b100);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, stream: StdStream) {
        self.0 |= stream.bit();
    }

    pub fn contains(self, stream: StdStream) -> bool {
        self.0 & stream.bit() != 0
    }
}

impl std::ops::BitOr for RedirectSet {
    type Output = RedirectSet;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Which side of a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

/// A unidirectional pipe whose ends can be closed independently
///
/// Closing an end that is already closed is a no-op, so cleanup can run on
/// every exit path.
#[derive(Debug)]
pub struct Pipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Pipe {
    /// Allocate a fresh blocking pipe
    pub fn create() -> Result<Self> {
        Self::create_with(false)
    }

    /// Allocate a fresh pipe, optionally with both ends non-blocking
    pub fn create_with(nonblocking: bool) -> Result<Self> {
        let (read, write) = raw_pipe()?;
        let mut pipe = Self {
            read: Some(read),
            write: Some(write),
        };
        if nonblocking {
            pipe.set_nonblocking(PipeEnd::Read, true)?;
            pipe.set_nonblocking(PipeEnd::Write, true)?;
        }
        Ok(pipe)
    }

    /// Wrap a read descriptor inherited from the collector
    ///
    /// # Safety
    ///
    /// `fd` must not be owned by anything else in this process.
    pub unsafe fn adopt_read(fd: RawFd) -> Result<Self> {
        ensure_open(fd)?;
        Ok(Self {
            read: Some(OwnedFd::from_raw_fd(fd)),
            write: None,
        })
    }

    /// Wrap a write descriptor inherited from the collector
    ///
    /// # Safety
    ///
    /// `fd` must not be owned by anything else in this process.
    pub unsafe fn adopt_write(fd: RawFd) -> Result<Self> {
        ensure_open(fd)?;
        Ok(Self {
            read: None,
            write: Some(OwnedFd::from_raw_fd(fd)),
        })
    }

    /// Raw descriptor of the read end, if still open
    pub fn read_end(&self) -> Option<RawFd> {
        self.read.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Raw descriptor of the write end, if still open
    pub fn write_end(&self) -> Option<RawFd> {
        self.write.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Raw descriptor of the given end, if still open
    pub fn end(&self, end: PipeEnd) -> Option<RawFd> {
        match end {
            PipeEnd::Read => self.read_end(),
            PipeEnd::Write => self.write_end(),
        }
    }

    pub fn close_read(&mut self) {
        self.read.take();
    }

    pub fn close_write(&mut self) {
        self.write.take();
    }

    /// Close one end
    pub fn close(&mut self, end: PipeEnd) {
        match end {
            PipeEnd::Read => self.close_read(),
            PipeEnd::Write => self.close_write(),
        }
    }

    /// Switch an end between blocking and non-blocking mode
    pub fn set_nonblocking(&mut self, end: PipeEnd, nonblocking: bool) -> Result<()> {
        let fd = self.end(end).ok_or(Error::PipeClosed(end_name(end)))?;
        set_nonblocking(fd, nonblocking)?;
        Ok(())
    }

    /// Take ownership of the read end as an unbuffered file
    pub fn into_reader(mut self) -> Result<File> {
        self.read
            .take()
            .map(File::from)
            .ok_or(Error::PipeClosed("read"))
    }

    /// Take ownership of the write end as an unbuffered file
    pub fn into_writer(mut self) -> Result<File> {
        self.write
            .take()
            .map(File::from)
            .ok_or(Error::PipeClosed("write"))
    }

    /// Rebind a process-global standard stream to this pipe
    ///
    /// Stdin takes the read end, stdout/stderr take the write end. Both pipe
    /// ends are closed afterwards; only the standard descriptor remains. This
    /// cannot be undone for the lifetime of the process.
    pub fn redirect_standard_stream(&mut self, stream: StdStream) -> Result<()> {
        let end = stream.worker_end();
        let fd = self.end(end).ok_or(Error::PipeClosed(end_name(end)))?;

        // Anything Rust has buffered belongs to the old destination
        match stream {
            StdStream::Stdout => {
                let _ = io::stdout().flush();
            }
            StdStream::Stderr => {
                let _ = io::stderr().flush();
            }
            StdStream::Stdin => {}
        }

        if fd == stream.fd() {
            // Already in place; releasing ownership keeps it open
            let owned = match end {
                PipeEnd::Read => self.read.take(),
                PipeEnd::Write => self.write.take(),
            };
            std::mem::forget(owned);
        } else if unsafe { libc::dup2(fd, stream.fd()) } == -1 {
            // dup2 never marks the new descriptor close-on-exec
            return Err(Error::Io(io::Error::last_os_error()));
        }

        self.close_read();
        self.close_write();
        tracing::debug!("Redirected {} to pipe", stream);
        Ok(())
    }
}

fn end_name(end: PipeEnd) -> &'static str {
    match end {
        PipeEnd::Read => "read",
        PipeEnd::Write => "write",
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn raw_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(Error::from_pipe_error(io::Error::last_os_error()));
    }
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn raw_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(Error::from_pipe_error(io::Error::last_os_error()));
    }
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read.as_raw_fd(), true)?;
    set_cloexec(write.as_raw_fd(), true)?;
    Ok((read, write))
}

fn ensure_open(fd: RawFd) -> Result<()> {
    if fd < 0 || unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        return Err(Error::WorkerSpec(format!("descriptor {} is not open", fd)));
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Set or clear `FD_CLOEXEC`
///
/// Only uses `fcntl`, so it is safe to call between fork and exec.
pub fn set_cloexec(fd: RawFd, cloexec: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    let flags = if cloexec {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Descriptors a worker receives from its collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerFds {
    pub events: RawFd,
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    pub stderr: Option<RawFd>,
}

impl WorkerFds {
    /// Every descriptor that has to survive `exec`
    pub fn all(&self) -> Vec<RawFd> {
        std::iter::once(self.events)
            .chain(self.stdin)
            .chain(self.stdout)
            .chain(self.stderr)
            .collect()
    }
}

/// All pipes belonging to one worker
///
/// The collector keeps the read ends (and the write end of stdin); the worker
/// owns the opposite ends until it exits, which is how the collector observes
/// end-of-stream.
#[derive(Debug)]
pub struct TransportHandle {
    pub events: Pipe,
    pub stdin: Option<Pipe>,
    pub stdout: Option<Pipe>,
    pub stderr: Option<Pipe>,
}

impl TransportHandle {
    /// Allocate the event pipe plus one pipe per requested redirection
    pub fn create(redirect: RedirectSet) -> Result<Self> {
        let make = |stream: StdStream| -> Result<Option<Pipe>> {
            if redirect.contains(stream) {
                Pipe::create().map(Some)
            } else {
                Ok(None)
            }
        };

        Ok(Self {
            events: Pipe::create()?,
            stdin: make(StdStream::Stdin)?,
            stdout: make(StdStream::Stdout)?,
            stderr: make(StdStream::Stderr)?,
        })
    }

    /// The standard-stream pipe for `stream`, if redirected
    pub fn std_pipe(&mut self, stream: StdStream) -> Option<&mut Pipe> {
        match stream {
            StdStream::Stdin => self.stdin.as_mut(),
            StdStream::Stdout => self.stdout.as_mut(),
            StdStream::Stderr => self.stderr.as_mut(),
        }
    }

    /// Descriptors the worker must inherit
    pub fn worker_fds(&self) -> Result<WorkerFds> {
        let worker_end = |pipe: &Option<Pipe>, stream: StdStream| -> Result<Option<RawFd>> {
            match pipe {
                Some(p) => p
                    .end(stream.worker_end())
                    .map(Some)
                    .ok_or(Error::PipeClosed(end_name(stream.worker_end()))),
                None => Ok(None),
            }
        };

        Ok(WorkerFds {
            events: self.events.write_end().ok_or(Error::PipeClosed("write"))?,
            stdin: worker_end(&self.stdin, StdStream::Stdin)?,
            stdout: worker_end(&self.stdout, StdStream::Stdout)?,
            stderr: worker_end(&self.stderr, StdStream::Stderr)?,
        })
    }

    /// Drop the collector's copies of the worker-side ends
    ///
    /// Must be called once the worker has been spawned, otherwise the
    /// collector itself keeps the write ends alive and never sees EOF.
    pub fn close_worker_ends(&mut self) {
        self.events.close_write();
        for stream in StdStream::ALL {
            if let Some(pipe) = self.std_pipe(stream) {
                pipe.close(stream.worker_end());
            }
        }
    }
}
