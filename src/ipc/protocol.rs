//! Event protocol types
//!
//! Every event crossing the worker → collector pipe is framed as
//! ```text
//! [1 byte kind][8 bytes payload length, LE][payload]
//! ```
//! ASSERT payloads carry an [`AssertionOutcome`], POST_TEST carries the elapsed
//! time as an `f64`, every other phase has an empty payload.

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::ipc::transport::WorkerFds;
use crate::worker::TestId;

/// Size of the fixed frame header
pub const HEADER_LEN: usize = 1 + 8;

/// Environment variable carrying the [`WorkerSpec`] handshake
pub const WORKER_ENV: &str = "CRUCIBLE_WORKER";

/// Kind tag of an event (do not reorder: the discriminants are the wire tags)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    PreEverything = 0,
    PreInit = 1,
    PreTest = 2,
    Assert = 3,
    PostTest = 4,
    PostFini = 5,
    PostEverything = 6,
}

impl EventKind {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for EventKind {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::PreEverything,
            1 => Self::PreInit,
            2 => Self::PreTest,
            3 => Self::Assert,
            4 => Self::PostTest,
            5 => Self::PostFini,
            6 => Self::PostEverything,
            other => return Err(Error::UnknownEventKind(other)),
        })
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PreEverything => "PRE_EVERYTHING",
            Self::PreInit => "PRE_INIT",
            Self::PreTest => "PRE_TEST",
            Self::Assert => "ASSERT",
            Self::PostTest => "POST_TEST",
            Self::PostFini => "POST_FINI",
            Self::PostEverything => "POST_EVERYTHING",
        };
        f.write_str(name)
    }
}

/// A decoded frame: kind plus owned payload bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(kind: EventKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Build an event with no payload
    pub fn empty(kind: EventKind) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Decode the payload of an ASSERT event
    pub fn assertion(&self) -> Result<AssertionOutcome> {
        if self.kind != EventKind::Assert {
            return Err(Error::protocol(format!("{} event has no assertion payload", self.kind)));
        }
        AssertionOutcome::decode(&self.payload)
    }

    /// Decode the payload of a POST_TEST event (`None` = timer unavailable)
    pub fn elapsed(&self) -> Result<Option<f64>> {
        if self.kind != EventKind::PostTest {
            return Err(Error::protocol(format!("{} event has no timing payload", self.kind)));
        }
        decode_elapsed(&self.payload)
    }

    /// Check that the payload is well formed for the kind
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            EventKind::Assert => self.assertion().map(|_| ()),
            EventKind::PostTest => self.elapsed().map(|_| ()),
            _ if self.payload.is_empty() => Ok(()),
            kind => Err(Error::protocol(format!(
                "{} event carries {} unexpected payload bytes",
                kind,
                self.payload.len()
            ))),
        }
    }
}

/// Encode the POST_TEST timing payload
pub fn encode_elapsed(elapsed: Option<f64>) -> [u8; 8] {
    elapsed.unwrap_or(-1.0).to_le_bytes()
}

/// Decode the POST_TEST timing payload; negative or NaN means unavailable
pub fn decode_elapsed(payload: &[u8]) -> Result<Option<f64>> {
    let bytes: [u8; 8] = payload.try_into().map_err(|_| {
        Error::protocol(format!("POST_TEST payload must be 8 bytes, got {}", payload.len()))
    })?;
    let value = f64::from_le_bytes(bytes);
    if value.is_nan() || value < 0.0 {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

/// Result of a single assertion, as sent in an ASSERT event
///
/// Built at the point of evaluation, serialized immediately and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub file: String,
    pub line: u64,
    pub message: String,
}

impl AssertionOutcome {
    /// Serialize as
    /// `[1 passed][8 line][4 file_len][file][8 message_len][message]`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(1 + 8 + 4 + self.file.len() + 8 + self.message.len());
        buf.push(u8::from(self.passed));
        buf.extend_from_slice(&self.line.to_le_bytes());
        buf.extend_from_slice(&(self.file.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.file.as_bytes());
        buf.extend_from_slice(&(self.message.len() as u64).to_le_bytes());
        buf.extend_from_slice(self.message.as_bytes());
        buf
    }

    /// Parse an ASSERT payload, validating every length against the buffer
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut cursor = PayloadCursor::new(payload);

        let passed = match cursor.take(1)?[0] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::protocol(format!("invalid passed flag {}", other)));
            }
        };
        let line = u64::from_le_bytes(cursor.array()?);
        let file_len = u32::from_le_bytes(cursor.array()?) as u64;
        let file = cursor.text(file_len, "file name")?;
        let message_len = u64::from_le_bytes(cursor.array()?);
        let message = cursor.text(message_len, "message")?;

        if cursor.remaining() != 0 {
            return Err(Error::protocol(format!(
                "{} trailing bytes after assertion payload",
                cursor.remaining()
            )));
        }

        Ok(Self {
            passed,
            file,
            line,
            message,
        })
    }
}

struct PayloadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: u64) -> Result<&'a [u8]> {
        if len > self.remaining() as u64 {
            return Err(Error::protocol(format!(
                "assertion payload truncated: need {} bytes, {} left",
                len,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += len as usize;
        Ok(&self.buf[start..self.pos])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N as u64)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn text(&mut self, len: u64, what: &str) -> Result<String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::protocol(format!("{} is not valid UTF-8: {}", what, e)))
    }
}

/// Handshake passed from collector to worker through [`WORKER_ENV`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Test to run
    pub test: TestId,
    /// Index into the test's parameter list, for parameterized tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<usize>,
    /// Inherited write end of the event pipe
    pub event_fd: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin_fd: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_fd: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_fd: Option<i32>,
}

impl WorkerSpec {
    pub fn new(test: TestId, param: Option<usize>, fds: WorkerFds) -> Self {
        Self {
            test,
            param,
            event_fd: fds.events,
            stdin_fd: fds.stdin,
            stdout_fd: fds.stdout,
            stderr_fd: fds.stderr,
        }
    }

    pub fn to_env_value(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_env_value(value: &str) -> Result<Self> {
        serde_json::from_str(value).map_err(|e| Error::WorkerSpec(e.to_string()))
    }
}
