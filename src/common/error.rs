//! Error types for the test engine
//!
//! Assertion failures, crashes and timeouts are *test outcomes*, not errors:
//! they live in [`crate::collector::TestOutcome`]. The variants here describe
//! failures of the machinery itself (pipes, framing, spawning, configuration).

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test engine
#[derive(Error, Debug)]
pub enum Error {
    // === Transport Errors ===
    #[error("Could not allocate pipe descriptors: {0}")]
    ResourceExhausted(#[source] io::Error),

    #[error("Pipe end already closed: {0}")]
    PipeClosed(&'static str),

    // === Protocol Errors ===
    #[error("Event protocol error: {0}")]
    Protocol(String),

    #[error("Event frame too large: declared {declared} bytes, maximum is {max}")]
    FrameTooLarge { declared: u64, max: u64 },

    #[error("Unknown event kind tag {0}")]
    UnknownEventKind(u8),

    // === Worker Errors ===
    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(String),

    #[error("Invalid worker handshake: {0}")]
    WorkerSpec(String),

    #[error("Test '{0}' is not registered")]
    TestNotFound(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether this error means the event stream can no longer be trusted
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::FrameTooLarge { .. } | Self::UnknownEventKind(_)
        )
    }

    /// Map a descriptor allocation failure, distinguishing exhaustion from
    /// other OS errors
    pub fn from_pipe_error(e: io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOMEM) => {
                Self::ResourceExhausted(e)
            }
            _ => Self::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_classification() {
        assert!(Error::protocol("bad").is_protocol());
        assert!(Error::FrameTooLarge { declared: 10, max: 5 }.is_protocol());
        assert!(Error::UnknownEventKind(42).is_protocol());
        assert!(!Error::Config("x".into()).is_protocol());
    }

    #[test]
    fn test_pipe_error_mapping() {
        let exhausted = Error::from_pipe_error(io::Error::from_raw_os_error(libc::EMFILE));
        assert!(matches!(exhausted, Error::ResourceExhausted(_)));

        let other = Error::from_pipe_error(io::Error::from_raw_os_error(libc::EFAULT));
        assert!(matches!(other, Error::Io(_)));
    }
}
