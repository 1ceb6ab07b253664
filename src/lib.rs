//! Crucible - run every test in an isolated worker process
//!
//! A test binary registers its tests in a [`Registry`] and hands it to a
//! [`Harness`]. The harness re-executes the binary once per test; each worker
//! streams a binary event log (assertions, timing, phase boundaries) back
//! over a pipe, so a test that crashes or hangs only takes its own worker
//! down.

#[cfg(not(unix))]
compile_error!("crucible relies on Unix pipes and process semantics");

pub mod assert;
pub mod cli;
pub mod collector;
pub mod common;
pub mod ipc;
pub mod worker;

// Re-export the pieces a test binary needs
pub use assert::{check, Abort, Check, FailureAction, TestContext, TestResult};
pub use cli::Harness;
pub use collector::{Phase, TestOutcome, TestReport};
pub use common::{Error, Result};
pub use worker::{Registry, SuiteDescriptor, TestDescriptor, TestId};
