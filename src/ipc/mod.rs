//! IPC between an isolated worker and its collector
//!
//! Pipes carry a binary, length-prefixed event stream (plus optional raw
//! standard-stream captures) from each worker process to the collector.

pub mod codec;
pub mod protocol;
pub mod transport;

pub use codec::{read_event, write_event, EventReader, FrameDecoder, ReadOutcome};
pub use protocol::{AssertionOutcome, Event, EventKind, WorkerSpec};
pub use transport::{Pipe, PipeEnd, RedirectSet, StdStream, TransportHandle};
