//! Event frame codec
//!
//! Writing is synchronous and flushes every frame, so the collector sees
//! events in emission order even if the worker dies right afterwards.
//! Reading goes through a resumable [`FrameDecoder`]: bytes can arrive in any
//! chunking and a frame is only handed out once it is complete.

use std::io::{self, Read, Write};

use crate::common::{Error, Result};

use super::protocol::{Event, EventKind, HEADER_LEN};

/// Default upper bound for a single payload (10 MB)
pub const DEFAULT_MAX_FRAME: u64 = 10 * 1024 * 1024;

/// Largest payload bound a configuration may ask for (1 GB)
pub const MAX_FRAME_LIMIT: u64 = 1024 * 1024 * 1024;

/// Frame and write one event, then flush
pub fn write_event<W: Write + ?Sized>(writer: &mut W, kind: EventKind, payload: &[u8]) -> io::Result<()> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(kind.tag());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);

    writer.write_all(&frame)?;
    writer.flush()
}

/// Incremental frame decoder
///
/// The declared payload length is checked against `max_frame` as soon as the
/// header is complete, before any body bytes are buffered. Once an error has
/// been reported the decoder stays poisoned.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame: u64,
    poisoned: bool,
}

impl FrameDecoder {
    pub fn new(max_frame: u64) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
            poisoned: false,
        }
    }

    /// Append raw bytes read from the transport
    pub fn push(&mut self, bytes: &[u8]) {
        if !self.poisoned {
            self.buf.extend_from_slice(bytes);
        }
    }

    /// Whether part of a frame is buffered
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Pop the next complete frame, if any
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        if self.poisoned {
            return Err(Error::protocol("event stream already rejected"));
        }
        match self.decode() {
            Err(e) => {
                self.poisoned = true;
                self.buf.clear();
                Err(e)
            }
            ok => ok,
        }
    }

    fn decode(&mut self) -> Result<Option<Event>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let kind = EventKind::try_from(self.buf[0])?;
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&self.buf[1..HEADER_LEN]);
        let declared = u64::from_le_bytes(len_bytes);
        if declared > self.max_frame {
            return Err(Error::FrameTooLarge {
                declared,
                max: self.max_frame,
            });
        }

        let total = usize::try_from(declared)
            .ok()
            .and_then(|len| len.checked_add(HEADER_LEN))
            .ok_or(Error::FrameTooLarge {
                declared,
                max: self.max_frame,
            })?;
        if self.buf.len() < total {
            return Ok(None);
        }

        let payload = self.buf[HEADER_LEN..total].to_vec();
        self.buf.drain(..total);

        let event = Event::new(kind, payload);
        event.validate()?;
        Ok(Some(event))
    }
}

/// Outcome of a read attempt on the event stream
#[derive(Debug, PartialEq)]
pub enum ReadOutcome {
    Event(Event),
    /// The write end closed on a frame boundary
    EndOfStream,
    /// Non-blocking source has no complete frame yet; call again later
    WouldBlock,
}

/// Blocking or non-blocking event reader over any byte source
pub struct EventReader<R> {
    inner: R,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
}

impl<R: Read> EventReader<R> {
    pub fn new(inner: R, max_frame: u64) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(max_frame),
            chunk: vec![0u8; 8 * 1024].into_boxed_slice(),
        }
    }

    /// Read until a full frame is available, the stream ends, or (in
    /// non-blocking mode) no more bytes are ready
    ///
    /// End-of-stream in the middle of a frame is a protocol error.
    pub fn read_event(&mut self) -> Result<ReadOutcome> {
        loop {
            if let Some(event) = self.decoder.next_event()? {
                return Ok(ReadOutcome::Event(event));
            }

            match self.inner.read(&mut self.chunk) {
                Ok(0) if self.decoder.has_partial() => {
                    return Err(Error::protocol("event stream ended inside a frame"));
                }
                Ok(0) => return Ok(ReadOutcome::EndOfStream),
                Ok(n) => self.decoder.push(&self.chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock)
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Read a single event from a blocking source with the default frame bound
///
/// Any bytes following the frame are discarded; use [`EventReader`] for
/// streams carrying several events.
pub fn read_event<R: Read>(reader: R) -> Result<ReadOutcome> {
    EventReader::new(reader, DEFAULT_MAX_FRAME).read_event()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{encode_elapsed, AssertionOutcome};
    use crate::ipc::transport::Pipe;
    use std::io::Cursor;

    fn assertion(message: &str) -> Vec<u8> {
        AssertionOutcome {
            passed: true,
            file: "src/lib.rs".to_string(),
            line: 7,
            message: message.to_string(),
        }
        .encode()
    }

    #[test]
    fn test_write_event_layout() {
        let mut out = Vec::new();
        write_event(&mut out, EventKind::PostTest, &encode_elapsed(Some(1.5))).unwrap();
        assert_eq!(out[0], EventKind::PostTest.tag());
        assert_eq!(&out[1..9], &8u64.to_le_bytes());
        assert_eq!(&out[9..], &1.5f64.to_le_bytes());
    }

    #[test]
    fn test_decoder_resumes_across_single_byte_chunks() {
        let mut wire = Vec::new();
        write_event(&mut wire, EventKind::PreInit, &[]).unwrap();
        write_event(&mut wire, EventKind::Assert, &assertion("ok\0ok")).unwrap();

        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME);
        let mut events = Vec::new();
        for byte in &wire {
            decoder.push(std::slice::from_ref(byte));
            while let Some(event) = decoder.next_event().unwrap() {
                events.push(event);
            }
        }

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::empty(EventKind::PreInit));
        assert_eq!(events[1].assertion().unwrap().message, "ok\0ok");
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_oversized_frame_rejected_before_body() {
        let mut decoder = FrameDecoder::new(64);
        let mut header = vec![EventKind::Assert.tag()];
        header.extend_from_slice(&(1u64 << 40).to_le_bytes());
        decoder.push(&header);

        let err = decoder.next_event().unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { declared, max: 64 } if declared == 1 << 40));
        assert!(decoder.is_poisoned());
        assert!(decoder.next_event().unwrap_err().is_protocol());
    }

    #[test]
    fn test_unbounded_decoder_rejects_overflowing_length() {
        let mut decoder = FrameDecoder::new(u64::MAX);
        let mut header = vec![EventKind::Assert.tag()];
        header.extend_from_slice(&u64::MAX.to_le_bytes());
        decoder.push(&header);

        let err = decoder.next_event().unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { declared: u64::MAX, .. }));
        assert!(decoder.is_poisoned());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut decoder = FrameDecoder::new(64);
        decoder.push(&[0xEE]);
        assert!(matches!(decoder.next_event(), Err(Error::UnknownEventKind(0xEE))));
    }

    #[test]
    fn test_reader_end_of_stream() {
        let mut wire = Vec::new();
        write_event(&mut wire, EventKind::PreTest, &[]).unwrap();

        let mut reader = EventReader::new(Cursor::new(wire), DEFAULT_MAX_FRAME);
        assert_eq!(
            reader.read_event().unwrap(),
            ReadOutcome::Event(Event::empty(EventKind::PreTest))
        );
        assert_eq!(reader.read_event().unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_reader_truncated_frame() {
        let mut wire = Vec::new();
        write_event(&mut wire, EventKind::Assert, &assertion("cut short")).unwrap();
        wire.truncate(wire.len() - 3);

        let err = read_event(Cursor::new(wire)).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_reader_nonblocking_partial_frame() {
        let pipe = Pipe::create_with(true).unwrap();
        let write_fd = pipe.write_end().unwrap();
        let mut writer = unsafe {
            use std::os::fd::FromRawFd;
            std::fs::File::from_raw_fd(libc::fcntl(write_fd, libc::F_DUPFD_CLOEXEC, 0))
        };
        let mut reader = EventReader::new(pipe.into_reader().unwrap(), DEFAULT_MAX_FRAME);

        assert_eq!(reader.read_event().unwrap(), ReadOutcome::WouldBlock);

        let mut wire = Vec::new();
        write_event(&mut wire, EventKind::Assert, &assertion("split")).unwrap();
        writer.write_all(&wire[..5]).unwrap();
        assert_eq!(reader.read_event().unwrap(), ReadOutcome::WouldBlock);

        writer.write_all(&wire[5..]).unwrap();
        match reader.read_event().unwrap() {
            ReadOutcome::Event(event) => {
                assert_eq!(event.assertion().unwrap().message, "split");
            }
            other => panic!("Expected event, got {:?}", other),
        }

        drop(writer);
        assert_eq!(reader.read_event().unwrap(), ReadOutcome::EndOfStream);
    }
}
