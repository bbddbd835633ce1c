//! Length-prefixed frame record protocol.
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Encoded image (N bytes)  │
//! │ Big-endian u32   │ JPEG from the camera     │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! There is no acknowledgement and no sequence number. The reader only yields a
//! payload once all `N` bytes are buffered, no matter how many socket reads that
//! took. The underlying reader is expected to return `WouldBlock`/`TimedOut`
//! periodically (a socket read timeout) so the stop signal and the idle/stall
//! deadlines are re-checked between reads.

use std::{
    io::{self, ErrorKind, Read, Write},
    time::{Duration, Instant},
};

use crate::{signal::StopSignal, types::SessionError};

pub const HEADER_LEN: usize = 4;

/// Deadlines and bounds applied while assembling records.
#[derive(Clone, Copy, Debug)]
pub struct ReadLimits {
    /// Time allowed without a header byte between records.
    pub idle_timeout: Duration,
    /// Time allowed without progress while a payload is partially received.
    pub stall_timeout: Duration,
    pub max_record_len: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
            stall_timeout: Duration::from_secs(10),
            max_record_len: 4 * 1024 * 1024,
        }
    }
}

/// Outcome of one attempt to read a record.
#[derive(Debug, PartialEq, Eq)]
pub enum Record {
    Payload(Vec<u8>),
    /// Peer closed before a complete header arrived.
    Closed,
    /// Peer closed after the header but before the full payload.
    Truncated { expected: usize, received: usize },
    Stopped,
}

enum Fill {
    Complete,
    Eof { received: usize },
    TimedOut { received: usize },
    Stopped,
}

pub struct RecordReader<R> {
    inner: R,
    limits: ReadLimits,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R, limits: ReadLimits) -> Self {
        Self { inner, limits }
    }

    /// Read the next complete record.
    pub fn read_record(&mut self, stop: &StopSignal) -> Result<Record, SessionError> {
        let mut header = [0u8; HEADER_LEN];
        match self.fill(&mut header, self.limits.idle_timeout, stop)? {
            Fill::Complete => {}
            Fill::Eof { .. } => return Ok(Record::Closed),
            Fill::Stopped => return Ok(Record::Stopped),
            Fill::TimedOut { .. } => return Err(SessionError::Idle(self.limits.idle_timeout)),
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > self.limits.max_record_len {
            return Err(SessionError::Oversized {
                len,
                max: self.limits.max_record_len,
            });
        }

        let mut payload = vec![0u8; len];
        match self.fill(&mut payload, self.limits.stall_timeout, stop)? {
            Fill::Complete => Ok(Record::Payload(payload)),
            Fill::Eof { received } => Ok(Record::Truncated {
                expected: len,
                received,
            }),
            Fill::Stopped => Ok(Record::Stopped),
            Fill::TimedOut { received } => Err(SessionError::Stalled {
                received,
                expected: len,
            }),
        }
    }

    fn fill(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
        stop: &StopSignal,
    ) -> Result<Fill, SessionError> {
        let mut filled = 0;
        let mut last_progress = Instant::now();
        while filled < buf.len() {
            if stop.is_stopped() {
                return Ok(Fill::Stopped);
            }
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Ok(Fill::Eof { received: filled }),
                Ok(n) => {
                    filled += n;
                    last_progress = Instant::now();
                }
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if last_progress.elapsed() > timeout {
                        return Ok(Fill::TimedOut { received: filled });
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Fill::Complete)
    }
}

/// Write one record. Used by camera simulators and tests.
pub fn write_record<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "payload exceeds u32 length"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, thread};

    use super::*;

    enum Step {
        Data(Vec<u8>),
        /// Sleep, then report a read timeout.
        Pause(Duration),
        Fail(ErrorKind),
    }

    /// Reader that replays a script; returns EOF once the script is exhausted.
    struct ScriptedReader {
        steps: VecDeque<Step>,
        reads: usize,
    }

    impl ScriptedReader {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                reads: 0,
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            match self.steps.pop_front() {
                None => Ok(0),
                Some(Step::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        let rest = data.split_off(n);
                        self.steps.push_front(Step::Data(rest));
                    }
                    Ok(n)
                }
                Some(Step::Pause(duration)) => {
                    thread::sleep(duration);
                    Err(ErrorKind::TimedOut.into())
                }
                Some(Step::Fail(kind)) => Err(kind.into()),
            }
        }
    }

    fn record_bytes(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_record(&mut out, payload).unwrap();
        out
    }

    fn limits(stall: Duration) -> ReadLimits {
        ReadLimits {
            idle_timeout: Duration::from_secs(5),
            stall_timeout: stall,
            max_record_len: 1024,
        }
    }

    #[test]
    fn assembly_does_not_depend_on_read_count() {
        let payload: Vec<u8> = (0..200u8).collect();
        let bytes = record_bytes(&payload);
        let stop = StopSignal::new();

        for chunk in [1usize, 2, 3, 7, 64, bytes.len()] {
            let steps = bytes
                .chunks(chunk)
                .map(|c| Step::Data(c.to_vec()))
                .collect();
            let mut reader = RecordReader::new(ScriptedReader::new(steps), ReadLimits::default());
            assert_eq!(
                reader.read_record(&stop).unwrap(),
                Record::Payload(payload.clone()),
                "chunk size {chunk}"
            );
            assert_eq!(reader.read_record(&stop).unwrap(), Record::Closed);
        }
    }

    #[test]
    fn zero_length_record_is_delivered_empty() {
        let stop = StopSignal::new();
        let steps = vec![Step::Data(record_bytes(&[]))];
        let mut reader = RecordReader::new(ScriptedReader::new(steps), ReadLimits::default());
        assert_eq!(reader.read_record(&stop).unwrap(), Record::Payload(Vec::new()));
    }

    #[test]
    fn partial_header_then_close_is_a_normal_disconnect() {
        let stop = StopSignal::new();
        let steps = vec![Step::Data(vec![0, 0, 1])];
        let mut reader = RecordReader::new(ScriptedReader::new(steps), ReadLimits::default());
        assert_eq!(reader.read_record(&stop).unwrap(), Record::Closed);
    }

    #[test]
    fn short_payload_then_close_is_truncated() {
        let stop = StopSignal::new();
        let steps = vec![
            Step::Data(vec![0x00, 0x00, 0x00, 0x05]),
            Step::Data(vec![1, 2, 3]),
        ];
        let mut reader = RecordReader::new(ScriptedReader::new(steps), ReadLimits::default());
        assert_eq!(
            reader.read_record(&stop).unwrap(),
            Record::Truncated {
                expected: 5,
                received: 3
            }
        );
    }

    #[test]
    fn stall_longer_than_timeout_ends_the_session() {
        let stop = StopSignal::new();
        let mut steps = vec![Step::Data(vec![0, 0, 0, 4]), Step::Data(vec![9])];
        steps.extend((0..20).map(|_| Step::Pause(Duration::from_millis(40))));
        let mut reader = RecordReader::new(
            ScriptedReader::new(steps),
            limits(Duration::from_millis(100)),
        );
        match reader.read_record(&stop) {
            Err(SessionError::Stalled { received, expected }) => {
                assert_eq!((received, expected), (1, 4));
            }
            other => panic!("expected stall, got {other:?}"),
        }
    }

    #[test]
    fn stall_shorter_than_timeout_is_tolerated() {
        let stop = StopSignal::new();
        let steps = vec![
            Step::Data(vec![0, 0, 0, 3]),
            Step::Data(vec![1]),
            Step::Pause(Duration::from_millis(20)),
            Step::Data(vec![2, 3]),
        ];
        let mut reader =
            RecordReader::new(ScriptedReader::new(steps), limits(Duration::from_secs(2)));
        assert_eq!(
            reader.read_record(&stop).unwrap(),
            Record::Payload(vec![1, 2, 3])
        );
    }

    #[test]
    fn idle_between_records_times_out() {
        let stop = StopSignal::new();
        let steps = (0..10)
            .map(|_| Step::Pause(Duration::from_millis(30)))
            .collect();
        let mut reader = RecordReader::new(
            ScriptedReader::new(steps),
            ReadLimits {
                idle_timeout: Duration::from_millis(50),
                ..ReadLimits::default()
            },
        );
        assert!(matches!(
            reader.read_record(&stop),
            Err(SessionError::Idle(_))
        ));
    }

    #[test]
    fn oversized_length_is_rejected_before_allocation() {
        let stop = StopSignal::new();
        let steps = vec![Step::Data(u32::MAX.to_be_bytes().to_vec())];
        let mut reader = RecordReader::new(ScriptedReader::new(steps), ReadLimits::default());
        assert!(matches!(
            reader.read_record(&stop),
            Err(SessionError::Oversized { .. })
        ));
    }

    #[test]
    fn stop_interrupts_assembly() {
        let stop = StopSignal::new();
        stop.stop();
        let steps = vec![Step::Data(record_bytes(b"abc"))];
        let mut reader = RecordReader::new(ScriptedReader::new(steps), ReadLimits::default());
        assert_eq!(reader.read_record(&stop).unwrap(), Record::Stopped);
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let stop = StopSignal::new();
        let steps = vec![
            Step::Fail(ErrorKind::Interrupted),
            Step::Data(record_bytes(b"ok")),
        ];
        let mut reader = RecordReader::new(ScriptedReader::new(steps), ReadLimits::default());
        assert_eq!(reader.read_record(&stop).unwrap(), Record::Payload(b"ok".to_vec()));
    }

    #[test]
    fn hard_io_errors_surface() {
        let stop = StopSignal::new();
        let steps = vec![Step::Fail(ErrorKind::ConnectionReset)];
        let mut reader = RecordReader::new(ScriptedReader::new(steps), ReadLimits::default());
        assert!(matches!(reader.read_record(&stop), Err(SessionError::Io(_))));
    }

    #[test]
    fn reader_counts_every_underlying_read() {
        let stop = StopSignal::new();
        let bytes = record_bytes(&[1, 2, 3, 4]);
        let steps = bytes.iter().map(|b| Step::Data(vec![*b])).collect();
        let mut reader = RecordReader::new(ScriptedReader::new(steps), ReadLimits::default());
        reader.read_record(&stop).unwrap();
        assert_eq!(reader.inner.reads, 8);
    }
}
