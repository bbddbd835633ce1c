use std::{fmt, io, net::SocketAddr, time::Duration};

use thiserror::Error;

/// Decoded RGB frame received from the embedded camera.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    /// Per-source counter of assembled records, including ones that failed to decode.
    pub sequence: u64,
    pub format: FrameFormat,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Rgb8,
}

/// Startup and supervision failures. Anything returned from `start` is fatal for the caller.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to bind frame link listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn {name} thread")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to build HTTP client for {url:?}")]
    Client {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reasons a peer session is torn down by the record reader.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no frame header within {0:?}")]
    Idle(Duration),
    #[error("payload stalled after {received} of {expected} bytes")]
    Stalled { received: usize, expected: usize },
    #[error("declared frame length {len} exceeds limit of {max} bytes")]
    Oversized { len: usize, max: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Why a session ended, as reported on the status channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed the connection on a record boundary (or inside a header).
    Closed,
    /// Peer closed after announcing a payload it never finished sending.
    Truncated { expected: usize, received: usize },
    Idle,
    Stalled { expected: usize, received: usize },
    Protocol(String),
    Error(String),
    Stopped,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => f.write_str("closed by peer"),
            DisconnectReason::Truncated { expected, received } => {
                write!(f, "closed mid-frame ({received}/{expected} bytes)")
            }
            DisconnectReason::Idle => f.write_str("idle timeout"),
            DisconnectReason::Stalled { expected, received } => {
                write!(f, "receive timeout ({received}/{expected} bytes)")
            }
            DisconnectReason::Protocol(msg) => write!(f, "protocol error: {msg}"),
            DisconnectReason::Error(msg) => write!(f, "connection error: {msg}"),
            DisconnectReason::Stopped => f.write_str("server stopping"),
        }
    }
}

/// Connectivity transitions published on the status channel, separate from frame data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Listening { endpoint: String },
    Connected { peer: String },
    Disconnected { peer: String, reason: DisconnectReason },
    Stopped,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Connected { .. })
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Listening { endpoint } => {
                write!(f, "waiting for camera on {endpoint}")
            }
            LinkStatus::Connected { peer } => write!(f, "camera connected: {peer}"),
            LinkStatus::Disconnected { peer, reason } => {
                write!(f, "camera {peer} disconnected ({reason})")
            }
            LinkStatus::Stopped => f.write_str("frame link stopped"),
        }
    }
}
