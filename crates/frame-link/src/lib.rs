//! Frame ingestion from the embedded camera.
//!
//! - `server`: TCP listener that accepts the camera and assembles length-prefixed records.
//! - `protocol`: record framing and the timeout-aware assembler.
//! - `snapshot`: HTTP snapshot polling for cameras without the push protocol.
//! - `slot`: latest-frame hand-off to the consumer.
//! - `signal`: stop signal observed at every blocking point.

pub mod decode;
pub mod protocol;
pub mod server;
pub mod signal;
pub mod slot;
pub mod snapshot;
mod threads;
pub mod types;

pub use decode::decode_frame;
pub use protocol::{ReadLimits, Record, RecordReader, write_record};
pub use server::{DEFAULT_PORT, FrameLinkServer, ServerConfig};
pub use signal::StopSignal;
pub use slot::{FrameSink, FrameSlot};
pub use snapshot::{SnapshotConfig, SnapshotSource};
pub use threads::spawn_thread;
pub use types::{DisconnectReason, Frame, FrameFormat, LinkError, LinkStatus, SessionError};
