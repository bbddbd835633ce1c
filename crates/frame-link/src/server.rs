//! TCP server that accepts the camera peer and assembles frame records.
//!
//! State machine: `Idle → Listening → Connected → Listening … → Stopped`.
//! One peer is served at a time. While a session is active, further
//! connections wait in the listen backlog and are picked up once the current
//! session ends, so a reconnecting camera supersedes a dead session as soon as
//! the old one errors out or times out.
//!
//! The listener is non-blocking and the accept loop parks on the
//! [`StopSignal`] between polls, so [`FrameLinkServer::stop`] wakes it
//! immediately. Session sockets carry a short read timeout and the record
//! reader re-checks the signal after every read.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use tracing::{debug, info, info_span, trace, warn};

use crate::{
    decode::decode_frame,
    protocol::{ReadLimits, Record, RecordReader},
    signal::StopSignal,
    slot::FrameSink,
    threads::{WorkerHandle, spawn_thread},
    types::{DisconnectReason, LinkError, LinkStatus, SessionError},
};

/// Port the camera firmware connects to by default.
pub const DEFAULT_PORT: u16 = 8765;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub limits: ReadLimits,
    /// Sleep between non-blocking accept attempts (interrupted by stop).
    pub accept_poll: Duration,
    /// Socket read timeout; bounds how long a session read can ignore the stop signal.
    pub read_poll: Duration,
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            limits: ReadLimits::default(),
            accept_poll: Duration::from_millis(50),
            read_poll: Duration::from_millis(100),
        }
    }
}

/// Handle to the running frame link server thread.
pub struct FrameLinkServer {
    local_addr: SocketAddr,
    worker: WorkerHandle,
}

impl FrameLinkServer {
    /// Bind the listener and spawn the accept/receive thread.
    ///
    /// Bind failures are returned here and are fatal for the caller; once the
    /// thread is running, every connection-level failure is recovered by
    /// returning to the accept loop.
    pub fn start<S: FrameSink>(
        config: ServerConfig,
        sink: S,
        status: Sender<LinkStatus>,
        stop: StopSignal,
    ) -> Result<Self, LinkError> {
        let listener = TcpListener::bind(config.bind_addr).map_err(|source| LinkError::Bind {
            addr: config.bind_addr,
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let supervisor = Supervisor {
            listener,
            local_addr,
            config,
            sink,
            status,
            stop: stop.clone(),
        };
        let handle = spawn_thread("frame-link-server", move || supervisor.run()).map_err(
            |source| LinkError::Spawn {
                name: "frame-link-server",
                source,
            },
        )?;

        Ok(Self {
            local_addr,
            worker: WorkerHandle::new(stop, handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Request shutdown. Safe to call from any thread; does not wait.
    pub fn stop(&self) {
        self.worker.stop_signal().stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.worker.stop_signal().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Stop the server and block until its thread exits.
    pub fn shutdown(mut self) {
        self.stop();
        self.worker.join();
    }
}

/// One accepted peer connection. Lives only on the server thread.
struct ConnectionSession {
    peer: SocketAddr,
    started_at: Instant,
    last_activity: Instant,
    records: u64,
    frames: u64,
}

impl ConnectionSession {
    fn new(peer: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            peer,
            started_at: now,
            last_activity: now,
            records: 0,
            frames: 0,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.records += 1;
    }
}

struct Supervisor<S> {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    sink: S,
    status: Sender<LinkStatus>,
    stop: StopSignal,
}

impl<S: FrameSink> Supervisor<S> {
    fn run(self) {
        let endpoint = self.local_addr.to_string();
        info!(%endpoint, "frame link listening for camera");
        self.emit(LinkStatus::Listening {
            endpoint: endpoint.clone(),
        });

        let mut sequence: u64 = 0;
        while !self.stop.is_stopped() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.serve(stream, peer, &mut sequence);
                    if !self.stop.is_stopped() {
                        info!(%endpoint, "waiting for camera to reconnect");
                        self.emit(LinkStatus::Listening {
                            endpoint: endpoint.clone(),
                        });
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if self.stop.wait_timeout(self.config.accept_poll) {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("accept failed: {err}");
                    if self.stop.wait_timeout(self.config.accept_poll) {
                        break;
                    }
                }
            }
        }

        info!("frame link stopped");
        self.emit(LinkStatus::Stopped);
    }

    fn serve(&self, stream: TcpStream, peer: SocketAddr, sequence: &mut u64) {
        let span = info_span!("frame_link.session", %peer);
        let _guard = span.enter();

        if let Err(err) = configure_stream(&stream, self.config.read_poll) {
            warn!("failed to configure camera socket: {err}");
            let _ = stream.shutdown(Shutdown::Both);
            self.emit(LinkStatus::Disconnected {
                peer: peer.to_string(),
                reason: DisconnectReason::Error(err.to_string()),
            });
            return;
        }

        let mut session = ConnectionSession::new(peer);
        info!("camera connected");
        metrics::counter!("framelink_sessions_total").increment(1);
        metrics::gauge!("framelink_connected").set(1.0);
        self.emit(LinkStatus::Connected {
            peer: peer.to_string(),
        });

        let mut reader = RecordReader::new(&stream, self.config.limits);
        let reason = loop {
            match reader.read_record(&self.stop) {
                Ok(Record::Payload(payload)) => {
                    session.touch();
                    if self.handle_payload(&payload, sequence) {
                        session.frames += 1;
                    }
                }
                Ok(Record::Closed) => break DisconnectReason::Closed,
                Ok(Record::Truncated { expected, received }) => {
                    break DisconnectReason::Truncated { expected, received };
                }
                Ok(Record::Stopped) => break DisconnectReason::Stopped,
                Err(SessionError::Idle(timeout)) => {
                    warn!(?timeout, "no frame header from camera, dropping session");
                    break DisconnectReason::Idle;
                }
                Err(SessionError::Stalled { received, expected }) => {
                    warn!(received, expected, "frame receive timed out");
                    break DisconnectReason::Stalled { expected, received };
                }
                Err(err @ SessionError::Oversized { .. }) => {
                    warn!("{err}");
                    break DisconnectReason::Protocol(err.to_string());
                }
                Err(SessionError::Io(err)) => {
                    warn!("camera connection error: {err}");
                    break DisconnectReason::Error(err.to_string());
                }
            }
        };

        let _ = stream.shutdown(Shutdown::Both);
        metrics::gauge!("framelink_connected").set(0.0);
        info!(
            peer = %session.peer,
            records = session.records,
            frames = session.frames,
            uptime_ms = session.started_at.elapsed().as_millis() as u64,
            since_last_record_ms = session.last_activity.elapsed().as_millis() as u64,
            %reason,
            "camera session ended"
        );
        self.emit(LinkStatus::Disconnected {
            peer: peer.to_string(),
            reason,
        });
    }

    /// Decode and forward one assembled record. Returns whether a frame was emitted.
    fn handle_payload(&self, payload: &[u8], sequence: &mut u64) -> bool {
        *sequence = sequence.wrapping_add(1);
        metrics::counter!("framelink_bytes_total").increment(payload.len() as u64);
        match decode_frame(payload, *sequence) {
            Ok(frame) => {
                trace!(
                    sequence = frame.sequence,
                    width = frame.width,
                    height = frame.height,
                    "frame received"
                );
                metrics::counter!("framelink_frames_total").increment(1);
                self.sink.deliver(frame);
                true
            }
            Err(err) => {
                metrics::counter!("framelink_decode_failures_total").increment(1);
                debug!(len = payload.len(), "dropping undecodable frame: {err}");
                false
            }
        }
    }

    fn emit(&self, status: LinkStatus) {
        if self.status.try_send(status).is_err() {
            trace!("status channel unavailable");
        }
    }
}

fn configure_stream(stream: &TcpStream, read_poll: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(read_poll))?;
    stream.set_nodelay(true)?;
    Ok(())
}
