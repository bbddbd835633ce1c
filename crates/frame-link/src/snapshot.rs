//! Polling frame source for cameras that serve single JPEG snapshots over HTTP
//! (`GET /cam-hi.jpg`) instead of pushing length-prefixed records.

use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use reqwest::blocking::Client;
use tracing::{debug, info, trace, warn};

use crate::{
    decode::decode_frame,
    signal::StopSignal,
    slot::FrameSink,
    threads::{WorkerHandle, spawn_thread},
    types::{DisconnectReason, LinkError, LinkStatus},
};

#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    pub url: String,
    /// Minimum spacing between requests.
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl SnapshotConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(2),
        }
    }
}

pub struct SnapshotSource {
    worker: WorkerHandle,
}

impl SnapshotSource {
    pub fn start<S: FrameSink>(
        config: SnapshotConfig,
        sink: S,
        status: Sender<LinkStatus>,
        stop: StopSignal,
    ) -> Result<Self, LinkError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| LinkError::Client {
                url: config.url.clone(),
                source,
            })?;

        let poll_stop = stop.clone();
        let handle = spawn_thread("frame-link-snapshot", move || {
            poll_loop(&client, &config, &sink, &status, &poll_stop)
        })
        .map_err(|source| LinkError::Spawn {
            name: "frame-link-snapshot",
            source,
        })?;

        Ok(Self {
            worker: WorkerHandle::new(stop, handle),
        })
    }

    pub fn stop(&self) {
        self.worker.stop_signal().stop();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn shutdown(mut self) {
        self.stop();
        self.worker.join();
    }
}

fn poll_loop<S: FrameSink>(
    client: &Client,
    config: &SnapshotConfig,
    sink: &S,
    status: &Sender<LinkStatus>,
    stop: &StopSignal,
) {
    let emit = |s: LinkStatus| {
        if status.try_send(s).is_err() {
            trace!("status channel unavailable");
        }
    };

    info!(url = %config.url, "polling camera snapshots");
    emit(LinkStatus::Listening {
        endpoint: config.url.clone(),
    });

    let mut online = false;
    let mut sequence: u64 = 0;
    while !stop.is_stopped() {
        let started = Instant::now();
        match fetch(client, &config.url) {
            Ok(body) => {
                if !online {
                    online = true;
                    info!(url = %config.url, "camera snapshot endpoint reachable");
                    emit(LinkStatus::Connected {
                        peer: config.url.clone(),
                    });
                }
                sequence = sequence.wrapping_add(1);
                match decode_frame(&body, sequence) {
                    Ok(frame) => {
                        metrics::counter!("framelink_frames_total").increment(1);
                        sink.deliver(frame);
                    }
                    Err(err) => {
                        metrics::counter!("framelink_decode_failures_total").increment(1);
                        debug!(len = body.len(), "dropping undecodable snapshot: {err}");
                    }
                }
            }
            Err(err) => {
                if online {
                    online = false;
                    warn!(url = %config.url, "camera snapshot failed: {err}");
                    emit(LinkStatus::Disconnected {
                        peer: config.url.clone(),
                        reason: DisconnectReason::Error(err.to_string()),
                    });
                } else {
                    debug!(url = %config.url, "camera snapshot unavailable: {err}");
                }
            }
        }

        let remaining = config.interval.saturating_sub(started.elapsed());
        if stop.wait_timeout(remaining.max(Duration::from_millis(1))) {
            break;
        }
    }

    info!("snapshot polling stopped");
    emit(LinkStatus::Stopped);
}

fn fetch(client: &Client, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let response = client.get(url).send()?.error_for_status()?;
    Ok(response.bytes()?.to_vec())
}
