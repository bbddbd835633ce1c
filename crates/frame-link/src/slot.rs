//! Hand-off from the ingestion thread to the frame consumer.

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crossbeam_channel::{Sender, TrySendError};
use tracing::trace;

use crate::types::Frame;

/// Consumer side of a frame source. Implementations must return promptly;
/// the receive loop calls this inline between socket reads.
pub trait FrameSink: Send + Sync + 'static {
    fn deliver(&self, frame: Frame);
}

impl FrameSink for Sender<Frame> {
    fn deliver(&self, frame: Frame) {
        match self.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                trace!(sequence = frame.sequence, "frame channel full, dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("frame consumer gone, dropping frame");
            }
        }
    }
}

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    superseded: u64,
}

/// Single-slot "latest frame" mailbox. A new frame replaces any frame the
/// consumer has not taken yet, so the consumer only ever sees the freshest one.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<(Mutex<SlotState>, Condvar)>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the pending frame without waiting.
    pub fn try_take(&self) -> Option<Frame> {
        let (lock, _) = &*self.inner;
        lock.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frame
            .take()
    }

    /// Wait up to `timeout` for a frame to become available.
    pub fn take_timeout(&self, timeout: Duration) -> Option<Frame> {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(frame) = state.frame.take() {
                return Some(frame);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = cvar
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Number of frames overwritten before the consumer took them.
    pub fn superseded(&self) -> u64 {
        let (lock, _) = &*self.inner;
        lock.lock().unwrap_or_else(PoisonError::into_inner).superseded
    }
}

impl FrameSink for FrameSlot {
    fn deliver(&self, frame: Frame) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stale) = state.frame.replace(frame) {
            state.superseded = state.superseded.wrapping_add(1);
            metrics::counter!("framelink_frames_superseded_total").increment(1);
            trace!(sequence = stale.sequence, "superseded unconsumed frame");
        }
        cvar.notify_one();
    }
}
