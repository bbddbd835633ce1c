//! Target-loss failsafe: tells the actuator to stop once detections dry up.

use std::time::{Duration, Instant};

use tracing::info;

use crate::{
    message::ControlState,
    publisher::{CoordinatePublisher, PublishOutcome},
    transport::CoordinateTransport,
};

pub const DEFAULT_OBJECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Tracks the time since the last detection and sends a single stop per loss
/// episode. A stop that fails or is throttled is retried on later ticks.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    last_seen: Instant,
    stop_sent: bool,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self::starting_at(timeout, Instant::now())
    }

    /// Start the clock at `now` as if a detection had just been seen, so a
    /// fresh process stops the actuator once the timeout passes.
    pub fn starting_at(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_seen: now,
            stop_sent: false,
        }
    }

    pub fn stop_sent(&self) -> bool {
        self.stop_sent
    }

    pub fn on_detection(&mut self) {
        self.on_detection_at(Instant::now());
    }

    pub fn on_detection_at(&mut self, now: Instant) {
        self.last_seen = now;
        self.stop_sent = false;
    }

    pub fn is_lost_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.timeout
    }

    /// Run once per pipeline cycle. Returns the publish outcome when a stop was attempted.
    pub fn tick<T: CoordinateTransport>(
        &mut self,
        publisher: &mut CoordinatePublisher<T>,
        controls: ControlState,
    ) -> Option<PublishOutcome> {
        self.tick_at(publisher, controls, Instant::now())
    }

    pub fn tick_at<T: CoordinateTransport>(
        &mut self,
        publisher: &mut CoordinatePublisher<T>,
        controls: ControlState,
        now: Instant,
    ) -> Option<PublishOutcome> {
        if self.stop_sent || !self.is_lost_at(now) {
            return None;
        }
        let outcome = publisher.publish_at(None, controls, now);
        if outcome.is_sent() {
            self.stop_sent = true;
            metrics::counter!("coordlink_target_lost_total").increment(1);
            info!(
                lost_for_ms = now.saturating_duration_since(self.last_seen).as_millis() as u64,
                "target lost, actuator stopped"
            );
        }
        Some(outcome)
    }
}
