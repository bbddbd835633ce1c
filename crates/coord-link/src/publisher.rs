//! Rate-limited publishing of target coordinates to the actuator.

use std::time::{Duration, Instant};

use target_core::TargetObservation;
use tracing::{debug, info, warn};

use crate::{
    message::{ControlState, CoordinateMessage, Echo},
    transport::CoordinateTransport,
};

/// Failures after the first are logged only every this many attempts.
const FAILURE_LOG_EVERY: u32 = 5;

#[derive(Clone, Copy, Debug)]
pub struct PublisherConfig {
    /// Minimum spacing between successful sends; calls inside it are dropped.
    pub send_interval: Duration,
    /// Observations below this confidence are not published.
    pub min_confidence: f32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(100),
            min_confidence: 0.5,
        }
    }
}

/// Bookkeeping owned by the publisher.
#[derive(Clone, Debug, Default)]
pub struct PublishState {
    pub last_sent: Option<Instant>,
    pub consecutive_failures: u32,
    pub last_echo: Option<Echo>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PublishOutcome {
    Sent { echo: Option<Echo> },
    /// Dropped because the previous send was too recent.
    Throttled,
    /// Observation confidence was under the configured floor.
    BelowThreshold,
    Failed,
}

impl PublishOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

pub struct CoordinatePublisher<T> {
    transport: T,
    config: PublisherConfig,
    state: PublishState,
}

impl<T: CoordinateTransport> CoordinatePublisher<T> {
    pub fn new(transport: T, config: PublisherConfig) -> Self {
        Self {
            transport,
            config,
            state: PublishState::default(),
        }
    }

    pub fn state(&self) -> &PublishState {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Publish coordinates for `observation`, or the stop message for `None`.
    pub fn publish(
        &mut self,
        observation: Option<&TargetObservation>,
        controls: ControlState,
    ) -> PublishOutcome {
        self.publish_at(observation, controls, Instant::now())
    }

    pub fn publish_at(
        &mut self,
        observation: Option<&TargetObservation>,
        controls: ControlState,
        now: Instant,
    ) -> PublishOutcome {
        let message = match observation {
            Some(obs) if obs.confidence >= self.config.min_confidence => {
                CoordinateMessage::from_observation(obs, controls)
            }
            Some(_) => return PublishOutcome::BelowThreshold,
            None => CoordinateMessage::stop(controls),
        };

        if let Some(last) = self.state.last_sent {
            if now.saturating_duration_since(last) < self.config.send_interval {
                metrics::counter!("coordlink_throttled_total").increment(1);
                return PublishOutcome::Throttled;
            }
        }

        self.deliver(&message, now)
    }

    /// Send the stop message immediately, ignoring the send interval.
    pub fn force_stop(&mut self, controls: ControlState) -> PublishOutcome {
        self.deliver(&CoordinateMessage::stop(controls), Instant::now())
    }

    fn deliver(&mut self, message: &CoordinateMessage, now: Instant) -> PublishOutcome {
        match self.transport.send(message) {
            Ok(echo) => {
                metrics::counter!("coordlink_sends_total").increment(1);
                if self.state.consecutive_failures > 0 {
                    info!(
                        failures = self.state.consecutive_failures,
                        "actuator link recovered"
                    );
                }
                self.state.consecutive_failures = 0;
                self.state.last_sent = Some(now);
                if let Some(echo) = echo {
                    debug!(
                        rel_x = echo.rel_x,
                        rel_y = echo.rel_y,
                        button_state = ?echo.button_state,
                        confidence = ?echo.confidence,
                        "actuator echo"
                    );
                    self.state.last_echo = Some(echo);
                }
                PublishOutcome::Sent { echo }
            }
            Err(err) => {
                metrics::counter!("coordlink_send_failures_total").increment(1);
                self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
                let failures = self.state.consecutive_failures;
                if failures == 1 || failures % FAILURE_LOG_EVERY == 0 {
                    warn!(
                        failures,
                        stop = message.is_stop(),
                        timeout = err.is_timeout(),
                        "failed to publish coordinates: {err}"
                    );
                }
                PublishOutcome::Failed
            }
        }
    }
}
