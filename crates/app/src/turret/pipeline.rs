//! Pipeline supervisor tying together the frame source, detector, target
//! selection and the actuator link.
//!
//! Everything after "a frame arrived" runs synchronously on the calling
//! thread, one frame at a time. Frames come from a single-slot hand-off, so a
//! slow detector only ever sees the freshest frame.

use std::{path::Path, sync::Once, time::Instant};

use anyhow::{Context, Result, anyhow};
use coord_link::{
    ControlState, CoordinatePublisher, CoordinateTransport, HttpTransport, PublishOutcome, Watchdog,
};
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use frame_link::{Frame, FrameLinkServer, FrameSlot, LinkStatus, SnapshotSource, StopSignal};
use target_core::{Detector, IdleDetector, ReplayDetector, TargetSelector};
use tracing::{debug, debug_span, info, warn};

use crate::turret::{
    config::{LinkConfig, SourceConfig},
    controls::{self, ControlCommand},
    telemetry,
};

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Run the turret link until Ctrl+C, an operator `quit`, or a fatal source failure.
pub fn run(config: LinkConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    let prometheus = telemetry::init_metrics_recorder(config.telemetry.metrics_addr)?;

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || handler_stop.stop()) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let link_span = tracing::info_span!(
        "turret.link",
        source = %config.source_uri,
        kind = ?config.source_kind,
        device = %config.device_url,
        aim = ?config.aim,
        min_confidence = config.publisher.min_confidence,
    );
    let _link_span_guard = link_span.enter();

    let detector = load_detector(config.detections.as_deref())?;
    let transport = HttpTransport::new(config.device_url.clone(), config.request_timeout)
        .context("failed to create actuator HTTP client")?;
    let selector = TargetSelector::new(
        config.classes.clone(),
        config.publisher.min_confidence,
        config.aim,
    );
    let mut pipeline = Pipeline::new(
        detector,
        selector,
        CoordinatePublisher::new(transport, config.publisher),
        Watchdog::new(config.object_timeout),
        ControlState {
            armed: config.armed,
            fire: false,
        },
    );

    let slot = FrameSlot::new();
    let (status_tx, status_rx) = bounded(STATUS_CHANNEL_CAPACITY);
    let source = FrameSource::start(&config.source, slot.clone(), status_tx, stop.clone())?;

    let (control_tx, control_rx) = unbounded();
    if config.stdin_controls {
        controls::spawn_stdin_reader(control_tx)
            .context("failed to spawn operator input thread")?;
        info!("operator commands: arm, disarm, toggle, fire, cease, quit");
    } else {
        drop(control_tx);
    }

    let result = loop {
        if stop.is_stopped() {
            info!("shutdown requested");
            break Ok(());
        }
        if !pipeline.drain_controls(&control_rx) {
            info!("operator requested exit");
            break Ok(());
        }
        for status in status_rx.try_iter() {
            pipeline.on_status(&status);
        }
        if source.is_finished() {
            break Err(anyhow!("frame source exited unexpectedly"));
        }

        let frame = slot.take_timeout(config.cycle);
        pipeline.cycle(frame.as_ref(), Instant::now());
    };

    stop.stop();
    pipeline.shutdown();
    source.shutdown();
    if let Some(handle) = prometheus {
        debug!("final metrics:\n{}", handle.render());
    }
    result
}

fn load_detector(path: Option<&Path>) -> Result<Box<dyn Detector>> {
    match path {
        Some(path) => {
            let replay = ReplayDetector::from_path(path)
                .with_context(|| format!("failed to load detections from {}", path.display()))?;
            info!(frames = replay.len(), path = %path.display(), "replaying recorded detections");
            Ok(Box::new(replay))
        }
        None => {
            warn!("no detector configured; targets will never be found");
            Ok(Box::new(IdleDetector))
        }
    }
}

/// The configured frame producer, running on its own thread.
enum FrameSource {
    Tcp(FrameLinkServer),
    Snapshot(SnapshotSource),
}

impl FrameSource {
    fn start(
        config: &SourceConfig,
        slot: FrameSlot,
        status: Sender<LinkStatus>,
        stop: StopSignal,
    ) -> Result<Self> {
        match config {
            SourceConfig::Tcp(server) => {
                let server = FrameLinkServer::start(server.clone(), slot, status, stop)
                    .context("failed to start frame link server")?;
                Ok(Self::Tcp(server))
            }
            SourceConfig::Snapshot(snapshot) => {
                let source = SnapshotSource::start(snapshot.clone(), slot, status, stop)
                    .context("failed to start snapshot polling")?;
                Ok(Self::Snapshot(source))
            }
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Self::Tcp(server) => server.is_finished(),
            Self::Snapshot(source) => source.is_finished(),
        }
    }

    fn shutdown(self) {
        match self {
            Self::Tcp(server) => server.shutdown(),
            Self::Snapshot(source) => source.shutdown(),
        }
    }
}

/// Per-frame state owned by the pipeline thread.
pub(crate) struct Pipeline<T> {
    detector: Box<dyn Detector>,
    selector: TargetSelector,
    publisher: CoordinatePublisher<T>,
    watchdog: Watchdog,
    controls: ControlState,
    link_up: bool,
}

impl<T: CoordinateTransport> Pipeline<T> {
    pub(crate) fn new(
        detector: Box<dyn Detector>,
        selector: TargetSelector,
        publisher: CoordinatePublisher<T>,
        watchdog: Watchdog,
        controls: ControlState,
    ) -> Self {
        Self {
            detector,
            selector,
            publisher,
            watchdog,
            controls,
            link_up: false,
        }
    }

    /// Apply pending operator commands. Returns `false` on `quit`.
    pub(crate) fn drain_controls(&mut self, rx: &Receiver<ControlCommand>) -> bool {
        loop {
            match rx.try_recv() {
                Ok(command) => {
                    if !controls::apply(&mut self.controls, command) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return true,
            }
        }
    }

    pub(crate) fn on_status(&mut self, status: &LinkStatus) {
        debug!(%status, "frame link status");
        match status {
            LinkStatus::Connected { .. } => self.link_up = true,
            LinkStatus::Disconnected { .. } | LinkStatus::Stopped => self.link_up = false,
            LinkStatus::Listening { .. } => {}
        }
    }

    /// One detect → select → publish step followed by the failsafe check.
    pub(crate) fn cycle(&mut self, frame: Option<&Frame>, now: Instant) {
        if let Some(frame) = frame {
            let span = debug_span!("turret.cycle", sequence = frame.sequence);
            let _guard = span.enter();
            self.process(frame, now);
        }

        if let Some(outcome) = self.watchdog.tick_at(&mut self.publisher, self.controls, now) {
            debug!(?outcome, link_up = self.link_up, "failsafe stop attempted");
        }
    }

    fn process(&mut self, frame: &Frame, now: Instant) {
        let started = Instant::now();
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(err) => {
                metrics::counter!("turret_detector_errors_total").increment(1);
                warn!(detector = self.detector.name(), "detection failed: {err}");
                return;
            }
        };
        metrics::histogram!("turret_detect_seconds").record(started.elapsed().as_secs_f64());

        let Some(observation) =
            self.selector
                .select_at(&detections, frame.width, frame.height, now)
        else {
            return;
        };

        self.watchdog.on_detection_at(now);
        match self.publisher.publish_at(Some(&observation), self.controls, now) {
            PublishOutcome::Sent { .. } => {
                debug!(
                    class = %observation.class,
                    confidence = observation.confidence,
                    fire = self.controls.fire,
                    "coordinates published"
                );
                // Fire is momentary: it rides on exactly one sent message.
                self.controls.fire = false;
            }
            PublishOutcome::Throttled | PublishOutcome::BelowThreshold => {}
            PublishOutcome::Failed => {
                debug!(
                    failures = self.publisher.state().consecutive_failures,
                    "coordinate publish failed"
                );
            }
        }
    }

    /// Leave the actuator stopped before exiting.
    pub(crate) fn shutdown(&mut self) -> PublishOutcome {
        let outcome = self.publisher.force_stop(ControlState {
            armed: self.controls.armed,
            fire: false,
        });
        if outcome.is_sent() {
            info!("actuator stopped");
        } else {
            warn!("failed to send final stop to actuator");
        }
        outcome
    }

    #[cfg(test)]
    pub(crate) fn publisher(&self) -> &CoordinatePublisher<T> {
        &self.publisher
    }
}
