use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use coord_link::{DEFAULT_OBJECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, PublisherConfig};
use frame_link::{DEFAULT_PORT, ReadLimits, ServerConfig, SnapshotConfig};
use target_core::{AimMode, TargetClass, default_target_classes};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Camera pushes length-prefixed frames to our TCP listener.
    Tcp,
    /// Camera serves JPEG snapshots that we poll over HTTP.
    Snapshot,
}

impl SourceKind {
    pub(crate) fn from_uri(uri: &str) -> Self {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            SourceKind::Snapshot
        } else {
            SourceKind::Tcp
        }
    }
}

#[derive(Clone, Debug)]
pub enum SourceConfig {
    Tcp(ServerConfig),
    Snapshot(SnapshotConfig),
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing and metrics export.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Clone, Debug)]
pub struct LinkConfig {
    pub source_uri: String,
    pub source_kind: SourceKind,
    pub source: SourceConfig,
    pub device_url: String,
    pub request_timeout: Duration,
    pub publisher: PublisherConfig,
    pub object_timeout: Duration,
    pub classes: Vec<TargetClass>,
    pub aim: AimMode,
    /// Recorded detections to replay; without it no targets are ever seen.
    pub detections: Option<PathBuf>,
    /// Upper bound on how long one pipeline cycle waits for a frame.
    pub cycle: Duration,
    pub armed: bool,
    pub stdin_controls: bool,
    pub telemetry: TelemetryOptions,
}

/// CLI arguments accepted by the `run` subcommand.
#[derive(Debug, Args)]
pub struct LinkCliArgs {
    /// Frame source: TCP port or `tcp://ADDR:PORT` to listen on, or an HTTP snapshot URL.
    #[arg(long = "source", env = "TURRET_SOURCE", value_name = "URI")]
    pub source: Option<String>,
    /// Actuator coordinate endpoint.
    #[arg(
        long = "device-url",
        env = "TURRET_DEVICE_URL",
        value_name = "URL",
        default_value = "http://192.168.0.102/coords"
    )]
    pub device_url: String,
    /// Abort a frame whose bytes stop arriving for this long.
    #[arg(long = "stall-timeout-ms", env = "TURRET_STALL_TIMEOUT_MS", value_name = "MS", default_value_t = 10_000)]
    pub stall_timeout_ms: u64,
    /// Drop a camera session that sends no new frame header for this long.
    #[arg(long = "idle-timeout-ms", env = "TURRET_IDLE_TIMEOUT_MS", value_name = "MS", default_value_t = 5_000)]
    pub idle_timeout_ms: u64,
    /// Largest accepted frame record.
    #[arg(long = "max-frame-bytes", env = "TURRET_MAX_FRAME_BYTES", value_name = "BYTES", default_value_t = 4 * 1024 * 1024)]
    pub max_frame_bytes: usize,
    /// Delay between snapshot requests in HTTP source mode.
    #[arg(long = "snapshot-interval-ms", env = "TURRET_SNAPSHOT_INTERVAL_MS", value_name = "MS", default_value_t = 100)]
    pub snapshot_interval_ms: u64,
    /// Minimum spacing between coordinate messages.
    #[arg(long = "send-interval-ms", env = "TURRET_SEND_INTERVAL_MS", value_name = "MS", default_value_t = 100)]
    pub send_interval_ms: u64,
    /// Timeout of one coordinate POST.
    #[arg(long = "request-timeout-ms", env = "TURRET_REQUEST_TIMEOUT_MS", value_name = "MS")]
    pub request_timeout_ms: Option<u64>,
    /// Time without a target before the actuator is told to stop.
    #[arg(long = "object-timeout-ms", env = "TURRET_OBJECT_TIMEOUT_MS", value_name = "MS")]
    pub object_timeout_ms: Option<u64>,
    /// Detections below this confidence are ignored (0-1).
    #[arg(long = "min-confidence", env = "TURRET_MIN_CONFIDENCE", value_name = "P", default_value_t = 0.5)]
    pub min_confidence: f32,
    /// Target class group; repeat for several. Defaults to pistol, rifle and knife.
    #[arg(
        long = "target-class",
        env = "TURRET_TARGET_CLASSES",
        value_name = "NAME=ALIAS[,ALIAS...]",
        value_delimiter = ';'
    )]
    pub target_classes: Vec<TargetClass>,
    /// Aim at the target object or at the person nearest to it.
    #[arg(long = "aim", env = "TURRET_AIM", value_name = "target|person", default_value = "target")]
    pub aim: AimMode,
    /// JSON-lines file of recorded detections to replay, one array per frame.
    #[arg(long = "detections", env = "TURRET_DETECTIONS", value_name = "PATH")]
    pub detections: Option<PathBuf>,
    /// Longest wait for a frame before running the failsafe check anyway.
    #[arg(long = "cycle-ms", env = "TURRET_CYCLE_MS", value_name = "MS", default_value_t = 50)]
    pub cycle_ms: u64,
    /// Start with tracking enabled on the device.
    #[arg(long = "armed", env = "TURRET_ARMED", action = clap::ArgAction::SetTrue)]
    pub armed: bool,
    /// Do not read operator commands from stdin.
    #[arg(long = "no-stdin-controls", action = clap::ArgAction::SetTrue)]
    pub no_stdin_controls: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Expose Prometheus metrics on this address.
    #[arg(long = "metrics-addr", env = "TURRET_METRICS_ADDR", value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl TryFrom<LinkCliArgs> for LinkConfig {
    type Error = anyhow::Error;

    fn try_from(args: LinkCliArgs) -> Result<Self> {
        let source_uri = args
            .source
            .unwrap_or_else(|| format!("tcp://0.0.0.0:{DEFAULT_PORT}"));
        let source_kind = SourceKind::from_uri(&source_uri);

        if args.stall_timeout_ms == 0 || args.idle_timeout_ms == 0 {
            bail!("--stall-timeout-ms and --idle-timeout-ms must be positive");
        }
        if args.max_frame_bytes == 0 {
            bail!("--max-frame-bytes must be positive");
        }
        if args.cycle_ms == 0 {
            bail!("--cycle-ms must be positive");
        }
        if !(0.0..=1.0).contains(&args.min_confidence) {
            bail!("--min-confidence must be between 0 and 1");
        }
        if !(args.device_url.starts_with("http://") || args.device_url.starts_with("https://")) {
            bail!("--device-url must be an http(s) URL, got `{}`", args.device_url);
        }

        let request_timeout = args
            .request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let object_timeout = args
            .object_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_OBJECT_TIMEOUT);
        if request_timeout.is_zero() || object_timeout.is_zero() {
            bail!("--request-timeout-ms and --object-timeout-ms must be positive");
        }

        let source = match source_kind {
            SourceKind::Tcp => {
                let bind_addr = parse_listen_addr(&source_uri)?;
                SourceConfig::Tcp(ServerConfig {
                    bind_addr,
                    limits: ReadLimits {
                        idle_timeout: Duration::from_millis(args.idle_timeout_ms),
                        stall_timeout: Duration::from_millis(args.stall_timeout_ms),
                        max_record_len: args.max_frame_bytes,
                    },
                    ..ServerConfig::default()
                })
            }
            SourceKind::Snapshot => {
                let mut snapshot = SnapshotConfig::new(source_uri.clone());
                snapshot.interval = Duration::from_millis(args.snapshot_interval_ms);
                SourceConfig::Snapshot(snapshot)
            }
        };

        let classes = if args.target_classes.is_empty() {
            default_target_classes()
        } else {
            args.target_classes
        };

        let telemetry = TelemetryOptions {
            chrome_trace_path: args.chrome_trace,
            metrics_addr: args.metrics_addr,
        };

        Ok(Self {
            source_uri,
            source_kind,
            source,
            device_url: args.device_url,
            request_timeout,
            publisher: PublisherConfig {
                send_interval: Duration::from_millis(args.send_interval_ms),
                min_confidence: args.min_confidence,
            },
            object_timeout,
            classes,
            aim: args.aim,
            detections: args.detections,
            cycle: Duration::from_millis(args.cycle_ms),
            armed: args.armed,
            stdin_controls: !args.no_stdin_controls,
            telemetry,
        })
    }
}

/// Accepts `8765`, `0.0.0.0:8765` and `tcp://0.0.0.0:8765`.
fn parse_listen_addr(uri: &str) -> Result<SocketAddr> {
    let rest = uri.strip_prefix("tcp://").unwrap_or(uri);
    if let Ok(port) = rest.parse::<u16>() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if rest.contains("://") {
        return Err(anyhow!("unsupported frame source `{uri}`"));
    }
    rest.parse()
        .with_context(|| format!("invalid frame source address `{uri}`"))
}
