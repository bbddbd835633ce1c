//! Synthetic camera that speaks the frame link protocol, for bench runs
//! without the embedded device.

use std::{
    io::{Cursor, Write},
    net::{SocketAddr, TcpStream},
    sync::Once,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use clap::Args;
use frame_link::{DEFAULT_PORT, StopSignal, write_record};
use image::{ImageFormat, Rgb, RgbImage};
use tracing::info;

use crate::turret::{config::TelemetryOptions, telemetry};

/// CLI arguments accepted by the `simulate-camera` subcommand.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Address of the host's frame link listener.
    #[arg(long = "connect", value_name = "ADDR", default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    pub connect: SocketAddr,
    #[arg(long = "width", value_name = "PX", default_value_t = 320)]
    pub width: u32,
    #[arg(long = "height", value_name = "PX", default_value_t = 240)]
    pub height: u32,
    /// Frames per second.
    #[arg(long = "fps", value_name = "N", default_value_t = 10)]
    pub fps: u32,
    /// Stop after this many frames (0 streams until interrupted).
    #[arg(long = "frames", value_name = "N", default_value_t = 0)]
    pub frames: u64,
}

pub fn simulate_camera(args: SimulateArgs) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    if args.width == 0 || args.height == 0 {
        bail!("--width and --height must be positive");
    }
    if args.fps == 0 {
        bail!("--fps must be at least 1");
    }

    let _telemetry_guard = telemetry::enter_runtime(&TelemetryOptions::default());
    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || handler_stop.stop()) {
            tracing::warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let mut stream = TcpStream::connect(args.connect)
        .with_context(|| format!("failed to connect to {}", args.connect))?;
    stream.set_nodelay(true)?;
    info!(addr = %args.connect, "streaming synthetic frames");

    let period = Duration::from_secs(1) / args.fps;
    let mut sent: u64 = 0;
    while !stop.is_stopped() && (args.frames == 0 || sent < args.frames) {
        let started = Instant::now();
        let jpeg = render_frame(args.width, args.height, sent)?;
        write_record(&mut stream, &jpeg).context("camera link closed")?;
        stream.flush()?;
        sent += 1;
        if stop.wait_timeout(period.saturating_sub(started.elapsed())) {
            break;
        }
    }

    info!(frames = sent, "synthetic camera finished");
    Ok(())
}

/// Grey frame with a bright square sweeping left to right.
fn render_frame(width: u32, height: u32, index: u64) -> Result<Vec<u8>> {
    let side = (width.min(height) / 4).max(1);
    let span = u64::from(width.saturating_sub(side).max(1));
    let x0 = (index * 8 % span) as u32;
    let y0 = (height - side) / 2;
    let img = RgbImage::from_fn(width, height, |x, y| {
        if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
            Rgb([240, 60, 40])
        } else {
            Rgb([90, 90, 90])
        }
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg)
        .context("failed to encode synthetic frame")?;
    Ok(out.into_inner())
}
