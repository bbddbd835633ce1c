use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::turret::{self, LinkCliArgs, LinkConfig, SimulateArgs};

#[derive(Debug, Parser)]
#[command(name = "turret-host", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Receive camera frames, pick targets and drive the actuator.
    Run(LinkCliArgs),
    /// Stream synthetic frames to a running host, standing in for the camera.
    SimulateCamera(SimulateArgs),
}

pub fn handle_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => {
            let config = LinkConfig::try_from(args)?;
            turret::run(config)
        }
        Command::SimulateCamera(args) => turret::simulate_camera(args),
    }
}
