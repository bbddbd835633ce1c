//! Operator commands typed on stdin.
//!
//! The reader thread only parses lines; the pipeline owns [`ControlState`] and
//! applies commands between cycles.

use std::{
    io::{self, BufRead},
    str::FromStr,
    thread::JoinHandle,
};

use coord_link::ControlState;
use crossbeam_channel::Sender;
use frame_link::spawn_thread;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    Arm,
    Disarm,
    Toggle,
    Fire,
    Cease,
    Quit,
}

impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arm" | "on" => Ok(Self::Arm),
            "disarm" | "off" => Ok(Self::Disarm),
            "toggle" | "t" => Ok(Self::Toggle),
            "fire" | "f" => Ok(Self::Fire),
            "cease" | "hold" | "c" => Ok(Self::Cease),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(format!("unknown command `{other}`")),
        }
    }
}

/// Apply `command` to `state`. Returns `false` when the operator asked to quit.
///
/// `fire` is a one-shot request: it is only accepted while armed and the
/// pipeline clears it once a message carrying it has been sent.
pub(crate) fn apply(state: &mut ControlState, command: ControlCommand) -> bool {
    match command {
        ControlCommand::Arm => state.armed = true,
        ControlCommand::Disarm => {
            state.armed = false;
            state.fire = false;
        }
        ControlCommand::Toggle => {
            state.armed = !state.armed;
            if !state.armed {
                state.fire = false;
            }
        }
        ControlCommand::Fire if !state.armed => {
            warn!("fire ignored while disarmed");
            return true;
        }
        ControlCommand::Fire => state.fire = true,
        ControlCommand::Cease => state.fire = false,
        ControlCommand::Quit => return false,
    }
    info!(armed = state.armed, fire = state.fire, "controls updated");
    true
}

/// Spawn a detached thread forwarding parsed stdin commands until EOF.
pub(crate) fn spawn_stdin_reader(tx: Sender<ControlCommand>) -> io::Result<JoinHandle<()>> {
    spawn_thread("turret-controls", move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("failed to read operator input: {err}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ControlCommand>() {
                Ok(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                Err(err) => warn!("{err}; expected arm, disarm, toggle, fire, cease or quit"),
            }
        }
        debug!("operator input closed");
    })
}
