//! Host side of the turret: camera frames in, actuator coordinates out.
//!
//! - `config`: CLI configuration parsing and validation.
//! - `pipeline`: Frame source supervision and the detect → select → publish cycle.
//! - `controls`: Operator arm/fire commands read from stdin.
//! - `telemetry`: Tracing subscriber and Prometheus recorder setup.
//! - `simulate`: Synthetic camera for bench runs.

pub use config::{LinkCliArgs, LinkConfig};
pub use pipeline::run;
pub use simulate::{SimulateArgs, simulate_camera};

mod config;
mod controls;
mod pipeline;
mod simulate;
mod telemetry;
