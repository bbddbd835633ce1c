//! Coordinate channel from the vision host to the actuator controller.
//!
//! [`CoordinatePublisher`] turns the current [`TargetObservation`](target_core::TargetObservation)
//! into a [`CoordinateMessage`] and POSTs it, dropping calls that come faster than the
//! configured send interval. [`Watchdog`] sends the zeroed stop message once the target has
//! been missing for longer than its timeout.

pub mod message;
pub mod publisher;
pub mod transport;
pub mod watchdog;

pub use message::{ControlState, CoordinateMessage, Echo, relative_offset};
pub use publisher::{CoordinatePublisher, PublishOutcome, PublishState, PublisherConfig};
pub use transport::{CoordinateTransport, DEFAULT_REQUEST_TIMEOUT, HttpTransport, TransportError};
pub use watchdog::{DEFAULT_OBJECT_TIMEOUT, Watchdog};
