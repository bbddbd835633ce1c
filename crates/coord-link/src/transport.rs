use std::time::Duration;

use reqwest::{StatusCode, blocking::Client};
use thiserror::Error;
use tracing::trace;

use crate::message::{CoordinateMessage, Echo, EchoEnvelope};

/// Request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("device answered {status}")]
    Status { status: StatusCode },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Request { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Delivers one coordinate message to the actuator and returns its echo, if any.
pub trait CoordinateTransport {
    fn send(&mut self, message: &CoordinateMessage) -> Result<Option<Echo>, TransportError>;
}

/// JSON-over-HTTP transport to the device's coordinate endpoint.
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl CoordinateTransport for HttpTransport {
    fn send(&mut self, message: &CoordinateMessage) -> Result<Option<Echo>, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .map_err(|source| TransportError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(TransportError::Status { status });
        }

        // A body that is missing, truncated or not JSON still counts as a
        // successful round trip.
        let echo = match response.bytes() {
            Ok(body) if !body.is_empty() => serde_json::from_slice::<EchoEnvelope>(&body)
                .map(|envelope| envelope.echo)
                .unwrap_or_else(|err| {
                    trace!("ignoring unparseable echo: {err}");
                    None
                }),
            Ok(_) => None,
            Err(err) => {
                trace!("failed to read echo body: {err}");
                None
            }
        };
        Ok(echo)
    }
}
