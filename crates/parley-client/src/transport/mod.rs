//! Transport seam.
//!
//! A transport carries whole STOMP payloads as text in both directions. The
//! manager never sees sockets; it asks a [`Connector`] for a fresh
//! [`Transport`] on every connection attempt.

pub mod websocket;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::errors::TransportError;

pub use websocket::WebSocketConnector;

/// Outbound half: accepts encoded frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half: yields payloads until the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open, bidirectional text transport.
pub struct Transport {
    /// Outbound half.
    pub sink: FrameSink,
    /// Inbound half.
    pub stream: FrameStream,
}

impl Transport {
    /// Bundle a sink and stream.
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports to a broker endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new transport. Called once per connection attempt.
    async fn open(&self, endpoint_url: &str) -> Result<Transport, TransportError>;
}
