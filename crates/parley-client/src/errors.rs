//! Client error types.
//!
//! Runtime failures (handshake errors, sends while disconnected, malformed
//! frames) are logged and absorbed by the manager. Only configuration
//! problems surface as a `Result`, at construction time.

use thiserror::Error;

/// Errors raised while building a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint URL is unusable.
    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configured CONNECT header cannot be sent.
    #[error("invalid connect header {name:?}: {reason}")]
    InvalidHeader {
        /// Header name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors at the transport seam.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport could not be opened.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Underlying failure.
        reason: String,
    },

    /// Read or write failed on an open transport.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// The transport is closed.
    #[error("transport closed")]
    Closed,
}
