//! Connection state and counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lifecycle of the logical session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport. Initial and terminal state.
    #[default]
    Disconnected,
    /// Transport opening or STOMP handshake in flight.
    Connecting,
    /// Handshake complete; subscribe and send are live.
    Connected,
}

impl ConnectionState {
    /// Whether subscribe and send are live in this state.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Snapshot of the manager's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Connection attempts started (explicit and reconnects).
    pub connect_attempts: u64,
    /// Transports successfully opened.
    pub transports_opened: u64,
    /// Handshakes that reached CONNECTED.
    pub handshakes_completed: u64,
    /// Reconnect timers armed.
    pub reconnects_scheduled: u64,
    /// SEND frames handed to the transport.
    pub messages_sent: u64,
    /// MESSAGE frames dispatched to a handler.
    pub messages_received: u64,
    /// Inbound payloads that failed to decode.
    pub malformed_frames: u64,
    /// Message handlers that panicked. The session survives these.
    pub handler_panics: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) connect_attempts: AtomicU64,
    pub(crate) transports_opened: AtomicU64,
    pub(crate) handshakes_completed: AtomicU64,
    pub(crate) reconnects_scheduled: AtomicU64,
    pub(crate) messages_sent: AtomicU64,
    pub(crate) messages_received: AtomicU64,
    pub(crate) malformed_frames: AtomicU64,
    pub(crate) handler_panics: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            transports_opened: self.transports_opened.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }

    #[test]
    fn counters_snapshot() {
        let counters = Counters::default();
        Counters::bump(&counters.messages_sent);
        Counters::bump(&counters.messages_sent);
        Counters::bump(&counters.reconnects_scheduled);
        let stats = counters.snapshot();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.reconnects_scheduled, 1);
        assert_eq!(stats.connect_attempts, 0);
    }
}
