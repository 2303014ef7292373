//! Settings schema.
//!
//! JSON keys are camelCase; every struct is `#[serde(default)]` so a
//! settings file only needs the keys it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings object (`~/.parley/settings.json`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Broker connection.
    pub connection: ConnectionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Broker connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// WebSocket endpoint of the STOMP broker (`ws://` or `wss://`).
    pub endpoint_url: String,
    /// Extra headers sent in the CONNECT frame (e.g. `Authorization`).
    pub connect_headers: BTreeMap<String, String>,
    /// Virtual host for the CONNECT frame. Defaults to the endpoint host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Fixed delay before reconnecting after an unexpected close.
    pub reconnect_delay_ms: u64,
    /// How long the STOMP handshake may take before it counts as failed.
    pub connect_timeout_ms: u64,
    /// Heart-beat interval the client offers to send (0 disables).
    pub heartbeat_outgoing_ms: u64,
    /// Heart-beat interval the client asks the broker for (0 disables).
    pub heartbeat_incoming_ms: u64,
    /// Re-send SUBSCRIBE frames for live subscriptions after a reconnect.
    pub resubscribe_on_reconnect: bool,
    /// Destination subscribed automatically after every handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_topic: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            connect_headers: BTreeMap::new(),
            host: None,
            reconnect_delay_ms: 5_000,
            connect_timeout_ms: 10_000,
            heartbeat_outgoing_ms: 10_000,
            heartbeat_incoming_ms: 10_000,
            resubscribe_on_reconnect: false,
            default_topic: None,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ParleySettings::default();
        assert_eq!(s.connection.reconnect_delay_ms, 5_000);
        assert_eq!(s.connection.connect_timeout_ms, 10_000);
        assert_eq!(s.connection.heartbeat_outgoing_ms, 10_000);
        assert!(!s.connection.resubscribe_on_reconnect);
        assert!(s.connection.endpoint_url.is_empty());
        assert_eq!(s.logging.level, "info");
        assert_eq!(s.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ParleySettings::default()).unwrap();
        assert_eq!(json["connection"]["reconnectDelayMs"], 5_000);
        assert_eq!(json["connection"]["resubscribeOnReconnect"], false);
        assert!(json["connection"].get("defaultTopic").is_none());
        assert_eq!(json["logging"]["format"], "pretty");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: ConnectionSettings =
            serde_json::from_str(r#"{"endpointUrl": "ws://h/ws"}"#).unwrap();
        assert_eq!(s.endpoint_url, "ws://h/ws");
        assert_eq!(s.reconnect_delay_ms, 5_000);
    }
}
