//! Connection manager configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use parley_settings::ConnectionSettings;
use parley_stomp::HeartBeat;
use url::{Host, Url};

use crate::errors::ClientError;

/// Delay before reconnecting after an unexpected close.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5_000);

/// Time allowed for the transport open plus STOMP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Heart-beat advertised in CONNECT.
pub const DEFAULT_HEARTBEAT: HeartBeat = HeartBeat::new(10_000, 10_000);

/// Everything a [`ConnectionManager`](crate::ConnectionManager) needs to reach its broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// `ws://` or `wss://` endpoint.
    pub endpoint_url: String,
    /// Extra CONNECT headers (credentials, tenant, ...).
    pub connect_headers: BTreeMap<String, String>,
    /// STOMP virtual host. `None` uses the endpoint host.
    pub host: Option<String>,
    /// Fixed reconnect delay. No backoff, no retry limit.
    pub reconnect_delay: Duration,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Heart-beat the client offers.
    pub heartbeat: HeartBeat,
    /// Keep subscriptions across unexpected closes and re-send them.
    pub resubscribe_on_reconnect: bool,
}

impl ClientConfig {
    /// Defaults for `endpoint_url`.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            connect_headers: BTreeMap::new(),
            host: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat: DEFAULT_HEARTBEAT,
            resubscribe_on_reconnect: false,
        }
    }

    /// Builder: add a CONNECT header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.connect_headers.insert(name.into(), value.into());
        self
    }

    /// Builder: set the STOMP virtual host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Builder: set the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Builder: set the handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set the heart-beat advertisement.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartBeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Builder: toggle automatic re-subscription after reconnect.
    #[must_use]
    pub fn with_resubscribe_on_reconnect(mut self, enabled: bool) -> Self {
        self.resubscribe_on_reconnect = enabled;
        self
    }

    /// Reject configurations the manager cannot use.
    pub fn validate(&self) -> Result<(), ClientError> {
        let url = self.endpoint_url.trim();
        let invalid = |reason: &str| ClientError::InvalidEndpoint {
            url: self.endpoint_url.clone(),
            reason: reason.to_string(),
        };
        if url.is_empty() {
            return Err(invalid("endpoint URL is required"));
        }
        let parsed = Url::parse(url).map_err(|e| invalid(&format!("malformed URL: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(invalid("scheme must be ws or wss"));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host"));
        }
        if self.reconnect_delay.is_zero() {
            return Err(invalid("reconnect delay must be positive"));
        }

        for (name, value) in &self.connect_headers {
            let reason = if name.is_empty() {
                Some("empty name")
            } else if name.contains([':', '\n', '\r']) {
                Some("name contains ':' or a line break")
            } else if value.contains(['\n', '\r']) {
                Some("value contains a line break")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ClientError::InvalidHeader {
                    name: name.clone(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Value for the CONNECT `host` header.
    pub fn stomp_host(&self) -> String {
        self.host
            .clone()
            .unwrap_or_else(|| endpoint_host(&self.endpoint_url).unwrap_or_default())
    }

    pub(crate) fn connect_header_list(&self) -> Vec<(String, String)> {
        self.connect_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl From<&ConnectionSettings> for ClientConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            endpoint_url: settings.endpoint_url.clone(),
            connect_headers: settings.connect_headers.clone(),
            host: settings.host.clone(),
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            heartbeat: HeartBeat::new(
                settings.heartbeat_outgoing_ms,
                settings.heartbeat_incoming_ms,
            ),
            resubscribe_on_reconnect: settings.resubscribe_on_reconnect,
        }
    }
}

/// Host part of `url`, with IPv6 literals unbracketed.
fn endpoint_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    match parsed.host()? {
        Host::Ipv6(addr) => Some(addr.to_string()),
        host => Some(host.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("ws://localhost:8080/ws");
        assert_eq!(config.reconnect_delay, Duration::from_millis(5_000));
        assert_eq!(config.heartbeat, HeartBeat::new(10_000, 10_000));
        assert!(!config.resubscribe_on_reconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn host_derivation() {
        let host = |url: &str| endpoint_host(url).unwrap_or_default();
        assert_eq!(host("ws://localhost:8080/ws"), "localhost");
        assert_eq!(host("wss://user:pw@api.legal.example/ws/websocket"), "api.legal.example");
        assert_eq!(host("ws://[::1]:61614/stomp"), "::1");
        assert_eq!(host("ws://broker?x=1"), "broker");
        assert_eq!(host("ws://bad host/ws"), "");
    }

    #[test]
    fn explicit_host_wins() {
        let config = ClientConfig::new("ws://10.0.0.5:8080/ws").with_host("/");
        assert_eq!(config.stomp_host(), "/");
        assert_eq!(ClientConfig::new("ws://10.0.0.5:8080/ws").stomp_host(), "10.0.0.5");
    }

    #[test]
    fn rejects_empty_and_non_ws_endpoints() {
        assert_matches!(
            ClientConfig::new("").validate(),
            Err(ClientError::InvalidEndpoint { .. })
        );
        assert_matches!(
            ClientConfig::new("http://x/ws").validate(),
            Err(ClientError::InvalidEndpoint { reason, .. }) if reason.contains("scheme")
        );
        assert_matches!(
            ClientConfig::new("localhost:8080").validate(),
            Err(ClientError::InvalidEndpoint { .. })
        );
        assert_matches!(
            ClientConfig::new("ws:///ws").validate(),
            Err(ClientError::InvalidEndpoint { reason, .. }) if reason.contains("host")
        );
    }

    #[test]
    fn rejects_malformed_authority() {
        for url in [
            "ws://bad host/ws",
            "ws://h:99999999/ws",
            "ws://h:port/ws",
            "ws://[::1/ws",
        ] {
            assert_matches!(
                ClientConfig::new(url).validate(),
                Err(ClientError::InvalidEndpoint { reason, .. }) if reason.starts_with("malformed URL"),
                "{url}"
            );
        }
        assert!(ClientConfig::new("ws://[::1]:61614/stomp").validate().is_ok());
        assert!(ClientConfig::new("wss://broker.example:443/ws").validate().is_ok());
    }

    #[test]
    fn rejects_zero_delay() {
        let config = ClientConfig::new("ws://h/ws").with_reconnect_delay(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_headers_that_break_framing() {
        let config = ClientConfig::new("ws://h/ws").with_header("X-Case", "a\nb");
        assert_matches!(config.validate(), Err(ClientError::InvalidHeader { .. }));
        let config = ClientConfig::new("ws://h/ws").with_header("a:b", "v");
        assert_matches!(config.validate(), Err(ClientError::InvalidHeader { .. }));
        let config = ClientConfig::new("ws://h/ws").with_header("Authorization", "Bearer a:b");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_settings() {
        let mut settings = ConnectionSettings::default();
        settings.endpoint_url = "wss://legal.example/ws".into();
        settings.reconnect_delay_ms = 750;
        settings.heartbeat_outgoing_ms = 0;
        settings.resubscribe_on_reconnect = true;
        let _ = settings
            .connect_headers
            .insert("Authorization".into(), "Bearer t".into());

        let config = ClientConfig::from(&settings);
        assert_eq!(config.endpoint_url, "wss://legal.example/ws");
        assert_eq!(config.reconnect_delay, Duration::from_millis(750));
        assert_eq!(config.heartbeat, HeartBeat::new(0, 10_000));
        assert!(config.resubscribe_on_reconnect);
        assert_eq!(
            config.connect_header_list(),
            vec![("Authorization".to_string(), "Bearer t".to_string())]
        );
    }
}
