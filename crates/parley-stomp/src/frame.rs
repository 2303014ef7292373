//! STOMP frame model and encoder.

use std::fmt;
use std::str::FromStr;

use crate::errors::{FrameError, Result};
use crate::heartbeat::HeartBeat;

/// A STOMP command (client or server side).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake (1.0/1.1 spelling).
    Connect,
    /// Client handshake (1.2 spelling).
    Stomp,
    /// Server handshake reply.
    Connected,
    /// Publish to a destination.
    Send,
    /// Register interest in a destination.
    Subscribe,
    /// Drop a subscription.
    Unsubscribe,
    /// Acknowledge a message.
    Ack,
    /// Reject a message.
    Nack,
    /// Start a transaction.
    Begin,
    /// Commit a transaction.
    Commit,
    /// Roll back a transaction.
    Abort,
    /// Graceful client shutdown.
    Disconnect,
    /// Server delivery to a subscription.
    Message,
    /// Server acknowledgement of a `receipt` header.
    Receipt,
    /// Server-side error report.
    Error,
}

impl Command {
    /// Wire spelling of the command.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim, without escaping.
    pub const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

/// A single STOMP frame with a text body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are allowed; the first wins.
    pub headers: Vec<(String, String)>,
    /// Frame body.
    pub body: String,
}

impl Frame {
    /// Empty frame for `command`.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Builder: append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builder: set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder: append caller headers, skipping names already present.
    #[must_use]
    pub fn with_extra_headers(mut self, extra: &[(String, String)]) -> Self {
        for (name, value) in extra {
            if self.header(name).is_none() {
                self.headers.push((name.clone(), value.clone()));
            }
        }
        self
    }

    /// First value of header `name`, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT frame for the given virtual host.
    pub fn connect(host: &str, heartbeat: HeartBeat, extra: &[(String, String)]) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", crate::ACCEPT_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", heartbeat.to_string())
            .with_extra_headers(extra)
    }

    /// SEND frame.
    pub fn send(destination: &str, extra: &[(String, String)], body: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .with_header("destination", destination)
            .with_extra_headers(extra)
            .with_body(body)
    }

    /// SUBSCRIBE frame.
    pub fn subscribe(id: &str, destination: &str, extra: &[(String, String)]) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_extra_headers(extra)
    }

    /// UNSUBSCRIBE frame.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    /// DISCONNECT frame.
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Serialize to the text wire format, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Escape a header name or value (`\\`, `\n`, `\r`, `:`).
pub fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape_header`]. Undefined escapes are an error.
pub fn unescape_header(escaped: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(FrameError::InvalidEscape(other)),
            None => return Err(FrameError::InvalidEscape(' ')),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parse_and_display() {
        for cmd in [
            Command::Connect,
            Command::Connected,
            Command::Send,
            Command::Subscribe,
            Command::Message,
            Command::Error,
        ] {
            assert_eq!(cmd.as_str().parse::<Command>().unwrap(), cmd);
            assert_eq!(cmd.to_string(), cmd.as_str());
        }
        assert!("send".parse::<Command>().is_err());
    }

    #[test]
    fn header_first_occurrence_wins() {
        let frame = Frame::new(Command::Message)
            .with_header("x", "1")
            .with_header("x", "2");
        assert_eq!(frame.header("x"), Some("1"));
        assert_eq!(frame.header("y"), None);
    }

    #[test]
    fn encode_send_adds_content_length() {
        let wire = Frame::send("/topic/a", &[], "hé").encode();
        assert_eq!(wire, "SEND\ndestination:/topic/a\ncontent-length:3\n\nhé\0");
    }

    #[test]
    fn encode_empty_body_has_no_content_length() {
        let wire = Frame::unsubscribe("sub-0").encode();
        assert_eq!(wire, "UNSUBSCRIBE\nid:sub-0\n\n\0");
    }

    #[test]
    fn encode_escapes_headers_outside_handshake() {
        let wire = Frame::new(Command::Send)
            .with_header("note", "a:b\nc")
            .encode();
        assert!(wire.contains("note:a\\cb\\nc\n"));
    }

    #[test]
    fn connect_frame_is_not_escaped() {
        let frame = Frame::connect(
            "broker.local",
            HeartBeat::new(10_000, 10_000),
            &[("Authorization".into(), "Bearer a:b".into())],
        );
        let wire = frame.encode();
        assert!(wire.starts_with("CONNECT\naccept-version:1.2,1.1,1.0\nhost:broker.local\n"));
        assert!(wire.contains("heart-beat:10000,10000\n"));
        assert!(wire.contains("Authorization:Bearer a:b\n"));
    }

    #[test]
    fn extra_headers_do_not_override_builtins() {
        let frame = Frame::send(
            "/topic/a",
            &[
                ("destination".into(), "/topic/evil".into()),
                ("priority".into(), "9".into()),
            ],
            "",
        );
        assert_eq!(frame.header("destination"), Some("/topic/a"));
        assert_eq!(frame.header("priority"), Some("9"));
        assert_eq!(frame.headers.len(), 2);
    }

    #[test]
    fn unescape_known_sequences() {
        assert_eq!(unescape_header(r"a\cb\\c\nd\re").unwrap(), "a:b\\c\nd\re");
    }

    #[test]
    fn unescape_rejects_unknown_sequence() {
        assert_eq!(unescape_header(r"a\tb"), Err(FrameError::InvalidEscape('t')));
    }
}
