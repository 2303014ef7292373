//! `heart-beat` header handling.
//!
//! The client advertises `cx,cy` (can send every `cx` ms, wants to receive
//! every `cy` ms) and the server replies with `sx,sy`. A value of `0` means
//! "cannot" / "does not want".

use std::fmt;
use std::time::Duration;

/// One side of a heart-beat advertisement, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartBeat {
    /// Smallest interval at which this side can send heart-beats.
    pub outgoing_ms: u64,
    /// Desired interval at which this side wants to receive heart-beats.
    pub incoming_ms: u64,
}

/// Intervals agreed for one connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NegotiatedHeartBeat {
    /// How often the client must send something.
    pub send_every: Option<Duration>,
    /// How often the client should expect traffic from the server.
    pub expect_every: Option<Duration>,
}

impl HeartBeat {
    /// Heart-beats disabled in both directions.
    pub const DISABLED: Self = Self::new(0, 0);

    /// Create an advertisement.
    pub const fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// Parse a `cx,cy` header value.
    pub fn parse(value: &str) -> Option<Self> {
        let (out, inc) = value.split_once(',')?;
        Some(Self::new(out.trim().parse().ok()?, inc.trim().parse().ok()?))
    }

    /// Combine the client's advertisement (`self`) with the server's.
    pub fn negotiate(self, server: Self) -> NegotiatedHeartBeat {
        NegotiatedHeartBeat {
            send_every: agreed(self.outgoing_ms, server.incoming_ms),
            expect_every: agreed(self.incoming_ms, server.outgoing_ms),
        }
    }
}

fn agreed(ours: u64, theirs: u64) -> Option<Duration> {
    if ours == 0 || theirs == 0 {
        None
    } else {
        Some(Duration::from_millis(ours.max(theirs)))
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let hb = HeartBeat::parse("10000, 20000").unwrap();
        assert_eq!(hb, HeartBeat::new(10_000, 20_000));
        assert_eq!(HeartBeat::new(5, 0).to_string(), "5,0");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(HeartBeat::parse("10000").is_none());
        assert!(HeartBeat::parse("a,b").is_none());
        assert!(HeartBeat::parse("").is_none());
    }

    #[test]
    fn negotiate_takes_the_larger_interval() {
        let n = HeartBeat::new(10_000, 10_000).negotiate(HeartBeat::new(4_000, 25_000));
        assert_eq!(n.send_every, Some(Duration::from_millis(25_000)));
        assert_eq!(n.expect_every, Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn zero_on_either_side_disables_direction() {
        let n = HeartBeat::new(10_000, 0).negotiate(HeartBeat::new(5_000, 5_000));
        assert_eq!(n.send_every, Some(Duration::from_millis(10_000)));
        assert_eq!(n.expect_every, None);

        let n = HeartBeat::new(10_000, 10_000).negotiate(HeartBeat::DISABLED);
        assert_eq!(n, NegotiatedHeartBeat::default());
    }
}
