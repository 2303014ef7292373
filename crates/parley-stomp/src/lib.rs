//! # parley-stomp
//!
//! STOMP 1.2 frames as they travel over a text WebSocket.
//!
//! - [`Frame`] / [`Command`]: the frame model plus builders for the frames a
//!   client sends (CONNECT, SUBSCRIBE, UNSUBSCRIBE, SEND, DISCONNECT)
//! - [`decode_frames`]: splits one transport payload into frames, skipping
//!   heart-beat EOLs
//! - [`HeartBeat`]: the `heart-beat` header and its negotiation rules
//!
//! # Usage
//!
//! ```
//! use parley_stomp::{decode_frames, Command, Frame};
//!
//! let wire = Frame::send("/topic/cases", &[], "hello").encode();
//! let frames = decode_frames(&wire).unwrap();
//! assert_eq!(frames[0].command, Command::Send);
//! assert_eq!(frames[0].body, "hello");
//! ```

#![deny(unsafe_code)]

pub mod decode;
pub mod errors;
pub mod frame;
pub mod heartbeat;

pub use decode::{decode_frame, decode_frames};
pub use errors::{FrameError, Result};
pub use frame::{Command, Frame, escape_header, unescape_header};
pub use heartbeat::{HeartBeat, NegotiatedHeartBeat};

/// STOMP protocol versions offered in the CONNECT frame.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// WebSocket subprotocols advertised during the upgrade.
pub const WS_SUBPROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";
