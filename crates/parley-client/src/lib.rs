//! # parley-client
//!
//! A reconnecting STOMP-over-WebSocket client.
//!
//! [`ConnectionManager`] owns one logical session to a broker endpoint. It
//! opens the transport, performs the STOMP handshake, exposes fire-and-forget
//! `subscribe` / `send`, and re-establishes the session after unexpected
//! closes on a fixed delay until [`ConnectionManager::disconnect`] is called.
//!
//! - [`config`]: [`ClientConfig`] and its defaults
//! - [`manager`]: the state machine and public API
//! - [`transport`]: the [`Connector`] seam and the WebSocket implementation
//! - [`mock`]: an in-memory broker for tests
//!
//! ```no_run
//! use parley_client::{ClientConfig, ConnectionManager};
//!
//! # async fn demo() -> Result<(), parley_client::ClientError> {
//! let manager = ConnectionManager::new(ClientConfig::new("ws://localhost:8080/ws"))?;
//! manager.set_default_listener("/user/queue/notifications", |msg| {
//!     println!("{}", msg.body);
//! });
//! manager.connect();
//!
//! let mut state = manager.watch_state();
//! let _ = state.wait_for(|s| s.is_connected()).await;
//! let _ = manager.send("/app/cases", r#"{"caseId":42}"#);
//! manager.disconnect();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod manager;
pub mod mock;
pub(crate) mod session;
pub mod state;
pub mod subscription;
pub mod transport;

pub use config::ClientConfig;
pub use errors::{ClientError, TransportError};
pub use manager::ConnectionManager;
pub use parley_stomp::HeartBeat;
pub use state::{ConnectionState, ConnectionStats};
pub use subscription::{Message, MessageHandler, Subscription};
pub use transport::{Connector, Transport, WebSocketConnector};
