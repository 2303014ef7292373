//! Subscriptions and inbound messages.

use std::fmt;
use std::sync::{Arc, Weak};

use parley_stomp::Frame;
use serde::Serialize;

use crate::manager::Shared;

/// Callback invoked for each message on a subscription.
///
/// Runs on the session task, outside the manager's lock, so it may call
/// back into the manager. Keep it short: the next inbound frame waits for it.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// A MESSAGE frame as seen by a subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Destination the message was published to.
    pub destination: String,
    /// Subscription id it was delivered on.
    pub subscription: String,
    /// Broker-assigned id, if any.
    pub message_id: Option<String>,
    /// All frame headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Text body.
    pub body: String,
}

impl Message {
    pub(crate) fn from_frame(frame: Frame) -> Option<Self> {
        let subscription = frame.header("subscription")?.to_string();
        let destination = frame.header("destination").unwrap_or_default().to_string();
        let message_id = frame.header("message-id").map(str::to_string);
        Some(Self {
            destination,
            subscription,
            message_id,
            headers: frame.headers,
            body: frame.body,
        })
    }

    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Registry entry for one subscription.
pub(crate) struct SubscriptionEntry {
    pub(crate) destination: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) handler: MessageHandler,
    /// Installed by the default listener; recreated on every handshake.
    pub(crate) is_default: bool,
}

/// Handle to a live subscription.
///
/// Dropping the handle leaves the subscription in place; call
/// [`unsubscribe`](Self::unsubscribe) to remove it. After a disconnect the
/// handle is inert.
pub struct Subscription {
    id: String,
    destination: String,
    shared: Weak<Shared>,
}

impl Subscription {
    pub(crate) fn new(id: String, destination: String, shared: Weak<Shared>) -> Self {
        Self {
            id,
            destination,
            shared,
        }
    }

    /// STOMP subscription id (`sub-N`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Destination this subscription listens on.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Whether the manager still routes messages to this subscription.
    pub fn is_active(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.has_subscription(&self.id))
    }

    /// Remove the subscription, sending UNSUBSCRIBE when connected.
    ///
    /// Returns `false` if it was already gone (unsubscribed, or dropped by a
    /// disconnect).
    pub fn unsubscribe(self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.unsubscribe(&self.id),
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}
