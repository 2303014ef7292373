//! The connection manager.
//!
//! One [`ConnectionManager`] owns one logical STOMP session. All public
//! operations are synchronous and return immediately; the transport is
//! driven by a session task spawned per connection
//! attempt. Results arrive through subscription handlers and the state
//! watch channel.
//!
//! State machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --CONNECTED--> Connected
//!      ^                          |                         |
//!      |<---- handshake failure --+                         |
//!      |<---- transport close (reconnect timer armed) ------+
//!      |<---- disconnect() from any state (timer cancelled) -
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use parley_stomp::Frame;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::session::{self, SessionEnd};
use crate::state::{ConnectionState, ConnectionStats, Counters};
use crate::subscription::{Message, MessageHandler, Subscription, SubscriptionEntry};
use crate::transport::{Connector, WebSocketConnector};

/// Capacity of the state transition broadcast.
const STATE_EVENT_CAPACITY: usize = 64;

/// Handle to a reconnecting STOMP session.
///
/// Cheap to clone; clones share the same session. Construct one per
/// application session and pass it to whoever needs it. Operations must be
/// called from within a tokio runtime. Call [`disconnect`](Self::disconnect)
/// to stop the session: a connected session task keeps the shared state
/// alive until its transport ends.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) counters: Counters,
    state: Mutex<SessionState>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionState>,
}

/// Mutable session state. `link` is `Some` exactly when `phase` is
/// `Connected`.
#[derive(Default)]
struct SessionState {
    phase: ConnectionState,
    /// Bumped on every connection attempt and every disconnect.
    generation: u64,
    link: Option<mpsc::UnboundedSender<Frame>>,
    driver: Option<Driver>,
    reconnect: Option<ReconnectTimer>,
    timer_seq: u64,
    subscriptions: HashMap<String, SubscriptionEntry>,
    subscription_seq: u64,
    default_listener: Option<(String, MessageHandler)>,
}

struct Driver {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ReconnectTimer {
    token: u64,
    task: JoinHandle<()>,
}

impl SessionState {
    fn next_subscription_id(&mut self) -> String {
        let id = format!("sub-{}", self.subscription_seq);
        self.subscription_seq += 1;
        id
    }
}

impl ConnectionManager {
    /// Manager that dials `config.endpoint_url` over WebSocket.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_connector(config, Arc::new(WebSocketConnector::new()))
    }

    /// Manager with a custom transport.
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector,
                counters: Counters::default(),
                state: Mutex::new(SessionState::default()),
                state_tx,
                events_tx,
            }),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().phase
    }

    /// Whether subscribe and send are currently live.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Latest-value view of the state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Every state transition, in order.
    pub fn state_events(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.events_tx.subscribe()
    }

    /// Whether a reconnect timer is armed.
    pub fn reconnect_pending(&self) -> bool {
        self.shared.state.lock().reconnect.is_some()
    }

    /// Number of registered subscriptions, including the default listener's.
    pub fn active_subscriptions(&self) -> usize {
        self.shared.state.lock().subscriptions.len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ConnectionStats {
        self.shared.counters.snapshot()
    }

    /// Start connecting. No-op while connecting or connected.
    ///
    /// A pending reconnect timer is cancelled and the attempt starts now.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Cancel any pending reconnect and tear down the session. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.shared.disconnect();
    }

    /// [`disconnect`](Self::disconnect), then wait for the session task to
    /// flush queued frames and DISCONNECT. Must not be awaited from inside a
    /// message handler, which runs on that task.
    pub async fn close(&self) {
        if let Some(task) = self.shared.disconnect() {
            if let Err(e) = task.await {
                warn!(error = %e, "session task failed during close");
            }
        }
    }

    /// Subscribe `handler` to `destination`.
    ///
    /// Returns `None` (and logs a warning) when not connected; callers
    /// re-subscribe once the state returns to `Connected`.
    pub fn subscribe<F>(&self, destination: &str, handler: F) -> Option<Subscription>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.subscribe_with_headers(destination, &[], handler)
    }

    /// [`subscribe`](Self::subscribe) with extra SUBSCRIBE headers
    /// (e.g. `ack`, selectors).
    pub fn subscribe_with_headers<F>(
        &self,
        destination: &str,
        headers: &[(String, String)],
        handler: F,
    ) -> Option<Subscription>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.subscribe(destination, headers, Arc::new(handler))
    }

    /// Publish `body` to `destination`. Fire-and-forget.
    ///
    /// Returns `false` (and logs a warning) when not connected. The message
    /// is not queued for later delivery.
    pub fn send(&self, destination: &str, body: impl Into<String>) -> bool {
        self.send_with_headers(destination, &[], body)
    }

    /// [`send`](Self::send) with extra SEND headers.
    pub fn send_with_headers(
        &self,
        destination: &str,
        headers: &[(String, String)],
        body: impl Into<String>,
    ) -> bool {
        self.shared.send(destination, headers, body.into())
    }

    /// Listener subscribed automatically after every successful handshake.
    ///
    /// Replaces any previous default listener. When already connected the
    /// subscription is made immediately.
    pub fn set_default_listener<F>(&self, destination: &str, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared
            .set_default_listener(destination, Arc::new(handler));
    }

    /// Remove the default listener and its live subscription.
    pub fn clear_default_listener(&self) {
        self.shared.clear_default_listener();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.shared.config.endpoint_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn set_phase(&self, st: &mut SessionState, phase: ConnectionState) {
        if st.phase == phase {
            return;
        }
        st.phase = phase;
        let _ = self.state_tx.send_replace(phase);
        let _ = self.events_tx.send(phase);
    }

    fn connect(self: &Arc<Self>) {
        let mut st = self.state.lock();
        if st.phase != ConnectionState::Disconnected {
            debug!(state = %st.phase, "connect ignored, session already active");
            return;
        }
        if let Some(timer) = st.reconnect.take() {
            timer.task.abort();
            debug!("explicit connect supersedes pending reconnect");
        }
        self.start_session(&mut st);
    }

    fn start_session(self: &Arc<Self>, st: &mut SessionState) {
        st.generation += 1;
        let generation = st.generation;
        self.set_phase(st, ConnectionState::Connecting);
        Counters::bump(&self.counters.connect_attempts);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(session::run(Arc::clone(self), generation, cancel.clone()));
        st.driver = Some(Driver { cancel, task });
        info!(endpoint = %self.config.endpoint_url, generation, "connecting");
    }

    /// Returns the cancelled session task, if one was running.
    fn disconnect(&self) -> Option<JoinHandle<()>> {
        let mut st = self.state.lock();
        if let Some(timer) = st.reconnect.take() {
            timer.task.abort();
            debug!("pending reconnect cancelled");
        }
        let task = st.driver.take().map(|driver| {
            driver.cancel.cancel();
            driver.task
        });
        st.generation += 1;
        st.link = None;
        st.subscriptions.clear();

        if st.phase == ConnectionState::Disconnected {
            debug!("disconnect ignored, already disconnected");
            return task;
        }
        self.set_phase(&mut st, ConnectionState::Disconnected);
        info!(endpoint = %self.config.endpoint_url, "disconnected");
        task
    }

    fn subscribe(
        self: &Arc<Self>,
        destination: &str,
        headers: &[(String, String)],
        handler: MessageHandler,
    ) -> Option<Subscription> {
        let mut st = self.state.lock();
        let Some(link) = st.link.clone() else {
            warn!(destination, state = %st.phase, "subscribe while not connected, ignoring");
            return None;
        };
        let id = Self::install(&mut st, &link, destination, headers, handler, false)?;
        debug!(destination, subscription = %id, "subscribed");
        Some(Subscription::new(
            id,
            destination.to_string(),
            Arc::downgrade(self),
        ))
    }

    /// Register a subscription and queue its SUBSCRIBE frame.
    fn install(
        st: &mut SessionState,
        link: &mpsc::UnboundedSender<Frame>,
        destination: &str,
        headers: &[(String, String)],
        handler: MessageHandler,
        is_default: bool,
    ) -> Option<String> {
        let id = st.next_subscription_id();
        if link
            .send(Frame::subscribe(&id, destination, headers))
            .is_err()
        {
            warn!(destination, "session closing, subscribe dropped");
            return None;
        }
        let _ = st.subscriptions.insert(
            id.clone(),
            SubscriptionEntry {
                destination: destination.to_string(),
                headers: headers.to_vec(),
                handler,
                is_default,
            },
        );
        Some(id)
    }

    pub(crate) fn unsubscribe(&self, id: &str) -> bool {
        let mut st = self.state.lock();
        let Some(entry) = st.subscriptions.remove(id) else {
            return false;
        };
        if let Some(link) = &st.link {
            let _ = link.send(Frame::unsubscribe(id));
        }
        debug!(destination = %entry.destination, subscription = id, "unsubscribed");
        true
    }

    pub(crate) fn has_subscription(&self, id: &str) -> bool {
        self.state.lock().subscriptions.contains_key(id)
    }

    fn send(&self, destination: &str, headers: &[(String, String)], body: String) -> bool {
        let st = self.state.lock();
        let Some(link) = &st.link else {
            warn!(destination, state = %st.phase, "send while not connected, message dropped");
            return false;
        };
        if link.send(Frame::send(destination, headers, body)).is_err() {
            warn!(destination, "session closing, message dropped");
            return false;
        }
        Counters::bump(&self.counters.messages_sent);
        true
    }

    fn set_default_listener(&self, destination: &str, handler: MessageHandler) {
        let mut st = self.state.lock();
        Self::remove_default_subscription(&mut st);
        st.default_listener = Some((destination.to_string(), Arc::clone(&handler)));
        if let Some(link) = st.link.clone() {
            let _ = Self::install(&mut st, &link, destination, &[], handler, true);
        }
    }

    fn clear_default_listener(&self) {
        let mut st = self.state.lock();
        st.default_listener = None;
        Self::remove_default_subscription(&mut st);
    }

    fn remove_default_subscription(st: &mut SessionState) {
        let ids: Vec<String> = st
            .subscriptions
            .iter()
            .filter(|(_, e)| e.is_default)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            let _ = st.subscriptions.remove(&id);
            if let Some(link) = &st.link {
                let _ = link.send(Frame::unsubscribe(&id));
            }
        }
    }

    /// Handshake finished. Returns `false` if this session was superseded.
    pub(crate) fn on_connected(
        &self,
        generation: u64,
        link: mpsc::UnboundedSender<Frame>,
        server: Option<&str>,
    ) -> bool {
        let mut st = self.state.lock();
        if st.generation != generation {
            debug!(generation, "handshake completed for a superseded session");
            return false;
        }

        // Only subscriptions kept by resubscribe_on_reconnect survive a close.
        let mut resubscribed = 0usize;
        for (id, entry) in &st.subscriptions {
            if link
                .send(Frame::subscribe(id, &entry.destination, &entry.headers))
                .is_ok()
            {
                resubscribed += 1;
            }
        }
        if let Some((destination, handler)) = st.default_listener.clone() {
            let _ = Self::install(&mut st, &link, &destination, &[], handler, true);
        }

        st.link = Some(link);
        self.set_phase(&mut st, ConnectionState::Connected);
        Counters::bump(&self.counters.handshakes_completed);
        info!(
            endpoint = %self.config.endpoint_url,
            generation,
            server = server.unwrap_or("unknown"),
            resubscribed,
            "connected"
        );
        true
    }

    /// Session task finished. Arms the reconnect timer unless superseded.
    pub(crate) fn on_session_end(self: &Arc<Self>, generation: u64, end: SessionEnd) {
        let mut st = self.state.lock();
        if st.generation != generation {
            debug!(generation, ?end, "superseded session ended");
            return;
        }
        st.driver = None;
        st.link = None;
        if self.config.resubscribe_on_reconnect {
            st.subscriptions.retain(|_, e| !e.is_default);
        } else {
            st.subscriptions.clear();
        }
        self.set_phase(&mut st, ConnectionState::Disconnected);

        match end {
            SessionEnd::Cancelled => {
                debug!(generation, "session cancelled");
                return;
            }
            SessionEnd::HandshakeFailed(reason) => {
                warn!(endpoint = %self.config.endpoint_url, %reason, "handshake failed");
            }
            SessionEnd::Closed(reason) => {
                warn!(endpoint = %self.config.endpoint_url, %reason, "connection lost");
            }
        }
        self.schedule_reconnect(&mut st);
    }

    fn schedule_reconnect(self: &Arc<Self>, st: &mut SessionState) {
        if st.reconnect.is_some() {
            debug!("reconnect already pending");
            return;
        }
        st.timer_seq += 1;
        let token = st.timer_seq;
        let delay = self.config.reconnect_delay;
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire_reconnect(token);
            }
        });
        st.reconnect = Some(ReconnectTimer { token, task });
        Counters::bump(&self.counters.reconnects_scheduled);
        info!(?delay, "reconnect scheduled");
    }

    /// Timer callback. The token check rejects a timer that woke after
    /// `disconnect()` or an explicit `connect()` replaced it.
    fn fire_reconnect(self: &Arc<Self>, token: u64) {
        let mut st = self.state.lock();
        if st.reconnect.as_ref().map(|t| t.token) != Some(token) {
            debug!(token, "stale reconnect timer ignored");
            return;
        }
        st.reconnect = None;
        if st.phase != ConnectionState::Disconnected {
            return;
        }
        info!("reconnecting");
        self.start_session(&mut st);
    }

    /// Handler for an inbound MESSAGE, if its session is current.
    pub(crate) fn handler_for(&self, generation: u64, subscription: &str) -> Option<MessageHandler> {
        let st = self.state.lock();
        if st.generation != generation {
            return None;
        }
        st.subscriptions
            .get(subscription)
            .map(|e| Arc::clone(&e.handler))
    }
}
