//! In-memory broker for tests.
//!
//! [`MockBroker`] implements [`Connector`] with channel-backed transports
//! and a minimal STOMP broker behind them: it answers CONNECT, tracks
//! subscriptions, and routes SEND frames to matching subscriptions on every
//! live connection. Tests drive failures through it (refused connections,
//! silent or rejecting handshakes, dropped connections) without sockets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use parley_stomp::{Command, Frame, HeartBeat, decode_frames};

use crate::errors::TransportError;
use crate::transport::{Connector, Transport};

/// How the broker answers CONNECT.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum HandshakeMode {
    /// Reply CONNECTED.
    #[default]
    Accept,
    /// Fail to open the transport.
    Refuse,
    /// Open the transport but never reply.
    Silent,
    /// Reply ERROR with this message, then close.
    Reject(String),
}

/// Channel-backed broker. Clones share state.
#[derive(Clone, Default)]
pub struct MockBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    mode: Mutex<HandshakeMode>,
    server_heartbeat: Mutex<HeartBeat>,
    attempts: AtomicU64,
    heartbeats: AtomicU64,
    message_seq: AtomicU64,
    links: Mutex<Vec<Link>>,
    client_frames: Mutex<Vec<Frame>>,
}

type ToClient = mpsc::UnboundedSender<Result<String, TransportError>>;

struct Link {
    to_client: Option<ToClient>,
    connected: bool,
    /// Subscription id to destination.
    subscriptions: BTreeMap<String, String>,
}

impl MockBroker {
    /// Broker that accepts every connection with heart-beats disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// This broker as a manager connector.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Change how subsequent CONNECT frames are answered.
    pub fn set_handshake(&self, mode: HandshakeMode) {
        *self.inner.mode.lock() = mode;
    }

    /// `heart-beat` header sent in CONNECTED. The broker itself never
    /// emits heart-beats.
    pub fn set_server_heartbeat(&self, heartbeat: HeartBeat) {
        *self.inner.server_heartbeat.lock() = heartbeat;
    }

    /// Number of `open` calls, refused ones included.
    pub fn connection_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Heart-beat EOLs received from clients.
    pub fn heartbeats_received(&self) -> u64 {
        self.inner.heartbeats.load(Ordering::SeqCst)
    }

    /// Connections that completed the handshake and are still open.
    pub fn live_connections(&self) -> usize {
        self.inner
            .links
            .lock()
            .iter()
            .filter(|l| l.connected && l.to_client.is_some())
            .count()
    }

    /// Every frame received from clients, in arrival order.
    pub fn client_frames(&self) -> Vec<Frame> {
        self.inner.client_frames.lock().clone()
    }

    /// Frames of one command received from clients.
    pub fn frames(&self, command: Command) -> Vec<Frame> {
        self.inner
            .client_frames
            .lock()
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }

    /// Whether any live connection is subscribed to `destination`.
    pub fn has_subscription(&self, destination: &str) -> bool {
        self.inner
            .links
            .lock()
            .iter()
            .filter(|l| l.to_client.is_some())
            .any(|l| l.subscriptions.values().any(|d| d == destination))
    }

    /// Send a MESSAGE to every live subscription on `destination`.
    /// Returns how many were delivered.
    pub fn deliver(&self, destination: &str, body: &str) -> usize {
        self.inner.route(destination, &[], body)
    }

    /// Push a raw payload to the newest live connection.
    pub fn deliver_raw(&self, payload: &str) -> bool {
        let links = self.inner.links.lock();
        links
            .iter()
            .rev()
            .find_map(|l| l.to_client.as_ref())
            .is_some_and(|tx| tx.unbounded_send(Ok(payload.to_string())).is_ok())
    }

    /// Close the newest live connection from the broker side.
    pub fn drop_connection(&self) -> bool {
        let mut links = self.inner.links.lock();
        let Some(link) = links.iter_mut().rev().find(|l| l.to_client.is_some()) else {
            return false;
        };
        link.to_client = None;
        link.connected = false;
        link.subscriptions.clear();
        true
    }

    /// Yield until `check` holds. Gives up after a bounded number of polls.
    pub async fn wait_until<F>(&self, mut check: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        for _ in 0..10_000 {
            if check(self) {
                return true;
            }
            tokio::task::yield_now().await;
        }
        check(self)
    }

    /// Yield until some live connection subscribes to `destination`.
    pub async fn wait_for_subscription(&self, destination: &str) -> bool {
        self.wait_until(|b| b.has_subscription(destination)).await
    }
}

impl Inner {
    fn handle(&self, link_id: usize, payload: &str) {
        if payload.chars().all(|c| c == '\n' || c == '\r') {
            let _ = self.heartbeats.fetch_add(1, Ordering::SeqCst);
            return;
        }
        let Ok(frames) = decode_frames(payload) else {
            return;
        };
        for frame in frames {
            self.client_frames.lock().push(frame.clone());
            match frame.command {
                Command::Connect | Command::Stomp => self.answer_connect(link_id),
                Command::Subscribe => {
                    if let (Some(id), Some(dest)) =
                        (frame.header("id"), frame.header("destination"))
                    {
                        let mut links = self.links.lock();
                        let _ = links[link_id]
                            .subscriptions
                            .insert(id.to_string(), dest.to_string());
                    }
                }
                Command::Unsubscribe => {
                    if let Some(id) = frame.header("id") {
                        let _ = self.links.lock()[link_id].subscriptions.remove(id);
                    }
                }
                Command::Send => {
                    if let Some(dest) = frame.header("destination") {
                        let _ = self.route(dest, &frame.headers, &frame.body);
                    }
                }
                Command::Disconnect => {
                    let mut links = self.links.lock();
                    if let Some(receipt) = frame.header("receipt") {
                        if let Some(tx) = &links[link_id].to_client {
                            let reply = Frame::new(Command::Receipt).with_header("receipt-id", receipt);
                            let _ = tx.unbounded_send(Ok(reply.encode()));
                        }
                    }
                    let link = &mut links[link_id];
                    link.connected = false;
                    link.subscriptions.clear();
                }
                _ => {}
            }
        }
    }

    fn answer_connect(&self, link_id: usize) {
        let mode = self.mode.lock().clone();
        let heartbeat = *self.server_heartbeat.lock();
        let mut links = self.links.lock();
        let link = &mut links[link_id];
        let Some(tx) = &link.to_client else {
            return;
        };
        match mode {
            HandshakeMode::Accept | HandshakeMode::Refuse => {
                let reply = Frame::new(Command::Connected)
                    .with_header("version", "1.2")
                    .with_header("heart-beat", heartbeat.to_string())
                    .with_header("server", "mock-broker/1.0");
                let _ = tx.unbounded_send(Ok(reply.encode()));
                link.connected = true;
            }
            HandshakeMode::Silent => {}
            HandshakeMode::Reject(message) => {
                let reply = Frame::new(Command::Error).with_header("message", message);
                let _ = tx.unbounded_send(Ok(reply.encode()));
                link.to_client = None;
            }
        }
    }

    fn route(&self, destination: &str, headers: &[(String, String)], body: &str) -> usize {
        let links = self.links.lock();
        let mut delivered = 0;
        for link in links.iter().filter(|l| l.connected) {
            let Some(tx) = &link.to_client else {
                continue;
            };
            for (id, dest) in &link.subscriptions {
                if dest != destination {
                    continue;
                }
                let seq = self.message_seq.fetch_add(1, Ordering::SeqCst);
                let mut frame = Frame::new(Command::Message)
                    .with_header("destination", destination)
                    .with_header("subscription", id.as_str())
                    .with_header("message-id", format!("msg-{seq}"))
                    .with_body(body);
                frame = frame.with_extra_headers(headers);
                if tx.unbounded_send(Ok(frame.encode())).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

#[async_trait]
impl Connector for MockBroker {
    async fn open(&self, endpoint_url: &str) -> Result<Transport, TransportError> {
        let _ = self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if *self.inner.mode.lock() == HandshakeMode::Refuse {
            return Err(TransportError::Connect {
                endpoint: endpoint_url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (client_tx, mut broker_rx) = mpsc::unbounded::<String>();
        let (to_client, client_rx) = mpsc::unbounded();
        let link_id = {
            let mut links = self.inner.links.lock();
            links.push(Link {
                to_client: Some(to_client),
                connected: false,
                subscriptions: BTreeMap::new(),
            });
            links.len() - 1
        };

        let inner = Arc::clone(&self.inner);
        drop(tokio::spawn(async move {
            while let Some(payload) = broker_rx.next().await {
                inner.handle(link_id, &payload);
            }
            let mut links = inner.links.lock();
            let link = &mut links[link_id];
            link.to_client = None;
            link.connected = false;
            link.subscriptions.clear();
        }));

        let sink = client_tx.sink_map_err(|_| TransportError::Closed);
        Ok(Transport::new(Box::pin(sink), Box::pin(client_rx)))
    }
}
