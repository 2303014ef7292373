//! Per-attempt session task.
//!
//! Opens a transport, performs the STOMP handshake, then pumps frames in
//! both directions until the transport closes or the manager cancels it.
//! Whatever happens, the outcome is reported back exactly once through
//! `Shared::on_session_end`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_stomp::{Command, Frame, HeartBeat, NegotiatedHeartBeat, decode_frames};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, trace, warn};
use uuid::Uuid;

use crate::manager::Shared;
use crate::state::Counters;
use crate::subscription::Message;
use crate::transport::{FrameStream, Transport};

/// Inbound silence tolerated, as a multiple of the negotiated interval.
const HEARTBEAT_GRACE_FACTOR: u32 = 2;

/// Why a session task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// Stopped by `disconnect()` or superseded.
    Cancelled,
    /// Transport failed to open, or the broker never confirmed CONNECT.
    HandshakeFailed(String),
    /// An established session lost its transport.
    Closed(String),
}

pub(crate) async fn run(shared: Arc<Shared>, generation: u64, cancel: CancellationToken) {
    let connection_id = format!("conn_{}", Uuid::now_v7());
    let span = info_span!("session", %connection_id, generation);
    async move {
        let end = drive(&shared, generation, &cancel).await;
        debug!(?end, "session task finished");
        shared.on_session_end(generation, end);
    }
    .instrument(span)
    .await;
}

async fn drive(shared: &Arc<Shared>, generation: u64, cancel: &CancellationToken) -> SessionEnd {
    let config = &shared.config;
    let handshake = async {
        let mut transport = shared
            .connector
            .open(&config.endpoint_url)
            .await
            .map_err(|e| e.to_string())?;
        Counters::bump(&shared.counters.transports_opened);

        let connect = Frame::connect(
            &config.stomp_host(),
            config.heartbeat,
            &config.connect_header_list(),
        );
        transport
            .sink
            .send(connect.encode())
            .await
            .map_err(|e| e.to_string())?;
        let connected = await_connected(&mut transport.stream).await?;
        Ok::<_, String>((transport, connected))
    };

    let (transport, connected) = tokio::select! {
        biased;
        () = cancel.cancelled() => return SessionEnd::Cancelled,
        result = tokio::time::timeout(config.connect_timeout, handshake) => match result {
            Ok(Ok(pair)) => pair,
            Ok(Err(reason)) => return SessionEnd::HandshakeFailed(reason),
            Err(_) => {
                return SessionEnd::HandshakeFailed(format!(
                    "no CONNECTED frame within {:?}",
                    config.connect_timeout
                ));
            }
        },
    };

    let server_heartbeat = connected
        .header("heart-beat")
        .and_then(HeartBeat::parse)
        .unwrap_or(HeartBeat::DISABLED);
    let heartbeat = config.heartbeat.negotiate(server_heartbeat);
    debug!(
        version = connected.header("version").unwrap_or("1.0"),
        send_every = ?heartbeat.send_every,
        expect_every = ?heartbeat.expect_every,
        "handshake complete"
    );

    let (link, outbound) = mpsc::unbounded_channel();
    if !shared.on_connected(generation, link, connected.header("server")) {
        return SessionEnd::Cancelled;
    }
    pump(shared, generation, transport, outbound, heartbeat, cancel).await
}

/// Read until CONNECTED. An ERROR frame or a closed stream fails the handshake.
async fn await_connected(stream: &mut FrameStream) -> Result<Frame, String> {
    while let Some(item) = stream.next().await {
        let payload = item.map_err(|e| e.to_string())?;
        let frames =
            decode_frames(&payload).map_err(|e| format!("malformed handshake reply: {e}"))?;
        for frame in frames {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    let message = frame
                        .header("message")
                        .unwrap_or(frame.body.as_str())
                        .to_string();
                    return Err(format!("broker rejected CONNECT: {message}"));
                }
                other => debug!(command = %other, "ignoring frame before CONNECTED"),
            }
        }
    }
    Err("transport closed during handshake".to_string())
}

async fn pump(
    shared: &Shared,
    generation: u64,
    transport: Transport,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    heartbeat: NegotiatedHeartBeat,
    cancel: &CancellationToken,
) -> SessionEnd {
    let Transport {
        mut sink,
        mut stream,
    } = transport;

    let mut send_ticker = heartbeat.send_every.map(|every| {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let grace = heartbeat
        .expect_every
        .map(|every| every * HEARTBEAT_GRACE_FACTOR);
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // Frames queued before disconnect() still go out ahead of DISCONNECT.
                while let Ok(frame) = outbound.try_recv() {
                    if sink.send(frame.encode()).await.is_err() {
                        return SessionEnd::Cancelled;
                    }
                }
                let _ = sink.send(Frame::disconnect().encode()).await;
                let _ = sink.close().await;
                return SessionEnd::Cancelled;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    return SessionEnd::Cancelled;
                };
                trace!(command = %frame.command, "sending frame");
                if let Err(e) = sink.send(frame.encode()).await {
                    return SessionEnd::Closed(e.to_string());
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(payload)) => {
                    last_inbound = Instant::now();
                    dispatch(shared, generation, &payload);
                }
                Some(Err(e)) => return SessionEnd::Closed(e.to_string()),
                None => return SessionEnd::Closed("transport closed by peer".to_string()),
            },
            () = tick(&mut send_ticker) => {
                if let Err(e) = sink.send("\n".to_string()).await {
                    return SessionEnd::Closed(e.to_string());
                }
            }
            () = expire(last_inbound, grace) => {
                let silence = grace.unwrap_or_default();
                return SessionEnd::Closed(format!("no traffic from broker for {silence:?}"));
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            let _ = ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(last_inbound: Instant, grace: Option<Duration>) {
    match grace {
        Some(grace) => tokio::time::sleep_until(last_inbound + grace).await,
        None => std::future::pending().await,
    }
}

/// Route every frame in one inbound payload.
pub(crate) fn dispatch(shared: &Shared, generation: u64, payload: &str) {
    let frames = match decode_frames(payload) {
        Ok(frames) => frames,
        Err(e) => {
            Counters::bump(&shared.counters.malformed_frames);
            warn!(error = %e, "malformed frame from broker, ignoring");
            return;
        }
    };
    for frame in frames {
        match frame.command {
            Command::Message => deliver(shared, generation, frame),
            Command::Error => warn!(
                reason = frame.header("message").unwrap_or_default(),
                body = %frame.body,
                "broker reported an error"
            ),
            Command::Receipt => {
                debug!(receipt = frame.header("receipt-id").unwrap_or_default(), "receipt");
            }
            other => debug!(command = %other, "ignoring unexpected frame"),
        }
    }
}

fn deliver(shared: &Shared, generation: u64, frame: Frame) {
    let Some(message) = Message::from_frame(frame) else {
        Counters::bump(&shared.counters.malformed_frames);
        warn!("MESSAGE frame without subscription header, ignoring");
        return;
    };
    let Some(handler) = shared.handler_for(generation, &message.subscription) else {
        debug!(
            subscription = %message.subscription,
            destination = %message.destination,
            "message for unknown subscription dropped"
        );
        return;
    };
    Counters::bump(&shared.counters.messages_received);
    // Handler panics stop here; the pump keeps running.
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(&message))) {
        Counters::bump(&shared.counters.handler_panics);
        warn!(
            subscription = %message.subscription,
            destination = %message.destination,
            reason = panic_reason(payload.as_ref()),
            "message handler panicked"
        );
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::manager::ConnectionManager;
    use crate::mock::{HandshakeMode, MockBroker};
    use crate::state::ConnectionState;

    fn config() -> ClientConfig {
        ClientConfig::new("ws://broker.test/ws")
            .with_heartbeat(HeartBeat::DISABLED)
            .with_connect_timeout(Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_times_out_handshake() {
        let broker = MockBroker::new();
        broker.set_handshake(HandshakeMode::Silent);
        let manager = ConnectionManager::with_connector(config(), broker.connector()).unwrap();
        let mut events = manager.state_events();

        manager.connect();
        assert_eq!(events.recv().await.unwrap(), ConnectionState::Connecting);
        assert_eq!(events.recv().await.unwrap(), ConnectionState::Disconnected);
        assert!(manager.reconnect_pending());
        assert_eq!(manager.stats().handshakes_completed, 0);
        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn error_reply_fails_handshake() {
        let broker = MockBroker::new();
        broker.set_handshake(HandshakeMode::Reject("bad credentials".into()));
        let manager = ConnectionManager::with_connector(config(), broker.connector()).unwrap();
        let mut events = manager.state_events();

        manager.connect();
        assert_eq!(events.recv().await.unwrap(), ConnectionState::Connecting);
        assert_eq!(events.recv().await.unwrap(), ConnectionState::Disconnected);
        assert_eq!(manager.stats().transports_opened, 1);
        assert!(manager.reconnect_pending());
        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_heartbeats_close_the_session() {
        let broker = MockBroker::new();
        broker.set_server_heartbeat(HeartBeat::new(1_000, 0));
        let config = config().with_heartbeat(HeartBeat::new(0, 1_000));
        let manager = ConnectionManager::with_connector(config, broker.connector()).unwrap();
        let mut events = manager.state_events();

        manager.connect();
        assert_eq!(events.recv().await.unwrap(), ConnectionState::Connecting);
        assert_eq!(events.recv().await.unwrap(), ConnectionState::Connected);
        let connected_at = Instant::now();

        assert_eq!(events.recv().await.unwrap(), ConnectionState::Disconnected);
        assert!(connected_at.elapsed() >= Duration::from_secs(2));
        assert!(manager.reconnect_pending());
        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn outgoing_heartbeats_are_sent() {
        let broker = MockBroker::new();
        broker.set_server_heartbeat(HeartBeat::new(0, 500));
        let config = config().with_heartbeat(HeartBeat::new(500, 0));
        let manager = ConnectionManager::with_connector(config, broker.connector()).unwrap();

        manager.connect();
        let mut rx = manager.watch_state();
        rx.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_600)).await;
        assert!(broker.wait_until(|b| b.heartbeats_received() >= 3).await);
        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_is_counted_not_fatal() {
        let broker = MockBroker::new();
        let manager = ConnectionManager::with_connector(config(), broker.connector()).unwrap();
        manager.connect();
        let mut rx = manager.watch_state();
        rx.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        assert!(broker.deliver_raw("BOGUS\n\n\0"));
        assert!(
            broker
                .wait_until(|_| manager.stats().malformed_frames == 1)
                .await
        );
        assert_eq!(manager.state(), ConnectionState::Connected);
        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn error_frame_after_connect_keeps_session() {
        let broker = MockBroker::new();
        let manager = ConnectionManager::with_connector(config(), broker.connector()).unwrap();
        manager.connect();
        let mut rx = manager.watch_state();
        rx.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        assert!(broker.deliver_raw("ERROR\nmessage:slow down\n\n\0"));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.state(), ConnectionState::Connected);
        manager.disconnect();
    }
}
