//! End-to-end over a real WebSocket with a tiny STOMP broker.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_client::{ClientConfig, ConnectionManager, ConnectionState, HeartBeat};
use parley_stomp::{Command, Frame, decode_frames};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_hdr_async(stream, |req: &Request, mut resp: Response| {
        let offered = req
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !offered.contains("v12.stomp") {
            return Err(ErrorResponse::new(Some("stomp subprotocol required".into())));
        }
        let _ = resp
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("v12.stomp"));
        Ok(resp)
    })
    .await
    .unwrap()
}

/// Serve one connection: answer CONNECT, echo SEND to subscribers.
/// Returns the client commands seen, ending at DISCONNECT or close.
async fn serve(mut ws: WebSocketStream<TcpStream>) -> Vec<Command> {
    let mut commands = Vec::new();
    let mut subscriptions: Vec<(String, String)> = Vec::new();
    while let Some(Ok(msg)) = ws.next().await {
        let WsMessage::Text(text) = msg else {
            continue;
        };
        for frame in decode_frames(text.as_str()).unwrap() {
            commands.push(frame.command);
            let reply = match frame.command {
                Command::Connect | Command::Stomp => Some(
                    Frame::new(Command::Connected)
                        .with_header("version", "1.2")
                        .with_header("heart-beat", "0,0"),
                ),
                Command::Subscribe => {
                    subscriptions.push((
                        frame.header("id").unwrap().to_string(),
                        frame.header("destination").unwrap().to_string(),
                    ));
                    None
                }
                Command::Send => {
                    let destination = frame.header("destination").unwrap();
                    subscriptions
                        .iter()
                        .find(|(_, d)| d == destination)
                        .map(|(id, _)| {
                            Frame::new(Command::Message)
                                .with_header("destination", destination)
                                .with_header("subscription", id.as_str())
                                .with_header("message-id", "m-1")
                                .with_body(frame.body.clone())
                        })
                }
                Command::Disconnect => return commands,
                _ => None,
            };
            if let Some(reply) = reply {
                ws.send(WsMessage::Text(reply.encode().into())).await.unwrap();
            }
        }
    }
    commands
}

fn config(url: String) -> ClientConfig {
    ClientConfig::new(url)
        .with_heartbeat(HeartBeat::DISABLED)
        .with_reconnect_delay(Duration::from_millis(50))
        .with_connect_timeout(TIMEOUT)
}

async fn wait_for(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.watch_state();
    tokio::time::timeout(TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn subscribe_and_receive_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let server: JoinHandle<Vec<Command>> = tokio::spawn(async move {
        let ws = accept(&listener).await;
        serve(ws).await
    });

    let manager = ConnectionManager::new(config(url)).unwrap();
    manager.connect();
    wait_for(&manager, ConnectionState::Connected).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = manager
        .subscribe("/topic/test", move |m| {
            let _ = tx.send(m.body.clone());
        })
        .unwrap();
    assert!(manager.send("/topic/test", "hello"));

    let body = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap();
    assert_eq!(body.as_deref(), Some("hello"));

    manager.disconnect();
    let commands = tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(
        commands,
        vec![
            Command::Connect,
            Command::Subscribe,
            Command::Send,
            Command::Disconnect
        ]
    );
}

#[tokio::test]
async fn reconnects_after_server_drops_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        // First connection: handshake, then hang up.
        let mut ws = accept(&listener).await;
        let _ = ws.next().await;
        let connected = Frame::new(Command::Connected).with_header("version", "1.2");
        ws.send(WsMessage::Text(connected.encode().into()))
            .await
            .unwrap();
        drop(ws);

        let ws = accept(&listener).await;
        serve(ws).await
    });

    let manager = ConnectionManager::new(config(url)).unwrap();
    let mut events = manager.state_events();
    manager.connect();

    let mut seen = Vec::new();
    while seen.len() < 5 {
        let state = tokio::time::timeout(TIMEOUT, events.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(state);
    }
    assert_eq!(
        seen,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(manager.stats().transports_opened, 2);

    manager.disconnect();
    let commands = tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(commands, vec![Command::Connect, Command::Disconnect]);
}
