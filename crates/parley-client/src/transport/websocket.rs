//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use super::{Connector, Transport};
use crate::errors::TransportError;

/// Dials the broker with a plain WebSocket upgrade and offers the STOMP
/// subprotocols.
#[derive(Clone, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint_url: &str) -> Result<Transport, TransportError> {
        let connect_err = |reason: String| TransportError::Connect {
            endpoint: endpoint_url.to_string(),
            reason,
        };

        let mut request = endpoint_url
            .into_client_request()
            .map_err(|e| connect_err(e.to_string()))?;
        let _ = request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(parley_stomp::WS_SUBPROTOCOLS),
        );

        let (ws, response) = connect_async(request)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        debug!(
            endpoint = endpoint_url,
            status = %response.status(),
            protocol = ?response.headers().get("Sec-WebSocket-Protocol"),
            "websocket upgraded"
        );

        let (ws_tx, ws_rx) = ws.split();

        let sink = ws_tx
            .with(|text: String| future::ready(Ok::<_, WsError>(Message::Text(text.into()))))
            .sink_map_err(|e| TransportError::Io(e.to_string()));

        let stream = ws_rx.filter_map(|item| future::ready(payload(item)));

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Map one WebSocket event to a STOMP payload. Control frames yield nothing.
fn payload(item: Result<Message, WsError>) -> Option<Result<String, TransportError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes.to_vec())
                .map_err(|_| TransportError::Io("binary frame is not UTF-8".into())),
        ),
        Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Some(Err(TransportError::Closed)),
        Err(e) => Some(Err(TransportError::Io(e.to_string()))),
    }
}
