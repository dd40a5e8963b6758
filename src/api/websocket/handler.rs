//! WebSocket connection handler

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use super::registry::Client;
use super::state::SocketState;

/// Largest inbound frame or message accepted from a client
pub const MAX_INBOUND_SIZE: usize = 1 << 20;

fn socket_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_INBOUND_SIZE);
    config.max_frame_size = Some(MAX_INBOUND_SIZE);
    config
}

/// Why a connection's read loop ended.
struct Departure {
    reason: &'static str,
    /// Close status to send, when the protocol layer has not queued one
    reply: Option<CloseCode>,
}

impl Departure {
    fn silent(reason: &'static str) -> Self {
        Self { reason, reply: None }
    }

    fn closing(reason: &'static str, code: CloseCode) -> Self {
        Self {
            reason,
            reply: Some(code),
        }
    }
}

/// Serve one connection from upgrade to close.
///
/// A failed or late upgrade never reaches the registry. After the upgrade
/// the client waits for its snapshot from the change detector and is then
/// only read from: pings are answered and close frames echoed by the
/// protocol layer, data messages are ignored.
pub async fn handle_connection<S>(stream: S, addr: SocketAddr, state: Arc<SocketState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut path = String::new();
    let record_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        Ok(response)
    };
    let upgrade = accept_hdr_async_with_config(stream, record_path, Some(socket_config()));
    let socket = match tokio::time::timeout(state.handshake_timeout(), upgrade).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(err)) => {
            warn!(client = %addr, error = %err, "rejected websocket handshake");
            return;
        }
        Err(_) => {
            warn!(client = %addr, "websocket handshake timed out");
            return;
        }
    };

    let (sink, mut messages) = socket.split::<Message>();
    let client = Arc::new(Client::new(
        state.registry.next_client_id(),
        addr,
        Box::pin(sink),
    ));
    let timeout = state.registry.send_timeout();

    if let Err(err) = state.join(Arc::clone(&client)).await {
        warn!(client = %addr, error = %err, "client admission failed");
        client.close(timeout).await;
        return;
    }
    info!(client = %addr, path = %path, "client connected");

    let departure = read_loop(&mut messages, &client).await;

    // Leave the registry before any close frame so no broadcast follows it
    state.registry.remove(client.id()).await;
    if let Some(code) = departure.reply {
        let frame = CloseFrame {
            code,
            reason: "".into(),
        };
        // Ignore errors - the connection is closing anyway
        let _ = client.send(Message::Close(Some(frame)), timeout).await;
    }
    client.close(timeout).await;

    info!(
        client = %addr,
        reason = departure.reason,
        connected_secs = client.connected_for().num_seconds(),
        "client disconnected"
    );
}

/// Read until the connection ends.
async fn read_loop<S>(messages: &mut S, client: &Client) -> Departure
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = client.dropped() => return Departure::silent("dropped by server"),
            message = messages.next() => message,
        };

        match message {
            None => return Departure::silent("connection lost"),
            // Reply already queued by the protocol layer
            Some(Ok(Message::Close(_))) => return Departure::silent("closed by client"),
            // Pongs are queued by the protocol layer; data carries nothing for us
            Some(Ok(_)) => {}
            Some(Err(WsError::Capacity(err))) => {
                debug!(client = %client.addr(), error = %err, "inbound message too large");
                return Departure::closing("message too large", CloseCode::Size);
            }
            Some(Err(WsError::Protocol(err))) => {
                debug!(client = %client.addr(), error = %err, "bad inbound frame");
                return Departure::closing("protocol error", CloseCode::Protocol);
            }
            Some(Err(err)) => {
                debug!(client = %client.addr(), error = %err, "read failed");
                return Departure::silent("connection lost");
            }
        }
    }
}
