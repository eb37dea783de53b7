//! WebSocket transport for the relay
//!
//! Authentication happens in-band with an `auth` frame, so the upgrade itself
//! is unauthenticated. Each socket is split: the reader side feeds
//! `ConnectionHandler::run` through `StreamMessage`, the writer task drains
//! the connection's outbound queue.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parley_hub::protocol::{decode_client_message, encode_server_message};
use parley_hub::{ClientMessage, ProtocolError, ServerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::http::AppState;
use crate::impls::{ConnectionHandler, StreamMessage};

/// Longest a single socket write may take before the client is dropped
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket stream implementation of `StreamMessage`
struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
}

#[async_trait::async_trait]
impl StreamMessage for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<ClientMessage, ProtocolError>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(decode_client_message(text.as_str()));
                }
                Some(Ok(Message::Binary(_))) => {
                    return Some(Err(ProtocolError::UnsupportedFrame("binary")));
                }
                Some(Ok(Message::Close(_))) => return None,
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket read failed");
                    return None;
                }
                None => return None,
                // Ping/pong are answered by axum
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Relay endpoint: `GET /ws`
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let limit = state.max_frame_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (outbound_tx, outbound_rx) = state.relay.outbound_channel();
    let cancel = CancellationToken::new();
    let handler = ConnectionHandler::new(state.relay.clone(), outbound_tx, cancel.clone());
    let connection_id = handler.connection_id().clone();

    let (sink, receiver) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, outbound_rx, cancel));

    let mut stream = WebSocketStream { receiver };
    handler.run(&mut stream).await;

    // The handler and the registry have dropped their senders by now, so the
    // writer flushes what is queued, sends Close and exits.
    if let Err(e) = writer.await {
        error!(connection_id = %connection_id, error = %e, "WebSocket writer task failed");
    }
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
    cancel: CancellationToken,
) {
    while let Some(message) = outbound.recv().await {
        let text = match encode_server_message(&message) {
            Ok(text) => text,
            Err(e) => {
                error!(message_type = message.kind(), error = %e, "Failed to encode server message");
                continue;
            }
        };

        match tokio::time::timeout(SEND_TIMEOUT, sink.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "WebSocket write failed");
                cancel.cancel();
                return;
            }
            Err(_) => {
                warn!("WebSocket write timed out, dropping client");
                cancel.cancel();
                return;
            }
        }
    }

    let _ = tokio::time::timeout(SEND_TIMEOUT, sink.send(Message::Close(None))).await;
}
