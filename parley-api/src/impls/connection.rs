//! Per-connection state machine
//!
//! Each connection is driven by one `ConnectionHandler` running on its own
//! task. The handler decides what a client frame means in the current state
//! and delegates to the shared `SessionRegistry`; it never touches the
//! socket directly. Everything the client receives goes through the bounded
//! outbound queue, so direct replies and room broadcasts share one order.

use std::sync::Arc;

use parley_core::{
    config::RelayConfig,
    models::{Identity, RoomId},
    service::{IdentityService, PersistenceService},
};
use parley_hub::{
    ClientMessage, ConnectionId, ProtocolError, ServerMessage, SessionHandle, SessionRegistry,
    SignalFrame,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sent once before closing a connection whose token was rejected
pub const AUTH_FAILED_NOTICE: &str = "Authentication failed";

/// Sent to the author when a chat message could not be stored
pub const PERSIST_FAILED_NOTICE: &str = "Failed to save message";

/// Relay tunables taken from `RelayConfig`
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub default_room: RoomId,
    pub outbound_buffer: usize,
    pub max_message_len: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            default_room: RoomId::new(config.default_room_id),
            outbound_buffer: config.outbound_buffer.max(1),
            max_message_len: config.max_message_len,
        }
    }
}

/// Everything a connection needs, shared by all connections
#[derive(Clone)]
pub struct RelayContext {
    pub registry: SessionRegistry,
    pub identity: Arc<dyn IdentityService>,
    pub persistence: Arc<dyn PersistenceService>,
    pub settings: RelaySettings,
}

impl RelayContext {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        persistence: Arc<dyn PersistenceService>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            identity,
            persistence,
            settings,
        }
    }

    /// Outbound queue for a new connection
    #[must_use]
    pub fn outbound_channel(&self) -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(self.settings.outbound_buffer)
    }
}

/// Inbound half of a client transport
///
/// Outbound traffic does not go through this trait: it is queued on the
/// channel handed to `ConnectionHandler::new` and written by the transport.
#[async_trait::async_trait]
pub trait StreamMessage: Send {
    /// Next decoded client frame. `Some(Err(_))` is a bad frame that is
    /// dropped; `None` means the peer has gone away.
    async fn recv(&mut self) -> Option<Result<ClientMessage, ProtocolError>>;
}

/// What the transport should do after a frame was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

#[derive(Debug)]
enum ConnectionState {
    Unauthenticated,
    Active(Identity),
    Closed,
}

impl ConnectionState {
    const fn describe(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "before authentication",
            Self::Active(_) => "after authentication",
            Self::Closed => "after close",
        }
    }
}

pub struct ConnectionHandler {
    ctx: RelayContext,
    connection_id: ConnectionId,
    outbound: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
    state: ConnectionState,
}

impl ConnectionHandler {
    pub fn new(
        ctx: RelayContext,
        outbound: mpsc::Sender<ServerMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            connection_id: ConnectionId::generate(),
            outbound,
            cancel,
            state: ConnectionState::Unauthenticated,
        }
    }

    #[must_use]
    pub const fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Identity bound by a successful `auth`, if any
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        match &self.state {
            ConnectionState::Active(identity) => Some(identity),
            ConnectionState::Unauthenticated | ConnectionState::Closed => None,
        }
    }

    /// Apply one decoded client frame.
    ///
    /// A `ProtocolError` means the frame was dropped without any state
    /// change; the connection stays open.
    pub async fn handle_message(&mut self, message: ClientMessage) -> Result<Flow, ProtocolError> {
        if matches!(self.state, ConnectionState::Unauthenticated) {
            return match message {
                ClientMessage::Auth { token, room_id } => {
                    Ok(self.authenticate(&token, room_id).await)
                }
                other => Err(self.wrong_state(&other)),
            };
        }
        let identity = match &self.state {
            ConnectionState::Active(identity) => identity.clone(),
            ConnectionState::Unauthenticated | ConnectionState::Closed => {
                return Err(self.wrong_state(&message));
            }
        };

        match message {
            auth @ ClientMessage::Auth { .. } => Err(self.wrong_state(&auth)),
            ClientMessage::JoinRoom { room_id } => {
                self.join_room(&identity, room_id);
                Ok(Flow::Continue)
            }
            ClientMessage::ChatMessage { message } => {
                self.chat(&identity, message).await?;
                Ok(Flow::Continue)
            }
            signal @ (ClientMessage::WebrtcOffer { .. }
            | ClientMessage::WebrtcAnswer { .. }
            | ClientMessage::WebrtcIceCandidate { .. }) => {
                if let Some(frame) = signal.into_signal() {
                    self.signal(&identity, frame);
                }
                Ok(Flow::Continue)
            }
        }
    }

    fn wrong_state(&self, message: &ClientMessage) -> ProtocolError {
        ProtocolError::WrongState {
            kind: message.kind(),
            state: self.state.describe(),
        }
    }

    async fn authenticate(&mut self, token: &str, room_id: Option<RoomId>) -> Flow {
        let identity = match self.ctx.identity.verify(token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Authentication failed, closing connection"
                );
                self.reply(ServerMessage::error(AUTH_FAILED_NOTICE));
                self.state = ConnectionState::Closed;
                return Flow::Close;
            }
        };

        let room = room_id.unwrap_or(self.ctx.settings.default_room);
        let handle = SessionHandle::new(
            self.connection_id.clone(),
            identity.clone(),
            self.outbound.clone(),
            self.cancel.clone(),
        );
        self.ctx.registry.register(handle, room);
        self.state = ConnectionState::Active(identity);
        Flow::Continue
    }

    fn join_room(&self, identity: &Identity, room: RoomId) {
        if let Err(e) = self
            .ctx
            .registry
            .switch_room(identity.id, &self.connection_id, room)
        {
            debug!(
                user_id = %identity.id,
                room_id = %room,
                error = %e,
                "Ignoring room switch from a superseded connection"
            );
        }
    }

    /// Persist, then broadcast to the room the message was stored in
    async fn chat(&self, identity: &Identity, text: String) -> Result<(), ProtocolError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ProtocolError::InvalidChat("message is empty".to_string()));
        }
        let len = text.chars().count();
        if len > self.ctx.settings.max_message_len {
            return Err(ProtocolError::InvalidChat(format!(
                "message is {len} characters, limit is {}",
                self.ctx.settings.max_message_len
            )));
        }

        let Some(room) = self
            .ctx
            .registry
            .current_room(identity.id, &self.connection_id)
        else {
            debug!(user_id = %identity.id, "Dropping chat from a superseded connection");
            return Ok(());
        };

        match self
            .ctx
            .persistence
            .append_message(room, identity, text)
            .await
        {
            Ok(stored) => {
                let message = ServerMessage::ChatMessage {
                    id: stored.id,
                    user_id: identity.id,
                    username: identity.username.clone(),
                    message: text.to_string(),
                    timestamp: stored.created_at,
                };
                self.ctx.registry.broadcast(room, &message, None);
            }
            Err(e) => {
                error!(
                    user_id = %identity.id,
                    room_id = %room,
                    error = %e,
                    "Failed to persist chat message, not broadcasting"
                );
                self.reply(ServerMessage::error(PERSIST_FAILED_NOTICE));
            }
        }
        Ok(())
    }

    fn signal(&self, identity: &Identity, frame: SignalFrame) {
        if self
            .ctx
            .registry
            .current_room(identity.id, &self.connection_id)
            .is_none()
        {
            debug!(user_id = %identity.id, "Dropping signal from a superseded connection");
            return;
        }
        self.ctx
            .registry
            .relay(frame.from_sender(identity.clone()));
    }

    fn reply(&self, message: ServerMessage) {
        if let Err(e) = self.outbound.try_send(message) {
            debug!(
                connection_id = %self.connection_id,
                error = %e,
                "Could not queue reply"
            );
        }
    }

    /// Leave the registry (if this connection still owns a session).
    /// Idempotent.
    pub fn close(&mut self) {
        if let ConnectionState::Active(identity) =
            std::mem::replace(&mut self.state, ConnectionState::Closed)
        {
            self.ctx
                .registry
                .unregister(identity.id, &self.connection_id);
        }
    }

    /// Drive the connection until the peer leaves, the handler asks to
    /// close, or the connection is cancelled (superseded, overflowed or
    /// server shutdown).
    pub async fn run<S: StreamMessage>(mut self, stream: &mut S) {
        info!(connection_id = %self.connection_id, "Connection opened");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    info!(connection_id = %self.connection_id, "Connection cancelled");
                    break;
                }

                frame = stream.recv() => {
                    match frame {
                        Some(Ok(message)) => match self.handle_message(message).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Close) => break,
                            Err(e) => {
                                warn!(
                                    connection_id = %self.connection_id,
                                    error = %e,
                                    "Dropping client frame"
                                );
                            }
                        },
                        Some(Err(e)) => {
                            warn!(
                                connection_id = %self.connection_id,
                                error = %e,
                                "Dropping client frame"
                            );
                        }
                        None => {
                            debug!(connection_id = %self.connection_id, "Client disconnected");
                            break;
                        }
                    }
                }
            }
        }

        self.close();
        info!(connection_id = %self.connection_id, "Connection closed");
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.close();
    }
}
