//! Shared fixtures for unit tests

use parley_core::models::Identity;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::ServerMessage;
use crate::registry::{ConnectionId, SessionHandle};

/// A session handle with a fresh connection id and its receiving end
pub fn session(id: i64, username: &str, buffer: usize) -> (SessionHandle, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(buffer);
    let handle = SessionHandle::new(
        ConnectionId::generate(),
        Identity::new(id, username),
        tx,
        CancellationToken::new(),
    );
    (handle, rx)
}

/// Everything currently queued
pub fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}
