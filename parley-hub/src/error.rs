//! Error types for the relay hub

use thiserror::Error;

/// A client frame that cannot be acted on. The frame is dropped and the
/// connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Frame has no \"type\" field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} message: {reason}")]
    InvalidFields { kind: String, reason: String },

    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(&'static str),

    #[error("{kind} is not allowed {state}")]
    WrongState {
        kind: &'static str,
        state: &'static str,
    },

    #[error("Invalid chat message: {0}")]
    InvalidChat(String),
}

/// Registry operation against a session that is no longer the live one
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection {0} has no live session")]
    NotRegistered(String),
}
