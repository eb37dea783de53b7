//! Frames the server sends to clients

use chrono::{DateTime, Utc};
use parley_core::models::{Identity, MessageId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of a `users-list` snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: UserId,
    pub username: String,
}

impl From<&Identity> for MemberInfo {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username.clone(),
        }
    }
}

/// Server -> client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Membership snapshot of the room the client is now in
    UsersList { users: Vec<MemberInfo> },

    #[serde(rename_all = "camelCase")]
    UserJoined { user_id: UserId, username: String },

    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: UserId, username: String },

    #[serde(rename_all = "camelCase")]
    ChatMessage {
        id: MessageId,
        user_id: UserId,
        username: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    WebrtcOffer {
        target_id: UserId,
        from_id: UserId,
        from_username: String,
        offer: Value,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    #[serde(rename_all = "camelCase")]
    WebrtcAnswer {
        target_id: UserId,
        from_id: UserId,
        from_username: String,
        answer: Value,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    #[serde(rename_all = "camelCase")]
    WebrtcIceCandidate {
        target_id: UserId,
        from_id: UserId,
        from_username: String,
        candidate: Value,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    Error { message: String },
}

impl ServerMessage {
    #[must_use]
    pub fn user_joined(identity: &Identity) -> Self {
        Self::UserJoined {
            user_id: identity.id,
            username: identity.username.clone(),
        }
    }

    #[must_use]
    pub fn user_left(identity: &Identity) -> Self {
        Self::UserLeft {
            user_id: identity.id,
            username: identity.username.clone(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The `type` tag, for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UsersList { .. } => "users-list",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::ChatMessage { .. } => "chat-message",
            Self::WebrtcOffer { .. } => "webrtc-offer",
            Self::WebrtcAnswer { .. } => "webrtc-answer",
            Self::WebrtcIceCandidate { .. } => "webrtc-ice-candidate",
            Self::Error { .. } => "error",
        }
    }
}

pub fn encode_server_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
