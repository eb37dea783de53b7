//! Frames a client may send, and the boundary decoder for them

use parley_core::models::{Identity, RoomId, UserId};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::signaling::{SignalEnvelope, SignalKind};

/// Client -> server messages
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Auth {
        token: String,
        #[serde(default)]
        room_id: Option<RoomId>,
    },

    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomId },

    ChatMessage { message: String },

    /// Top-level fields besides the target and payload ride along in `extra`
    #[serde(rename_all = "camelCase")]
    WebrtcOffer {
        target_id: UserId,
        offer: Value,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    #[serde(rename_all = "camelCase")]
    WebrtcAnswer {
        target_id: UserId,
        answer: Value,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    #[serde(rename_all = "camelCase")]
    WebrtcIceCandidate {
        target_id: UserId,
        candidate: Value,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

/// A decoded signaling frame that has not been attributed to a sender yet
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFrame {
    pub kind: SignalKind,
    pub target: UserId,
    pub payload: Value,
    pub extra: Map<String, Value>,
}

impl SignalFrame {
    #[must_use]
    pub fn from_sender(self, from: Identity) -> SignalEnvelope {
        SignalEnvelope::new(self.kind, from, self.target, self.payload).with_extra(self.extra)
    }
}

impl ClientMessage {
    /// Every `type` value a client may send
    pub const KINDS: [&'static str; 6] = [
        "auth",
        "join-room",
        "chat-message",
        "webrtc-offer",
        "webrtc-answer",
        "webrtc-ice-candidate",
    ];

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::JoinRoom { .. } => "join-room",
            Self::ChatMessage { .. } => "chat-message",
            Self::WebrtcOffer { .. } => "webrtc-offer",
            Self::WebrtcAnswer { .. } => "webrtc-answer",
            Self::WebrtcIceCandidate { .. } => "webrtc-ice-candidate",
        }
    }

    /// `None` for anything that is not a signaling frame
    #[must_use]
    pub fn into_signal(self) -> Option<SignalFrame> {
        let (kind, target, payload, extra) = match self {
            Self::WebrtcOffer {
                target_id,
                offer,
                extra,
            } => (SignalKind::Offer, target_id, offer, extra),
            Self::WebrtcAnswer {
                target_id,
                answer,
                extra,
            } => (SignalKind::Answer, target_id, answer, extra),
            Self::WebrtcIceCandidate {
                target_id,
                candidate,
                extra,
            } => (SignalKind::IceCandidate, target_id, candidate, extra),
            Self::Auth { .. } | Self::JoinRoom { .. } | Self::ChatMessage { .. } => return None,
        };
        Some(SignalFrame {
            kind,
            target,
            payload,
            extra,
        })
    }
}

/// Decode one text frame.
///
/// Distinguishes frames that are not JSON objects, frames without a type,
/// unknown types and known types with bad fields, so the caller can log
/// something useful before dropping the frame.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(ProtocolError::Malformed("expected a JSON object".to_string()));
    }
    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(ProtocolError::MissingType),
    };

    if !ClientMessage::KINDS.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
        kind,
        reason: e.to_string(),
    })
}
