//! WebRTC signaling relay
//!
//! Offers, answers and ICE candidates are routed to exactly one target
//! session. Payloads are never inspected, and any other top-level fields of
//! the client frame are forwarded as they came. Per-pair ordering follows from
//! the sender's frames being handled one at a time and each target having a
//! single FIFO outbound queue.

use parley_core::models::{Identity, UserId};
use serde_json::{Map, Value};
use tracing::debug;

use crate::broadcast::{deliver, Delivery};
use crate::protocol::ServerMessage;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "webrtc-offer",
            Self::Answer => "webrtc-answer",
            Self::IceCandidate => "webrtc-ice-candidate",
        }
    }

    /// Field carrying the payload on the wire
    #[must_use]
    pub const fn payload_key(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "candidate",
        }
    }
}

/// Keys the server writes itself; an extra field with one of these names is dropped
const SERVER_KEYS: [&str; 4] = ["type", "targetId", "fromId", "fromUsername"];

/// One negotiation message on its way from `from` to `to`
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEnvelope {
    pub kind: SignalKind,
    pub from: Identity,
    pub to: UserId,
    pub payload: Value,
    /// Other top-level fields of the client frame
    pub extra: Map<String, Value>,
}

impl SignalEnvelope {
    #[must_use]
    pub fn new(kind: SignalKind, from: Identity, to: UserId, payload: Value) -> Self {
        Self {
            kind,
            from,
            to,
            payload,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// The frame the target receives: the payload plus who sent it
    #[must_use]
    pub fn into_server_message(self) -> ServerMessage {
        let Self {
            kind,
            from,
            to,
            payload,
            mut extra,
        } = self;
        extra.retain(|key, _| !SERVER_KEYS.contains(&key.as_str()) && key != kind.payload_key());
        match kind {
            SignalKind::Offer => ServerMessage::WebrtcOffer {
                target_id: to,
                from_id: from.id,
                from_username: from.username,
                offer: payload,
                extra,
            },
            SignalKind::Answer => ServerMessage::WebrtcAnswer {
                target_id: to,
                from_id: from.id,
                from_username: from.username,
                answer: payload,
                extra,
            },
            SignalKind::IceCandidate => ServerMessage::WebrtcIceCandidate {
                target_id: to,
                from_id: from.id,
                from_username: from.username,
                candidate: payload,
                extra,
            },
        }
    }
}

/// Result of a relay attempt. Never reported back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    /// No live session for the target
    TargetMissing,
    /// Target exists but its queue is closed or overflowed
    Dropped,
}

impl SessionRegistry {
    /// Forward `envelope` to its target session, and only to it
    pub fn relay(&self, envelope: SignalEnvelope) -> RelayOutcome {
        let kind = envelope.kind;
        let from = envelope.from.id;
        let to = envelope.to;

        let mut state = self.inner.lock();
        let Some(target) = state.sessions.get_mut(&to) else {
            debug!(
                from_id = %from,
                target_id = %to,
                signal = kind.as_str(),
                "Signaling target not connected, dropping"
            );
            return RelayOutcome::TargetMissing;
        };

        match deliver(target, envelope.into_server_message()) {
            Delivery::Delivered => {
                debug!(
                    from_id = %from,
                    target_id = %to,
                    signal = kind.as_str(),
                    "Signal relayed"
                );
                RelayOutcome::Delivered
            }
            Delivery::Overflowed | Delivery::Closed | Delivery::Skipped => RelayOutcome::Dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{drain, session};
    use parley_core::models::RoomId;
    use serde_json::json;

    fn alice() -> Identity {
        Identity::new(1, "alice")
    }

    #[test]
    fn test_relay_reaches_only_the_target() {
        let registry = SessionRegistry::new();
        let (a, mut a_rx) = session(1, "alice", 16);
        let (b, mut b_rx) = session(2, "bob", 16);
        let (c, mut c_rx) = session(3, "carol", 16);
        registry.register(a, RoomId::new(1));
        registry.register(b, RoomId::new(1));
        registry.register(c, RoomId::new(1));
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        let payload = json!({"type": "offer", "sdp": "v=0\r\n"});
        let outcome = registry.relay(SignalEnvelope::new(
            SignalKind::Offer,
            alice(),
            UserId::new(2),
            payload.clone(),
        ));
        assert_eq!(outcome, RelayOutcome::Delivered);

        assert_eq!(
            drain(&mut b_rx),
            vec![ServerMessage::WebrtcOffer {
                target_id: UserId::new(2),
                from_id: UserId::new(1),
                from_username: "alice".to_string(),
                offer: payload,
                extra: Map::new(),
            }]
        );
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut c_rx).is_empty());
    }

    #[test]
    fn test_relay_forwards_extra_fields() {
        let registry = SessionRegistry::new();
        let (b, mut b_rx) = session(2, "bob", 16);
        registry.register(b, RoomId::new(1));
        drain(&mut b_rx);

        let extra = json!({
            "callId": "c-1",
            "streams": ["mic"],
            "fromId": 99,
            "fromUsername": "mallory"
        });
        let Value::Object(extra) = extra else {
            unreachable!()
        };
        let envelope = SignalEnvelope::new(
            SignalKind::Offer,
            alice(),
            UserId::new(2),
            json!({"sdp": "v=0"}),
        )
        .with_extra(extra);
        assert_eq!(registry.relay(envelope), RelayOutcome::Delivered);

        let received = drain(&mut b_rx);
        assert_eq!(received.len(), 1);
        assert_eq!(
            serde_json::to_value(&received[0]).unwrap(),
            json!({
                "type": "webrtc-offer",
                "targetId": 2,
                "fromId": 1,
                "fromUsername": "alice",
                "offer": {"sdp": "v=0"},
                "callId": "c-1",
                "streams": ["mic"]
            })
        );
    }

    #[test]
    fn test_missing_target_is_silent() {
        let registry = SessionRegistry::new();
        let (a, mut a_rx) = session(1, "alice", 16);
        registry.register(a, RoomId::new(1));
        drain(&mut a_rx);

        let outcome = registry.relay(SignalEnvelope::new(
            SignalKind::IceCandidate,
            alice(),
            UserId::new(42),
            json!({"candidate": "x"}),
        ));
        assert_eq!(outcome, RelayOutcome::TargetMissing);
        assert!(drain(&mut a_rx).is_empty());
    }

    #[test]
    fn test_relay_works_across_rooms() {
        let registry = SessionRegistry::new();
        let (a, _a_rx) = session(1, "alice", 16);
        let (b, mut b_rx) = session(2, "bob", 16);
        registry.register(a, RoomId::new(1));
        registry.register(b, RoomId::new(5));
        drain(&mut b_rx);

        let outcome = registry.relay(SignalEnvelope::new(
            SignalKind::Answer,
            alice(),
            UserId::new(2),
            json!({"type": "answer"}),
        ));
        assert_eq!(outcome, RelayOutcome::Delivered);
        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[test]
    fn test_pair_order_is_preserved() {
        let registry = SessionRegistry::new();
        let (b, mut b_rx) = session(2, "bob", 64);
        registry.register(b, RoomId::new(1));
        drain(&mut b_rx);

        registry.relay(SignalEnvelope::new(
            SignalKind::Offer,
            alice(),
            UserId::new(2),
            json!({"seq": 0}),
        ));
        for seq in 1..=10 {
            registry.relay(SignalEnvelope::new(
                SignalKind::IceCandidate,
                alice(),
                UserId::new(2),
                json!({ "seq": seq }),
            ));
        }

        let received = drain(&mut b_rx);
        assert!(matches!(received[0], ServerMessage::WebrtcOffer { .. }));
        let seqs: Vec<i64> = received
            .iter()
            .filter_map(|m| match m {
                ServerMessage::WebrtcOffer { offer: p, .. }
                | ServerMessage::WebrtcIceCandidate { candidate: p, .. } => p["seq"].as_i64(),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, (0..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_overflowed_target_drops_later_signals() {
        let registry = SessionRegistry::new();
        // joined(self) and users-list fill the queue
        let (b, mut b_rx) = session(2, "bob", 2);
        registry.register(b, RoomId::new(1));

        let offer = SignalEnvelope::new(SignalKind::Offer, alice(), UserId::new(2), json!({}));
        assert_eq!(registry.relay(offer.clone()), RelayOutcome::Dropped);

        drain(&mut b_rx);
        let ice = SignalEnvelope::new(SignalKind::IceCandidate, alice(), UserId::new(2), json!({}));
        assert_eq!(registry.relay(ice), RelayOutcome::Dropped);
        assert!(drain(&mut b_rx).is_empty());
    }
}
