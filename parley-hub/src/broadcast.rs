//! Room fan-out
//!
//! Delivery is a non-blocking `try_send` into each recipient's bounded
//! outbound queue. A recipient whose queue is full is marked overflowed and
//! its connection cancelled; it receives nothing further, so a frame that
//! was dropped for it can never be overtaken by a later one.

use parley_core::models::{RoomId, UserId};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::protocol::ServerMessage;
use crate::registry::{RegistryState, SessionEntry, SessionRegistry};

/// Result of queuing one message for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Queue full; the session is now being disconnected
    Overflowed,
    /// Receiver already gone (connection mid-close)
    Closed,
    /// Session had overflowed earlier, or does not exist
    Skipped,
}

/// Per-broadcast delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

pub(crate) fn deliver(entry: &mut SessionEntry, message: ServerMessage) -> Delivery {
    if entry.overflowed {
        return Delivery::Skipped;
    }

    let kind = message.kind();
    match entry.handle.outbound.try_send(message) {
        Ok(()) => Delivery::Delivered,
        Err(TrySendError::Full(_)) => {
            entry.overflowed = true;
            entry.handle.cancel.cancel();
            warn!(
                user_id = %entry.handle.identity.id,
                connection_id = %entry.handle.connection_id,
                message_type = kind,
                "Outbound queue full, disconnecting slow client"
            );
            Delivery::Overflowed
        }
        Err(TrySendError::Closed(_)) => {
            debug!(
                user_id = %entry.handle.identity.id,
                connection_id = %entry.handle.connection_id,
                message_type = kind,
                "Outbound queue closed, skipping"
            );
            Delivery::Closed
        }
    }
}

impl RegistryState {
    pub(crate) fn broadcast(
        &mut self,
        room: RoomId,
        message: &ServerMessage,
        exclude: Option<UserId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let Self { sessions, rooms } = self;
        let Some(members) = rooms.get(&room) else {
            return report;
        };

        for user_id in members {
            if Some(*user_id) == exclude {
                continue;
            }
            let Some(entry) = sessions.get_mut(user_id) else {
                continue;
            };
            match deliver(entry, message.clone()) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Overflowed | Delivery::Closed | Delivery::Skipped => report.failed += 1,
            }
        }

        debug!(
            room_id = %room,
            message_type = message.kind(),
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast complete"
        );
        report
    }
}

impl SessionRegistry {
    /// Queue `message` for every member of `room` except `exclude`.
    /// A failed recipient never stops delivery to the others.
    pub fn broadcast(
        &self,
        room: RoomId,
        message: &ServerMessage,
        exclude: Option<UserId>,
    ) -> BroadcastReport {
        self.inner.lock().broadcast(room, message, exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{drain, session};
    use parley_core::models::Identity;

    fn notice(text: &str) -> ServerMessage {
        ServerMessage::error(text)
    }

    #[test]
    fn test_broadcast_respects_exclude_and_rooms() {
        let registry = SessionRegistry::new();
        let (alice, mut alice_rx) = session(1, "alice", 16);
        let (bob, mut bob_rx) = session(2, "bob", 16);
        let (carol, mut carol_rx) = session(3, "carol", 16);
        registry.register(alice, RoomId::new(1));
        registry.register(bob, RoomId::new(1));
        registry.register(carol, RoomId::new(2));
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        let report = registry.broadcast(RoomId::new(1), &notice("x"), Some(UserId::new(1)));
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 0 });
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![notice("x")]);
        assert!(drain(&mut carol_rx).is_empty());

        let report = registry.broadcast(RoomId::new(9), &notice("y"), None);
        assert_eq!(report, BroadcastReport::default());
    }

    #[test]
    fn test_one_failed_recipient_does_not_block_the_rest() {
        let registry = SessionRegistry::new();
        let mut receivers = Vec::new();
        for id in 1..=5 {
            let (handle, rx) = session(id, &format!("user{id}"), 16);
            registry.register(handle, RoomId::new(1));
            receivers.push(rx);
        }
        for rx in &mut receivers {
            drain(rx);
        }

        // user 3 goes away without unregistering
        let gone = receivers.remove(2);
        drop(gone);

        let report = registry.broadcast(RoomId::new(1), &notice("hello"), None);
        assert_eq!(report, BroadcastReport { delivered: 4, failed: 1 });
        for rx in &mut receivers {
            assert_eq!(drain(rx), vec![notice("hello")]);
        }
    }

    #[test]
    fn test_full_queue_evicts_without_reordering() {
        let registry = SessionRegistry::new();
        let (slow, mut slow_rx) = session(1, "slow", 3);
        let slow_cancel = slow.cancel.clone();
        let (fast, mut fast_rx) = session(2, "fast", 64);
        registry.register(slow, RoomId::new(1));
        registry.register(fast, RoomId::new(1));
        drain(&mut fast_rx);

        // slow holds user-joined(self), users-list, user-joined(fast): full
        let report = registry.broadcast(RoomId::new(1), &notice("1"), None);
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert!(slow_cancel.is_cancelled());

        // a freed slot must not let a later message through
        assert_eq!(slow_rx.try_recv().ok().map(|m| m.kind()), Some("user-joined"));
        registry.broadcast(RoomId::new(1), &notice("2"), None);

        let rest = drain(&mut slow_rx);
        assert!(!rest.contains(&notice("2")));
        assert!(!rest.contains(&notice("1")));
        assert_eq!(drain(&mut fast_rx), vec![notice("1"), notice("2")]);

        let joined = ServerMessage::user_joined(&Identity::new(2, "fast"));
        assert!(rest.contains(&joined));
    }
}
