//! Session registry and room index
//!
//! Both live behind one `parking_lot::Mutex`. Every operation that changes
//! membership also queues the resulting presence events while still holding
//! the lock, so no connection can observe a half-applied join or leave and
//! every recipient sees membership changes in the same order.
//!
//! Queuing never blocks: each session owns a bounded outbound channel and
//! is written to with `try_send` (see `broadcast`).

use indexmap::IndexSet;
use parking_lot::Mutex;
use parley_core::models::{Identity, RoomId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::{deliver, Delivery};
use crate::error::RegistryError;
use crate::protocol::{MemberInfo, ServerMessage};

/// Notice sent to a session that is replaced by a newer one
pub const SUPERSEDED_NOTICE: &str = "Signed in from another connection";

/// Identifies one physical connection. A user id outlives connections, so
/// registry mutations coming from a connection are keyed by both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(12))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the registry needs to reach one live connection
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub(crate) outbound: mpsc::Sender<ServerMessage>,
    pub(crate) cancel: CancellationToken,
}

impl SessionHandle {
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        identity: Identity,
        outbound: mpsc::Sender<ServerMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection_id,
            identity,
            outbound,
            cancel,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionEntry {
    pub(crate) handle: SessionHandle,
    pub(crate) room: RoomId,
    /// Set once the outbound queue overflowed. Nothing more is queued for
    /// this session; its connection is being torn down.
    pub(crate) overflowed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    pub(crate) sessions: HashMap<UserId, SessionEntry>,
    /// Members per room in join order. Empty rooms are removed.
    pub(crate) rooms: HashMap<RoomId, IndexSet<UserId>>,
}

impl RegistryState {
    fn is_live(&self, user_id: UserId, connection_id: &ConnectionId) -> bool {
        self.sessions
            .get(&user_id)
            .is_some_and(|entry| entry.handle.connection_id == *connection_id)
    }

    fn index_insert(&mut self, room: RoomId, user_id: UserId) {
        self.rooms.entry(room).or_default().insert(user_id);
    }

    fn index_remove(&mut self, room: RoomId, user_id: UserId) {
        if let Some(members) = self.rooms.get_mut(&room) {
            members.shift_remove(&user_id);
            if members.is_empty() {
                self.rooms.remove(&room);
                debug!(room_id = %room, "Room has no more members, removed");
            }
        }
    }

    pub(crate) fn snapshot(&self, room: RoomId) -> Vec<MemberInfo> {
        self.rooms
            .get(&room)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|user_id| self.sessions.get(user_id))
                    .map(|entry| MemberInfo::from(&entry.handle.identity))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn send_to(&mut self, user_id: UserId, message: ServerMessage) -> Delivery {
        match self.sessions.get_mut(&user_id) {
            Some(entry) => deliver(entry, message),
            None => Delivery::Skipped,
        }
    }

    fn send_snapshot(&mut self, user_id: UserId, room: RoomId) {
        let users = self.snapshot(room);
        self.send_to(user_id, ServerMessage::UsersList { users });
    }

    /// Drop a session and announce its departure to the room it was in
    fn evict(&mut self, user_id: UserId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(&user_id)?;
        self.index_remove(entry.room, user_id);
        self.broadcast(
            entry.room,
            &ServerMessage::user_left(&entry.handle.identity),
            Some(user_id),
        );
        Some(entry)
    }
}

/// Outcome of `SessionRegistry::register`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Connection of the session this registration replaced, if any
    pub superseded: Option<ConnectionId>,
}

/// Outcome of `SessionRegistry::switch_room`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomSwitch {
    Moved { from: RoomId, to: RoomId },
    /// Already in the requested room; only the snapshot was re-sent
    Unchanged,
}

/// Shared registry of live sessions, cloned into every connection task
#[derive(Clone, Default)]
pub struct SessionRegistry {
    pub(crate) inner: Arc<Mutex<RegistryState>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an authenticated session to `room`.
    ///
    /// An existing session for the same identity is superseded: it receives
    /// an error notice, its connection is cancelled and its room sees it
    /// leave. The room then receives `user-joined` (the new session
    /// included) and the new session receives the membership snapshot.
    pub fn register(&self, handle: SessionHandle, room: RoomId) -> Registration {
        let user_id = handle.identity.id;
        let identity = handle.identity.clone();
        let connection_id = handle.connection_id.clone();

        let mut state = self.inner.lock();

        let superseded = state.evict(user_id).map(|mut old| {
            deliver(&mut old, ServerMessage::error(SUPERSEDED_NOTICE));
            old.handle.cancel.cancel();
            info!(
                user_id = %user_id,
                old_connection_id = %old.handle.connection_id,
                connection_id = %connection_id,
                "Session superseded by a newer connection"
            );
            old.handle.connection_id
        });

        state.sessions.insert(
            user_id,
            SessionEntry {
                handle,
                room,
                overflowed: false,
            },
        );
        state.index_insert(room, user_id);
        state.broadcast(room, &ServerMessage::user_joined(&identity), None);
        state.send_snapshot(user_id, room);

        info!(
            user_id = %user_id,
            username = %identity.username,
            room_id = %room,
            connection_id = %connection_id,
            "Session registered"
        );

        Registration { superseded }
    }

    /// Move a live session to `to`.
    ///
    /// The old room sees `user-left` (the mover excluded), the new room sees
    /// `user-joined` and the mover gets the new room's snapshot.
    pub fn switch_room(
        &self,
        user_id: UserId,
        connection_id: &ConnectionId,
        to: RoomId,
    ) -> Result<RoomSwitch, RegistryError> {
        let mut state = self.inner.lock();

        let (from, identity) = match state.sessions.get(&user_id) {
            Some(entry) if entry.handle.connection_id == *connection_id => {
                (entry.room, entry.handle.identity.clone())
            }
            _ => return Err(RegistryError::NotRegistered(connection_id.to_string())),
        };

        if from == to {
            state.send_snapshot(user_id, to);
            return Ok(RoomSwitch::Unchanged);
        }

        state.index_remove(from, user_id);
        state.broadcast(from, &ServerMessage::user_left(&identity), Some(user_id));

        if let Some(entry) = state.sessions.get_mut(&user_id) {
            entry.room = to;
        }
        state.index_insert(to, user_id);
        state.broadcast(to, &ServerMessage::user_joined(&identity), None);
        state.send_snapshot(user_id, to);

        info!(
            user_id = %user_id,
            from_room = %from,
            to_room = %to,
            "Session switched room"
        );

        Ok(RoomSwitch::Moved { from, to })
    }

    /// Remove the session owned by `connection_id` and announce the
    /// departure to its room. A connection that was already superseded
    /// removes nothing. Returns the room the session was in.
    pub fn unregister(&self, user_id: UserId, connection_id: &ConnectionId) -> Option<RoomId> {
        let mut state = self.inner.lock();
        if !state.is_live(user_id, connection_id) {
            debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Connection closed without a live session"
            );
            return None;
        }

        let entry = state.evict(user_id)?;
        info!(
            user_id = %user_id,
            room_id = %entry.room,
            connection_id = %connection_id,
            "Session unregistered"
        );
        Some(entry.room)
    }

    /// Room of the session owned by `connection_id`, if it is still live
    #[must_use]
    pub fn current_room(&self, user_id: UserId, connection_id: &ConnectionId) -> Option<RoomId> {
        self.inner
            .lock()
            .sessions
            .get(&user_id)
            .filter(|entry| entry.handle.connection_id == *connection_id)
            .map(|entry| entry.room)
    }

    /// Members of `room` in join order
    #[must_use]
    pub fn members(&self, room: RoomId) -> Vec<MemberInfo> {
        self.inner.lock().snapshot(room)
    }

    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.inner.lock().sessions.contains_key(&user_id)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Number of non-empty rooms
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    /// Cancel every live connection. Used on shutdown; each connection task
    /// then unregisters itself.
    pub fn close_all(&self) -> usize {
        let state = self.inner.lock();
        for entry in state.sessions.values() {
            entry.handle.cancel.cancel();
        }
        state.sessions.len()
    }
}

#[cfg(test)]
impl RegistryState {
    /// Panics unless the room index is exactly the session set, with every
    /// session indexed under its own room once and no empty rooms.
    pub(crate) fn assert_consistent(&self) {
        let indexed: usize = self.rooms.values().map(IndexSet::len).sum();
        assert_eq!(indexed, self.sessions.len(), "index size != session count");

        for (room, members) in &self.rooms {
            assert!(!members.is_empty(), "empty room {room} left in index");
            for user_id in members {
                let entry = self
                    .sessions
                    .get(user_id)
                    .unwrap_or_else(|| panic!("orphaned index entry {user_id}"));
                assert_eq!(entry.room, *room, "user {user_id} indexed under wrong room");
            }
        }
        for (user_id, entry) in &self.sessions {
            assert_eq!(entry.handle.identity.id, *user_id);
            assert!(self.rooms.get(&entry.room).is_some_and(|m| m.contains(user_id)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{drain, session};
    use proptest::prelude::*;

    fn room(id: i64) -> RoomId {
        RoomId::new(id)
    }

    #[test]
    fn test_register_announces_and_snapshots() {
        let registry = SessionRegistry::new();
        let (alice, mut alice_rx) = session(1, "alice", 16);
        let (bob, mut bob_rx) = session(2, "bob", 16);

        registry.register(alice, room(1));
        assert_eq!(
            drain(&mut alice_rx),
            vec![
                ServerMessage::user_joined(&Identity::new(1, "alice")),
                ServerMessage::UsersList {
                    users: vec![MemberInfo::from(&Identity::new(1, "alice"))],
                },
            ]
        );

        registry.register(bob, room(1));
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerMessage::user_joined(&Identity::new(2, "bob"))]
        );
        let bob_messages = drain(&mut bob_rx);
        assert_eq!(
            bob_messages.last(),
            Some(&ServerMessage::UsersList {
                users: vec![
                    MemberInfo::from(&Identity::new(1, "alice")),
                    MemberInfo::from(&Identity::new(2, "bob")),
                ],
            })
        );

        assert_eq!(registry.session_count(), 2);
        assert_eq!(registry.room_count(), 1);
        registry.inner.lock().assert_consistent();
    }

    #[test]
    fn test_switch_room_moves_membership() {
        let registry = SessionRegistry::new();
        let (alice, mut alice_rx) = session(1, "alice", 16);
        let (bob, mut bob_rx) = session(2, "bob", 16);
        let (carol, mut carol_rx) = session(3, "carol", 16);
        let alice_conn = alice.connection_id.clone();

        registry.register(alice, room(1));
        registry.register(bob, room(1));
        registry.register(carol, room(2));
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        let switch = registry
            .switch_room(UserId::new(1), &alice_conn, room(2))
            .unwrap();
        assert_eq!(
            switch,
            RoomSwitch::Moved {
                from: room(1),
                to: room(2)
            }
        );

        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerMessage::user_left(&Identity::new(1, "alice"))]
        );
        assert_eq!(
            drain(&mut carol_rx),
            vec![ServerMessage::user_joined(&Identity::new(1, "alice"))]
        );

        let alice_messages = drain(&mut alice_rx);
        assert!(!alice_messages
            .iter()
            .any(|m| matches!(m, ServerMessage::UserLeft { .. })));
        assert!(matches!(
            alice_messages.last(),
            Some(ServerMessage::UsersList { users }) if users.len() == 2
        ));

        assert_eq!(registry.current_room(UserId::new(1), &alice_conn), Some(room(2)));
        registry.inner.lock().assert_consistent();
    }

    #[test]
    fn test_switch_to_current_room_only_resends_snapshot() {
        let registry = SessionRegistry::new();
        let (alice, mut alice_rx) = session(1, "alice", 16);
        let (bob, mut bob_rx) = session(2, "bob", 16);
        let alice_conn = alice.connection_id.clone();
        registry.register(alice, room(1));
        registry.register(bob, room(1));
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let switch = registry
            .switch_room(UserId::new(1), &alice_conn, room(1))
            .unwrap();
        assert_eq!(switch, RoomSwitch::Unchanged);
        assert!(drain(&mut bob_rx).is_empty());
        assert!(matches!(
            drain(&mut alice_rx).as_slice(),
            [ServerMessage::UsersList { .. }]
        ));
    }

    #[test]
    fn test_unregister_announces_to_room_only() {
        let registry = SessionRegistry::new();
        let (alice, mut alice_rx) = session(1, "alice", 16);
        let (bob, mut bob_rx) = session(2, "bob", 16);
        let (carol, mut carol_rx) = session(3, "carol", 16);
        let bob_conn = bob.connection_id.clone();
        registry.register(alice, room(1));
        registry.register(bob, room(1));
        registry.register(carol, room(2));
        drain(&mut alice_rx);
        drain(&mut carol_rx);

        assert_eq!(registry.unregister(UserId::new(2), &bob_conn), Some(room(1)));
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerMessage::user_left(&Identity::new(2, "bob"))]
        );
        assert!(drain(&mut carol_rx).is_empty());
        assert!(!registry.is_online(UserId::new(2)));

        // second close of the same connection is a no-op
        assert_eq!(registry.unregister(UserId::new(2), &bob_conn), None);
        drop(bob_rx);
        registry.inner.lock().assert_consistent();
    }

    #[test]
    fn test_second_session_supersedes_first() {
        let registry = SessionRegistry::new();
        let (first, mut first_rx) = session(1, "alice", 16);
        let (watcher, mut watcher_rx) = session(2, "bob", 16);
        let first_conn = first.connection_id.clone();
        let first_cancel = first.cancel.clone();
        registry.register(first, room(1));
        registry.register(watcher, room(1));
        drain(&mut first_rx);
        drain(&mut watcher_rx);

        let (second, mut second_rx) = session(1, "alice", 16);
        let second_conn = second.connection_id.clone();
        let registration = registry.register(second, room(3));
        assert_eq!(registration.superseded, Some(first_conn.clone()));

        assert!(first_cancel.is_cancelled());
        assert_eq!(
            drain(&mut first_rx),
            vec![ServerMessage::error(SUPERSEDED_NOTICE)]
        );
        assert_eq!(
            drain(&mut watcher_rx),
            vec![ServerMessage::user_left(&Identity::new(1, "alice"))]
        );
        assert!(matches!(
            drain(&mut second_rx).last(),
            Some(ServerMessage::UsersList { .. })
        ));

        // cleanup of the old connection must not touch the new session
        assert_eq!(registry.unregister(UserId::new(1), &first_conn), None);
        assert_eq!(registry.current_room(UserId::new(1), &second_conn), Some(room(3)));
        assert_eq!(registry.current_room(UserId::new(1), &first_conn), None);
        assert!(registry
            .switch_room(UserId::new(1), &first_conn, room(1))
            .is_err());
        assert_eq!(registry.session_count(), 2);
        registry.inner.lock().assert_consistent();
    }

    #[test]
    fn test_close_all_cancels_every_session() {
        let registry = SessionRegistry::new();
        let (alice, _alice_rx) = session(1, "alice", 4);
        let (bob, _bob_rx) = session(2, "bob", 4);
        let tokens = [alice.cancel.clone(), bob.cancel.clone()];
        registry.register(alice, room(1));
        registry.register(bob, room(2));

        assert_eq!(registry.close_all(), 2);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Connect { user: i64, room: i64 },
        Switch { user: i64, room: i64 },
        Close { user: i64 },
        // a connection that was already superseded closing late
        StaleClose { user: i64 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let user = 1i64..=8;
        let room = 1i64..=4;
        prop_oneof![
            (user.clone(), room.clone()).prop_map(|(user, room)| Op::Connect { user, room }),
            (user.clone(), room).prop_map(|(user, room)| Op::Switch { user, room }),
            user.clone().prop_map(|user| Op::Close { user }),
            user.prop_map(|user| Op::StaleClose { user }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_operation_sequences_keep_index_consistent(
            ops in proptest::collection::vec(op_strategy(), 1..200)
        ) {
            let registry = SessionRegistry::new();
            // per user: current connection id; receivers stay alive
            let mut live: HashMap<i64, ConnectionId> = HashMap::new();
            let mut receivers = Vec::new();

            for op in ops {
                match op {
                    Op::Connect { user, room: target } => {
                        let (handle, rx) = session(user, &format!("user{user}"), 64);
                        live.insert(user, handle.connection_id.clone());
                        receivers.push(rx);
                        registry.register(handle, room(target));
                    }
                    Op::Switch { user, room: target } => {
                        if let Some(conn) = live.get(&user) {
                            prop_assert!(registry
                                .switch_room(UserId::new(user), conn, room(target))
                                .is_ok());
                        }
                    }
                    Op::Close { user } => {
                        if let Some(conn) = live.remove(&user) {
                            prop_assert!(registry.unregister(UserId::new(user), &conn).is_some());
                        }
                    }
                    Op::StaleClose { user } => {
                        let stale = ConnectionId::generate();
                        prop_assert_eq!(registry.unregister(UserId::new(user), &stale), None);
                    }
                }

                for rx in &mut receivers {
                    drain(rx);
                }
                registry.inner.lock().assert_consistent();
                prop_assert_eq!(registry.session_count(), live.len());
            }
        }
    }
}
