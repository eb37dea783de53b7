//! Chat history and room metadata storage
//!
//! The relay only needs the narrow `PersistenceService` contract. Two
//! implementations are provided: `PgPersistence` on top of the sqlx
//! repositories, and `MemoryPersistence` for single-process deployments
//! without a database and for tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::{
    models::{ChatMessage, Identity, MessageId, Room, RoomId, StoredMessage, UserId, MAX_HISTORY_PAGE},
    repository::{ChatRepository, RoomRepository},
    Error, Result,
};

/// Name of the room every store starts with
pub const DEFAULT_ROOM_NAME: &str = "General";

#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Store a chat message and return its server-assigned id and timestamp.
    ///
    /// `room_id` need not name a room from `list_rooms`: clients may join
    /// any room id, and chat there is stored like anywhere else.
    async fn append_message(
        &self,
        room_id: RoomId,
        author: &Identity,
        text: &str,
    ) -> Result<StoredMessage>;

    /// Up to `limit` most recent messages of a room, oldest first.
    async fn list_recent_messages(&self, room_id: RoomId, limit: i64) -> Result<Vec<ChatMessage>>;

    async fn list_rooms(&self) -> Result<Vec<Room>>;

    async fn create_room(&self, name: &str, owner: Option<UserId>) -> Result<Room>;
}

/// PostgreSQL-backed persistence
#[derive(Clone)]
pub struct PgPersistence {
    rooms: RoomRepository,
    chat: ChatRepository,
}

impl PgPersistence {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            rooms: RoomRepository::new(pool.clone()),
            chat: ChatRepository::new(pool),
        }
    }
}

#[async_trait]
impl PersistenceService for PgPersistence {
    async fn append_message(
        &self,
        room_id: RoomId,
        author: &Identity,
        text: &str,
    ) -> Result<StoredMessage> {
        let message = self
            .chat
            .create(room_id, author.id, &author.username, text)
            .await?;
        Ok(StoredMessage::from(&message))
    }

    async fn list_recent_messages(&self, room_id: RoomId, limit: i64) -> Result<Vec<ChatMessage>> {
        self.chat.list_recent(room_id, limit).await
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.rooms.list().await
    }

    async fn create_room(&self, name: &str, owner: Option<UserId>) -> Result<Room> {
        self.rooms.create(name, owner).await
    }
}

#[derive(Default)]
struct MemoryState {
    rooms: Vec<Room>,
    messages: HashMap<RoomId, Vec<ChatMessage>>,
    next_room_id: i64,
    next_message_id: i64,
}

/// In-process persistence with the same contract as the database store.
/// Contents are lost on restart.
pub struct MemoryPersistence {
    state: Mutex<MemoryState>,
}

impl MemoryPersistence {
    /// Create a store seeded with the default room (id 1).
    #[must_use]
    pub fn new() -> Self {
        let general = Room {
            id: RoomId::new(1),
            name: DEFAULT_ROOM_NAME.to_string(),
            created_by: None,
            created_at: Utc::now(),
        };
        Self {
            state: Mutex::new(MemoryState {
                rooms: vec![general],
                messages: HashMap::new(),
                next_room_id: 2,
                next_message_id: 1,
            }),
        }
    }

    #[must_use]
    pub fn message_count(&self, room_id: RoomId) -> usize {
        self.state
            .lock()
            .messages
            .get(&room_id)
            .map_or(0, Vec::len)
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceService for MemoryPersistence {
    async fn append_message(
        &self,
        room_id: RoomId,
        author: &Identity,
        text: &str,
    ) -> Result<StoredMessage> {
        let mut state = self.state.lock();
        let id = MessageId::new(state.next_message_id);
        state.next_message_id += 1;

        let message = ChatMessage {
            id,
            room_id,
            user_id: author.id,
            username: author.username.clone(),
            content: text.to_string(),
            created_at: Utc::now(),
        };
        let stored = StoredMessage::from(&message);
        state.messages.entry(room_id).or_default().push(message);
        Ok(stored)
    }

    async fn list_recent_messages(&self, room_id: RoomId, limit: i64) -> Result<Vec<ChatMessage>> {
        let limit = usize::try_from(limit.clamp(1, MAX_HISTORY_PAGE)).unwrap_or(1);
        let state = self.state.lock();
        let messages = state.messages.get(&room_id).map_or(&[][..], Vec::as_slice);
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        Ok(self.state.lock().rooms.clone())
    }

    async fn create_room(&self, name: &str, owner: Option<UserId>) -> Result<Room> {
        let mut state = self.state.lock();
        if state.rooms.iter().any(|room| room.name == name) {
            return Err(Error::AlreadyExists("Room already exists".to_string()));
        }

        let room = Room {
            id: RoomId::new(state.next_room_id),
            name: name.to_string(),
            created_by: owner,
            created_at: Utc::now(),
        };
        state.next_room_id += 1;
        state.rooms.push(room.clone());
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::new(1, "alice")
    }

    #[tokio::test]
    async fn test_seeded_with_default_room() {
        let store = MemoryPersistence::new();
        let rooms = store.list_rooms().await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, RoomId::new(1));
        assert_eq!(rooms[0].name, DEFAULT_ROOM_NAME);
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryPersistence::new();
        let first = store.append_message(RoomId::new(1), &alice(), "one").await.unwrap();
        let second = store.append_message(RoomId::new(1), &alice(), "two").await.unwrap();
        assert!(second.id > first.id);
        assert!(second.created_at >= first.created_at);
    }

    #[tokio::test]
    async fn test_recent_messages_are_oldest_first_and_limited() {
        let store = MemoryPersistence::new();
        for i in 0..5 {
            store
                .append_message(RoomId::new(1), &alice(), &format!("m{i}"))
                .await
                .unwrap();
        }
        store.append_message(RoomId::new(2), &alice(), "elsewhere").await.unwrap();

        let recent = store.list_recent_messages(RoomId::new(1), 3).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, ["m2", "m3", "m4"]);
        assert!(store
            .list_recent_messages(RoomId::new(3), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_chat_in_unlisted_room_is_stored() {
        let store = MemoryPersistence::new();
        let room = RoomId::new(4242);
        assert!(store.list_rooms().await.unwrap().iter().all(|r| r.id != room));

        store.append_message(room, &alice(), "hi").await.unwrap();
        let history = store.list_recent_messages(room, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].room_id, room);
        assert_eq!(store.list_rooms().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_room_rejects_duplicates() {
        let store = MemoryPersistence::new();
        let room = store.create_room("Music", Some(UserId::new(1))).await.unwrap();
        assert_eq!(room.id, RoomId::new(2));
        assert_eq!(room.created_by, Some(UserId::new(1)));

        assert!(matches!(
            store.create_room("Music", None).await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            store.create_room(DEFAULT_ROOM_NAME, None).await,
            Err(Error::AlreadyExists(_))
        ));
    }
}
