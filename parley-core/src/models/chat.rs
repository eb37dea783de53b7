use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{MessageId, RoomId, UserId};

/// Persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Server-assigned parts of a freshly stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
}

impl From<&ChatMessage> for StoredMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            id: message.id,
            created_at: message.created_at,
        }
    }
}

/// Hard cap on a single history page
pub const MAX_HISTORY_PAGE: i64 = 100;
