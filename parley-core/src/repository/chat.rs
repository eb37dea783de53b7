use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    models::{ChatMessage, RoomId, UserId, MAX_HISTORY_PAGE},
    Result,
};

/// Chat message repository for database operations
#[derive(Clone)]
pub struct ChatRepository {
    pool: PgPool,
}

impl ChatRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a message; id and timestamp are assigned by the database.
    pub async fn create(
        &self,
        room_id: RoomId,
        user_id: UserId,
        username: &str,
        content: &str,
    ) -> Result<ChatMessage> {
        let row = sqlx::query(
            r"
            INSERT INTO chat_messages (room_id, user_id, username, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, room_id, user_id, username, content, created_at
            ",
        )
        .bind(room_id)
        .bind(user_id)
        .bind(username)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_message(&row)
    }

    /// Most recent messages of a room, returned oldest first
    pub async fn list_recent(&self, room_id: RoomId, limit: i64) -> Result<Vec<ChatMessage>> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);

        let rows = sqlx::query(
            r"
            SELECT id, room_id, user_id, username, content, created_at
            FROM chat_messages
            WHERE room_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            ",
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    fn row_to_message(row: &PgRow) -> Result<ChatMessage> {
        Ok(ChatMessage {
            id: row.try_get("id")?,
            room_id: row.try_get("room_id")?,
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
