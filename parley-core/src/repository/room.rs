use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    models::{Room, RoomId, UserId},
    Result,
};

/// Room repository for database operations
#[derive(Clone)]
pub struct RoomRepository {
    pool: PgPool,
}

impl RoomRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a room. A duplicate name surfaces as `Error::AlreadyExists`.
    pub async fn create(&self, name: &str, created_by: Option<UserId>) -> Result<Room> {
        let row = sqlx::query(
            r"
            INSERT INTO rooms (name, created_by)
            VALUES ($1, $2)
            RETURNING id, name, created_by, created_at
            ",
        )
        .bind(name)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_room(&row)
    }

    /// All rooms in creation order
    pub async fn list(&self) -> Result<Vec<Room>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, created_by, created_at
            FROM rooms
            ORDER BY created_at, id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_room).collect()
    }

    pub async fn get(&self, room_id: RoomId) -> Result<Option<Room>> {
        let row = sqlx::query(
            r"
            SELECT id, name, created_by, created_at
            FROM rooms
            WHERE id = $1
            ",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_room).transpose()
    }

    fn row_to_room(row: &PgRow) -> Result<Room> {
        Ok(Room {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
