//! Room metadata and chat history

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use parley_core::models::{
    normalize_room_name, ChatMessage, CreateRoomRequest, MessageId, Room, RoomId, UserId,
};
use serde::{Deserialize, Serialize};

use super::{middleware::AuthUser, AppResult, AppState};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub id: RoomId,
    pub name: String,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    /// Sessions currently in the room
    pub online: usize,
}

impl RoomResponse {
    fn new(room: Room, online: usize) -> Self {
        Self {
            id: room.id,
            name: room.name,
            created_by: room.created_by,
            created_at: room.created_at,
            online,
        }
    }
}

/// Same shape as the live `chat-message` event, minus the tag
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<ChatMessage> for MessageResponse {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id,
            room_id: message.room_id,
            user_id: message.user_id,
            username: message.username,
            message: message.content,
            timestamp: message.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// List all rooms with their live member counts
pub async fn list_rooms(State(state): State<AppState>) -> AppResult<Json<Vec<RoomResponse>>> {
    let rooms = state.relay.persistence.list_rooms().await?;
    let registry = &state.relay.registry;

    Ok(Json(
        rooms
            .into_iter()
            .map(|room| {
                let online = registry.members(room.id).len();
                RoomResponse::new(room, online)
            })
            .collect(),
    ))
}

/// Create a room owned by the caller
pub async fn create_room(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> AppResult<(StatusCode, Json<RoomResponse>)> {
    let name = normalize_room_name(&req.name)?;
    let room = state
        .relay
        .persistence
        .create_room(&name, Some(identity.id))
        .await?;

    tracing::info!(
        room_id = %room.id,
        user_id = %identity.id,
        name = %room.name,
        "Room created"
    );

    Ok((StatusCode::CREATED, Json(RoomResponse::new(room, 0))))
}

/// Recent chat history of a room, oldest first
pub async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<MessageResponse>>> {
    let limit = query.limit.unwrap_or(state.history_limit);
    let messages = state
        .relay
        .persistence
        .list_recent_messages(room_id, limit)
        .await?;

    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}
