use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{RoomId, UserId};

/// Room metadata. Membership is derived from live sessions and never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

/// Longest accepted room name, in characters
pub const MAX_ROOM_NAME_LEN: usize = 32;

/// Trim and check a requested room name.
pub fn normalize_room_name(name: &str) -> crate::Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(crate::Error::InvalidInput("Room name required".to_string()));
    }
    if name.chars().count() > MAX_ROOM_NAME_LEN {
        return Err(crate::Error::InvalidInput(format!(
            "Room name must be at most {MAX_ROOM_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_room_name() {
        assert_eq!(normalize_room_name("  Lobby ").unwrap(), "Lobby");
        assert!(normalize_room_name("   ").is_err());
        assert!(normalize_room_name(&"x".repeat(MAX_ROOM_NAME_LEN + 1)).is_err());
    }
}
