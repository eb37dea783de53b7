pub mod chat;
pub mod id;
pub mod identity;
pub mod room;

pub use chat::{ChatMessage, StoredMessage, MAX_HISTORY_PAGE};
pub use id::{MessageId, RoomId, UserId};
pub use identity::Identity;
pub use room::{normalize_room_name, CreateRoomRequest, Room, MAX_ROOM_NAME_LEN};
