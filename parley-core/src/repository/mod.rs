pub mod chat;
pub mod room;

pub use chat::ChatRepository;
pub use room::RoomRepository;
