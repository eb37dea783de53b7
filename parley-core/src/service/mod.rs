pub mod identity;
pub mod persistence;

pub use identity::{Claims, IdentityService, JwtIdentityService};
pub use persistence::{MemoryPersistence, PersistenceService, PgPersistence, DEFAULT_ROOM_NAME};
