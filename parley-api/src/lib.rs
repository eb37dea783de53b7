// Parley API Library
//
// WebSocket relay endpoint and the small REST surface around it

pub mod http;
pub mod impls;

// Re-export commonly used types
pub use http::{create_router, AppState};
pub use impls::{RelayContext, RelaySettings};
