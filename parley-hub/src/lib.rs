//! In-memory session registry, room fan-out and WebRTC signaling relay.

pub mod broadcast;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod signaling;

#[cfg(test)]
mod test_helpers;

pub use broadcast::{BroadcastReport, Delivery};
pub use error::{ProtocolError, RegistryError};
pub use protocol::{ClientMessage, MemberInfo, ServerMessage, SignalFrame};
pub use registry::{ConnectionId, Registration, RoomSwitch, SessionHandle, SessionRegistry};
pub use signaling::{RelayOutcome, SignalEnvelope, SignalKind};
