//! JSON wire protocol
//!
//! One JSON object per WebSocket text frame, discriminated by `"type"`.
//! Client frames are decoded once at the boundary into [`ClientMessage`];
//! everything past that point matches on the enum.

pub mod client;
pub mod server;

pub use client::{decode_client_message, ClientMessage, SignalFrame};
pub use server::{encode_server_message, MemberInfo, ServerMessage};
