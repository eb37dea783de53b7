pub mod connection;

pub use connection::{
    ConnectionHandler, Flow, RelayContext, RelaySettings, StreamMessage, AUTH_FAILED_NOTICE,
    PERSIST_FAILED_NOTICE,
};
