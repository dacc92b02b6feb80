//! The `transport` module is responsible for the client-facing side of the
//! relay: the inbound request format and the websocket listener that admits
//! new connections.

pub mod message;
pub mod websocket;

pub use message::{ClientOp, Request};
pub use websocket::Server;
