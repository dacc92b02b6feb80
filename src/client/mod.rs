//! The `client` module defines the server-side representation of one
//! connected client.
//!
//! It provides the `Connection` type, which owns the client's websocket, its
//! topic subscriptions and the single task that writes to it.

pub mod connection;

pub use connection::{ConnState, Connection, Termination};
