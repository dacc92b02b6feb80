//! # txannounce
//!
//! `txannounce` is an in-memory websocket relay for chain events. Clients
//! subscribe to named topics and receive every event of that topic that the
//! upstream sources produce while they stay connected.
//!
//! ## Core Modules
//!
//! - `broker`: topics, outbound packets, upstream sources and the `Registry`
//!   that dispatches events to subscribed connections.
//! - `chain`: the transaction and block model carried by the events.
//! - `client`: the per-client `Connection` with its sender task and receive loop.
//! - `config`: loading the server configuration.
//! - `service`: `AnnounceServer`, which ties sources, registry and listener together.
//! - `transport`: inbound request format and the websocket listener.
//! - `utils`: error type and logging setup.
//!
//! Delivery is best effort and at most once per connection. Nothing is
//! persisted or replayed.

pub mod broker;
pub mod chain;
pub mod client;
pub mod config;
pub mod service;
pub mod transport;
pub mod utils;

pub use service::AnnounceServer;

#[cfg(test)]
mod tests;
