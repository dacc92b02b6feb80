//! The `broker` module is the relay core: the closed topic set, the outbound
//! packet model, the upstream event sources and the `Registry` that routes
//! events to subscribed connections.

pub mod engine;
pub mod message;
pub mod source;
pub mod topic;

pub use engine::Registry;
pub use message::{Packet, PacketType, ResponsePacket};
pub use topic::Topic;
