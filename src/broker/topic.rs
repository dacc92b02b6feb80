use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::utils::RelayError;

/// A category of events a connection can subscribe to.
///
/// The set is closed: anything outside it is rejected at subscription time,
/// never silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Batches of transactions entering the pool.
    NewTx,
    /// Hashes of the transactions included in a new chain head.
    BlockedTxHashes,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::NewTx, Topic::BlockedTxHashes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::NewTx => "newTx",
            Topic::BlockedTxHashes => "blockedTxHashes",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Topic::NewTx => 0b01,
            Topic::BlockedTxHashes => 0b10,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RelayError::UnknownTopic(s.to_string()))
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The set of topics one connection is subscribed to.
///
/// Only the connection's own receive task writes it; the dispatcher reads it
/// concurrently, so membership is kept in a single atomic bitmask.
#[derive(Debug, Default)]
pub struct Subscriptions {
    bits: AtomicU8,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the topic. Subscribing twice has no further effect.
    pub fn insert(&self, topic: Topic) {
        self.bits.fetch_or(topic.bit(), Ordering::AcqRel);
    }

    /// Removes the topic. Removing an absent topic has no effect.
    pub fn remove(&self, topic: Topic) {
        self.bits.fetch_and(!topic.bit(), Ordering::AcqRel);
    }

    pub fn contains(&self, topic: Topic) -> bool {
        self.bits.load(Ordering::Acquire) & topic.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits.load(Ordering::Acquire) == 0
    }

    pub fn topics(&self) -> Vec<Topic> {
        Topic::ALL
            .into_iter()
            .filter(|t| self.contains(*t))
            .collect()
    }
}
