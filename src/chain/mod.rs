//! The `chain` module holds the upstream data model the relay forwards.
//!
//! Transactions and blocks are produced elsewhere (a transaction pool and a
//! chain follower); the relay only needs enough structure to serialize a
//! transaction batch and to pull the transaction hashes out of a new head.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// A 32-byte transaction or block hash, rendered as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub const LEN: usize = 32;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for TxHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

/// Error returned when a string is not a valid 32-byte hex hash.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid hash {input}: {source}")]
pub struct ParseHashError {
    input: String,
    source: hex::FromHexError,
}

impl FromStr for TxHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; Self::LEN];
        hex::decode_to_slice(digits, &mut out).map_err(|source| ParseHashError {
            input: s.to_string(),
            source,
        })?;
        Ok(Self(out))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A pending or included transaction as announced to subscribers.
///
/// Quantities are kept as the decimal/hex strings the producer hands over;
/// the relay never does arithmetic on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: TxHash,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// `None` for contract creation.
    pub to: Option<String>,
    pub value: String,
    pub gas: u64,
    pub gas_price: String,
    #[serde(default)]
    pub input: String,
}

impl Transaction {
    pub fn hash(&self) -> TxHash {
        self.hash
    }
}

/// A block observed as the new chain head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: TxHash,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Hashes of every transaction in the block, in block order.
    pub fn transaction_hashes(&self) -> Vec<TxHash> {
        self.transactions.iter().map(Transaction::hash).collect()
    }
}

/// A batch of transactions that just entered the pool.
#[derive(Debug, Clone)]
pub struct NewTxsEvent {
    pub txs: Vec<Transaction>,
}

/// A new canonical chain head.
#[derive(Debug, Clone)]
pub struct ChainHeadEvent {
    pub block: Arc<Block>,
}
