use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::chain::{Transaction, TxHash};
use crate::utils::RelayError;

/// Discriminant of an outbound packet, sent on the wire as the integer `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Transactions = 0,
    BlockedTxHashes = 1,
    Response = 2,
}

impl TryFrom<u8> for PacketType {
    type Error = RelayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Transactions),
            1 => Ok(PacketType::BlockedTxHashes),
            2 => Ok(PacketType::Response),
            other => Err(RelayError::UnknownPacketType(other)),
        }
    }
}

/// Answer to a single client request.
///
/// `id` echoes the correlation id the client chose, so responses can be
/// matched to requests that are still in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePacket {
    pub id: i64,
    pub ok: bool,
    pub message: String,
}

/// Everything the server pushes to a client.
///
/// Serialized as `{"T": <type>, "Data": <payload>}`. Each packet owns its
/// payload, so any packet can be encoded on its own.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawPacket")]
pub enum Packet {
    Transactions(Vec<Transaction>),
    BlockedTxHashes(Vec<TxHash>),
    Response(ResponsePacket),
}

impl Packet {
    pub fn response(id: i64, ok: bool, message: impl Into<String>) -> Self {
        Packet::Response(ResponsePacket {
            id,
            ok,
            message: message.into(),
        })
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Transactions(_) => PacketType::Transactions,
            Packet::BlockedTxHashes(_) => PacketType::BlockedTxHashes,
            Packet::Response(_) => PacketType::Response,
        }
    }
}

impl Serialize for Packet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Packet", 2)?;
        state.serialize_field("T", &(self.packet_type() as u8))?;
        match self {
            Packet::Transactions(txs) => state.serialize_field("Data", txs)?,
            Packet::BlockedTxHashes(hashes) => state.serialize_field("Data", hashes)?,
            Packet::Response(resp) => state.serialize_field("Data", resp)?,
        }
        state.end()
    }
}

#[derive(Deserialize)]
struct RawPacket {
    #[serde(rename = "T")]
    t: u8,
    #[serde(rename = "Data")]
    data: serde_json::Value,
}

impl TryFrom<RawPacket> for Packet {
    type Error = RelayError;

    fn try_from(raw: RawPacket) -> Result<Self, Self::Error> {
        Ok(match PacketType::try_from(raw.t)? {
            PacketType::Transactions => Packet::Transactions(serde_json::from_value(raw.data)?),
            PacketType::BlockedTxHashes => {
                Packet::BlockedTxHashes(serde_json::from_value(raw.data)?)
            }
            PacketType::Response => Packet::Response(serde_json::from_value(raw.data)?),
        })
    }
}
