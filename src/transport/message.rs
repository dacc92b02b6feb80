use serde::{Deserialize, Serialize};

/// Inbound client request: `{"op": 0|1, "id": <int>, "topic": <string>}`.
///
/// `op` and `topic` stay raw here. An unknown op or topic is a well-formed
/// request that gets its own answer, not a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Request {
    pub op: i64,
    pub id: i64,
    pub topic: String,
}

impl Request {
    pub fn subscribe(id: i64, topic: impl Into<String>) -> Self {
        Self {
            op: ClientOp::Subscribe as i64,
            id,
            topic: topic.into(),
        }
    }

    pub fn unsubscribe(id: i64, topic: impl Into<String>) -> Self {
        Self {
            op: ClientOp::Unsubscribe as i64,
            id,
            topic: topic.into(),
        }
    }

    /// The operation, or the raw value when it is not one we know.
    pub fn client_op(&self) -> Result<ClientOp, i64> {
        ClientOp::try_from(self.op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ClientOp {
    Subscribe = 0,
    Unsubscribe = 1,
}

impl TryFrom<i64> for ClientOp {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClientOp::Subscribe),
            1 => Ok(ClientOp::Unsubscribe),
            other => Err(other),
        }
    }
}
