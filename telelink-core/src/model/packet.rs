use crate::model::error::CodecError;
use crate::model::peer::{BusinessRole, ClientId};
use crate::time::now_millis;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Application messages multiplexed over the data channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PacketBody {
    Chat {
        content: String,
    },
    /// Raw device telemetry, e.g. a GATT characteristic value.
    Measurement {
        device: String,
        kind: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Courtesy notice sent right before an orderly close.
    ChannelClosing,
    Ping {
        sent_at: u64,
    },
    Pong {
        sent_at: u64,
    },
}

impl PacketBody {
    pub fn kind(&self) -> &'static str {
        match self {
            PacketBody::Chat { .. } => "chat",
            PacketBody::Measurement { .. } => "measurement",
            PacketBody::ChannelClosing => "channel_closing",
            PacketBody::Ping { .. } => "ping",
            PacketBody::Pong { .. } => "pong",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Packet {
    pub sender: ClientId,
    pub sender_role: BusinessRole,
    pub timestamp: u64,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(sender: ClientId, sender_role: BusinessRole, body: PacketBody) -> Self {
        Self {
            sender,
            sender_role,
            timestamp: now_millis(),
            body,
        }
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(postcard::to_allocvec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}
