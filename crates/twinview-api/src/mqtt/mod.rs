// MQTT 3.1.1 packet model
//
// Only the subset a device client needs: CONNECT/CONNACK, PUBLISH with
// QoS 0/1, PUBACK, SUBSCRIBE/SUBACK, keep-alive pings, and DISCONNECT.

mod codec;

pub use codec::PacketReader;

use bytes::Bytes;

/// Delivery guarantee for a PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

impl QoS {
    pub(crate) fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            _ => None,
        }
    }

    pub(crate) fn bits(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub qos: QoS,
    pub packet_id: Option<u16>,
    pub retain: bool,
    pub dup: bool,
    pub payload: Bytes,
}

impl Publish {
    /// Fire-and-forget publish.
    pub fn at_most_once(topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtMostOnce,
            packet_id: None,
            retain: false,
            dup: false,
            payload,
        }
    }

    /// Publish acknowledged by a PUBACK carrying `packet_id`.
    pub fn at_least_once(topic: impl Into<String>, packet_id: u16, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtLeastOnce,
            packet_id: Some(packet_id),
            retain: false,
            dup: false,
            payload,
        }
    }
}

/// CONNACK return codes that mean the credential was rejected.
pub const CONNACK_BAD_CREDENTIALS: u8 = 4;
pub const CONNACK_NOT_AUTHORIZED: u8 = 5;

/// SUBACK return code for a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck { session_present: bool, code: u8 },
    Publish(Publish),
    PubAck { packet_id: u16 },
    Subscribe { packet_id: u16, topics: Vec<(String, QoS)> },
    SubAck { packet_id: u16, codes: Vec<u8> },
    PingReq,
    PingResp,
    Disconnect,
}
