//! MQTT Packet Definitions
//!
//! Parsed packet structures as handed over by the wire codec.

use std::sync::Arc;

use bytes::Bytes;

use super::{ConnectReturnCode, PacketType, ProtocolVersion, QoS, SubAckReturnCode};

/// MQTT Packet
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
}

/// Fixed header flags of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
}

impl FixedHeader {
    /// Header with all flags cleared
    pub fn plain(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// Fixed header flags as they appear on the wire.
    ///
    /// PUBREL, SUBSCRIBE and UNSUBSCRIBE carry the reserved QoS 1 bit.
    pub fn fixed_header(&self) -> FixedHeader {
        let packet_type = self.packet_type();
        match self {
            Packet::Publish(p) => FixedHeader {
                packet_type,
                dup: p.dup,
                qos: p.qos,
                retain: p.retain,
            },
            Packet::PubRel(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => FixedHeader {
                qos: QoS::AtLeastOnce,
                ..FixedHeader::plain(packet_type)
            },
            _ => FixedHeader::plain(packet_type),
        }
    }

    /// Packet identifier, for packets that carry one
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(p) => p.packet_id,
            Packet::PubAck(p) => Some(p.packet_id),
            Packet::PubRec(p) => Some(p.packet_id),
            Packet::PubRel(p) => Some(p.packet_id),
            Packet::PubComp(p) => Some(p.packet_id),
            Packet::Subscribe(p) => Some(p.packet_id),
            Packet::SubAck(p) => Some(p.packet_id),
            Packet::Unsubscribe(p) => Some(p.packet_id),
            Packet::UnsubAck(p) => Some(p.packet_id),
            _ => None,
        }
    }
}

/// CONNECT packet (client -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// Protocol version
    pub protocol_version: ProtocolVersion,
    /// Client identifier
    pub client_id: String,
    /// Clean session flag
    pub clean_session: bool,
    /// Keep alive interval in seconds
    pub keep_alive: u16,
    /// Username (optional)
    pub username: Option<String>,
    /// Password (optional)
    pub password: Option<Bytes>,
    /// Will message (optional)
    pub will: Option<Will>,
}

impl Default for Connect {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::V311,
            client_id: String::new(),
            clean_session: true,
            keep_alive: 60,
            username: None,
            password: None,
            will: None,
        }
    }
}

/// Will message configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    /// Will topic
    pub topic: String,
    /// Will payload
    pub payload: Bytes,
    /// Will QoS
    pub qos: QoS,
    /// Will retain flag
    pub retain: bool,
}

/// CONNACK packet (server -> client)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnAck {
    /// Session present flag
    pub session_present: bool,
    /// Return code
    pub return_code: ConnectReturnCode,
}

/// PUBLISH packet (bidirectional)
///
/// The topic field uses `Arc<str>` for efficient fan-out: when routing a message
/// to multiple subscribers, cloning the topic is O(1) instead of O(n) for String.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// Duplicate delivery flag
    pub dup: bool,
    /// Quality of service
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
    /// Topic name
    pub topic: Arc<str>,
    /// Packet identifier (present only for QoS > 0)
    pub packet_id: Option<u16>,
    /// Payload
    pub payload: Bytes,
}

impl Default for Publish {
    fn default() -> Self {
        Self {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Arc::from(""),
            packet_id: None,
            payload: Bytes::new(),
        }
    }
}

macro_rules! packet_id_only {
    ($(#[$doc:meta] $name:ident),* $(,)?) => {
        $(
            #[$doc]
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name {
                /// Packet identifier
                pub packet_id: u16,
            }

            impl $name {
                pub fn new(packet_id: u16) -> Self {
                    Self { packet_id }
                }
            }
        )*
    };
}

packet_id_only!(
    /// PUBACK packet (bidirectional, QoS 1)
    PubAck,
    /// PUBREC packet (bidirectional, QoS 2 step 1)
    PubRec,
    /// PUBREL packet (bidirectional, QoS 2 step 2)
    PubRel,
    /// PUBCOMP packet (bidirectional, QoS 2 step 3)
    PubComp,
    /// UNSUBACK packet (server -> client)
    UnsubAck,
);

/// Subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Topic filter
    pub filter: String,
    /// Requested QoS
    pub qos: QoS,
}

/// SUBSCRIBE packet (client -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    /// Packet identifier
    pub packet_id: u16,
    /// Subscriptions
    pub subscriptions: Vec<Subscription>,
}

/// SUBACK packet (server -> client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    /// Packet identifier
    pub packet_id: u16,
    /// Return codes, one per requested subscription
    pub return_codes: Vec<SubAckReturnCode>,
}

/// UNSUBSCRIBE packet (client -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    /// Packet identifier
    pub packet_id: u16,
    /// Topic filters to unsubscribe from
    pub filters: Vec<String>,
}
