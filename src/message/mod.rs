//! Canonical Message Model
//!
//! [`InternalMessage`] is the broker-internal envelope for any MQTT control
//! packet. Besides the packet itself it carries the session context needed to
//! route it without going back to the connection: protocol version, clean
//! session flag, client identity and the node that produced it. The packet
//! body is a [`MessagePayload`] sum type, so the message kind and its fields
//! can never disagree.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, Packet, PacketType, ProtocolVersion, PubAck, PubComp,
    PubRec, PubRel, Publish, QoS, SubAck, SubAckReturnCode, Subscribe, Subscription, UnsubAck,
    Unsubscribe, Will,
};

/// Conversion errors between wire packets and internal messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// A SUBSCRIBE carried a different number of filters than granted codes
    SubscriptionCountMismatch { topics: usize, granted: usize },
    /// The packet kind needs a dedicated constructor
    UnsupportedPacket(PacketType),
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::SubscriptionCountMismatch { topics, granted } => write!(
                f,
                "SUBSCRIBE has {} topic filters but {} granted QoS codes",
                topics, granted
            ),
            ConversionError::UnsupportedPacket(t) => {
                write!(f, "packet type {:?} cannot be converted here", t)
            }
        }
    }
}

impl std::error::Error for ConversionError {}

/// Session context attached to every message built from a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub protocol_version: ProtocolVersion,
    pub clean_session: bool,
    pub client_id: String,
    pub user_name: Option<String>,
    /// Node that produced the message, when it was generated by a broker
    pub broker_id: Option<String>,
}

impl MessageContext {
    pub fn new(protocol_version: ProtocolVersion, clean_session: bool, client_id: &str) -> Self {
        Self {
            protocol_version,
            clean_session,
            client_id: client_id.to_string(),
            user_name: None,
            broker_id: None,
        }
    }

    pub fn with_user_name(mut self, user_name: Option<&str>) -> Self {
        self.user_name = user_name.map(str::to_string);
        self
    }

    pub fn with_broker_id(mut self, broker_id: &str) -> Self {
        self.broker_id = Some(broker_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPayload {
    pub keep_alive: u16,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will_topic: Option<String>,
    pub will_payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnAckPayload {
    pub return_code: ConnectReturnCode,
    pub session_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSubscription {
    pub topic: String,
    pub granted: SubAckReturnCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub packet_id: u16,
    pub subscriptions: Vec<TopicSubscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAckPayload {
    pub packet_id: u16,
    pub return_codes: Vec<SubAckReturnCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribePayload {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPayload {
    pub topic_name: String,
    pub packet_id: Option<u16>,
    /// Raw payload bytes, never decoded as text
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketIdPayload {
    pub packet_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectPayload {
    /// Whether the client sent DISCONNECT (false: connection lost)
    pub clean: bool,
}

/// Packet body keyed by message kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePayload {
    Connect(ConnectPayload),
    ConnAck(ConnAckPayload),
    Publish(PublishPayload),
    PubAck(PacketIdPayload),
    PubRec(PacketIdPayload),
    PubRel(PacketIdPayload),
    PubComp(PacketIdPayload),
    Subscribe(SubscribePayload),
    SubAck(SubAckPayload),
    Unsubscribe(UnsubscribePayload),
    UnsubAck(PacketIdPayload),
    PingReq,
    PingResp,
    Disconnect(DisconnectPayload),
}

impl MessagePayload {
    pub fn packet_type(&self) -> PacketType {
        match self {
            MessagePayload::Connect(_) => PacketType::Connect,
            MessagePayload::ConnAck(_) => PacketType::ConnAck,
            MessagePayload::Publish(_) => PacketType::Publish,
            MessagePayload::PubAck(_) => PacketType::PubAck,
            MessagePayload::PubRec(_) => PacketType::PubRec,
            MessagePayload::PubRel(_) => PacketType::PubRel,
            MessagePayload::PubComp(_) => PacketType::PubComp,
            MessagePayload::Subscribe(_) => PacketType::Subscribe,
            MessagePayload::SubAck(_) => PacketType::SubAck,
            MessagePayload::Unsubscribe(_) => PacketType::Unsubscribe,
            MessagePayload::UnsubAck(_) => PacketType::UnsubAck,
            MessagePayload::PingReq => PacketType::PingReq,
            MessagePayload::PingResp => PacketType::PingResp,
            MessagePayload::Disconnect(_) => PacketType::Disconnect,
        }
    }
}

/// Broker-internal MQTT message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalMessage {
    // fixed header
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,

    pub protocol_version: ProtocolVersion,
    pub clean_session: bool,
    pub client_id: String,
    pub user_name: Option<String>,
    pub broker_id: Option<String>,

    pub payload: MessagePayload,
}

impl InternalMessage {
    fn build(ctx: &MessageContext, dup: bool, qos: QoS, retain: bool, payload: MessagePayload) -> Self {
        Self {
            dup,
            qos,
            retain,
            protocol_version: ctx.protocol_version,
            clean_session: ctx.clean_session,
            client_id: ctx.client_id.clone(),
            user_name: ctx.user_name.clone(),
            broker_id: ctx.broker_id.clone(),
            payload,
        }
    }

    /// Convert a wire packet.
    ///
    /// SUBSCRIBE needs the granted codes and goes through
    /// [`InternalMessage::from_subscribe`]. A wire DISCONNECT is always a
    /// clean disconnect; use [`InternalMessage::disconnect`] for a lost
    /// connection.
    pub fn from_wire(ctx: &MessageContext, packet: &Packet) -> Result<Self, ConversionError> {
        let header = packet.fixed_header();
        let payload = match packet {
            Packet::Connect(c) => MessagePayload::Connect(ConnectPayload {
                keep_alive: c.keep_alive,
                will_retain: c.will.as_ref().is_some_and(|w| w.retain),
                will_qos: c.will.as_ref().map(|w| w.qos).unwrap_or_default(),
                will_topic: c.will.as_ref().map(|w| w.topic.clone()),
                will_payload: c.will.as_ref().map(|w| w.payload.clone()).unwrap_or_default(),
            }),
            Packet::ConnAck(c) => MessagePayload::ConnAck(ConnAckPayload {
                return_code: c.return_code,
                session_present: c.session_present,
            }),
            Packet::Publish(p) => MessagePayload::Publish(PublishPayload {
                topic_name: p.topic.to_string(),
                packet_id: p.packet_id,
                payload: Bytes::copy_from_slice(&p.payload),
            }),
            Packet::PubAck(p) => MessagePayload::PubAck(PacketIdPayload { packet_id: p.packet_id }),
            Packet::PubRec(p) => MessagePayload::PubRec(PacketIdPayload { packet_id: p.packet_id }),
            Packet::PubRel(p) => MessagePayload::PubRel(PacketIdPayload { packet_id: p.packet_id }),
            Packet::PubComp(p) => {
                MessagePayload::PubComp(PacketIdPayload { packet_id: p.packet_id })
            }
            Packet::SubAck(s) => MessagePayload::SubAck(SubAckPayload {
                packet_id: s.packet_id,
                return_codes: s.return_codes.clone(),
            }),
            Packet::Unsubscribe(u) => MessagePayload::Unsubscribe(UnsubscribePayload {
                packet_id: u.packet_id,
                topics: u.filters.clone(),
            }),
            Packet::UnsubAck(u) => {
                MessagePayload::UnsubAck(PacketIdPayload { packet_id: u.packet_id })
            }
            Packet::PingReq => MessagePayload::PingReq,
            Packet::PingResp => MessagePayload::PingResp,
            Packet::Disconnect => MessagePayload::Disconnect(DisconnectPayload { clean: true }),
            Packet::Subscribe(_) => {
                return Err(ConversionError::UnsupportedPacket(PacketType::Subscribe))
            }
        };
        Ok(Self::build(ctx, header.dup, header.qos, header.retain, payload))
    }

    /// Convert a SUBSCRIBE, pairing each filter with the code granted for it
    pub fn from_subscribe(
        ctx: &MessageContext,
        subscribe: &Subscribe,
        granted: &[SubAckReturnCode],
    ) -> Result<Self, ConversionError> {
        if subscribe.subscriptions.len() != granted.len() {
            return Err(ConversionError::SubscriptionCountMismatch {
                topics: subscribe.subscriptions.len(),
                granted: granted.len(),
            });
        }
        let subscriptions = subscribe
            .subscriptions
            .iter()
            .zip(granted)
            .map(|(s, code)| TopicSubscription {
                topic: s.filter.clone(),
                granted: *code,
            })
            .collect();
        Ok(Self::build(
            ctx,
            false,
            QoS::AtLeastOnce,
            false,
            MessagePayload::Subscribe(SubscribePayload {
                packet_id: subscribe.packet_id,
                subscriptions,
            }),
        ))
    }

    /// Disconnect event, `clean` being false when the connection was lost
    pub fn disconnect(ctx: &MessageContext, clean: bool) -> Self {
        Self::build(
            ctx,
            false,
            QoS::AtMostOnce,
            false,
            MessagePayload::Disconnect(DisconnectPayload { clean }),
        )
    }

    pub fn message_type(&self) -> PacketType {
        self.payload.packet_type()
    }

    pub fn context(&self) -> MessageContext {
        MessageContext {
            protocol_version: self.protocol_version,
            clean_session: self.clean_session,
            client_id: self.client_id.clone(),
            user_name: self.user_name.clone(),
            broker_id: self.broker_id.clone(),
        }
    }

    /// Packet identifier, for kinds that carry one
    pub fn packet_id(&self) -> Option<u16> {
        match &self.payload {
            MessagePayload::Publish(p) => p.packet_id,
            MessagePayload::PubAck(p)
            | MessagePayload::PubRec(p)
            | MessagePayload::PubRel(p)
            | MessagePayload::PubComp(p)
            | MessagePayload::UnsubAck(p) => Some(p.packet_id),
            MessagePayload::Subscribe(s) => Some(s.packet_id),
            MessagePayload::SubAck(s) => Some(s.packet_id),
            MessagePayload::Unsubscribe(u) => Some(u.packet_id),
            _ => None,
        }
    }

    /// Encode for forwarding to another node
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Rebuild the wire packet.
    ///
    /// Header flags and PUBLISH payload bytes are reproduced exactly. A
    /// CONNECT comes back without its password, which is never carried.
    pub fn to_wire(&self) -> Packet {
        match &self.payload {
            MessagePayload::Connect(c) => Packet::Connect(Box::new(Connect {
                protocol_version: self.protocol_version,
                client_id: self.client_id.clone(),
                clean_session: self.clean_session,
                keep_alive: c.keep_alive,
                username: self.user_name.clone(),
                password: None,
                will: c.will_topic.as_ref().map(|topic| Will {
                    topic: topic.clone(),
                    payload: c.will_payload.clone(),
                    qos: c.will_qos,
                    retain: c.will_retain,
                }),
            })),
            MessagePayload::ConnAck(c) => Packet::ConnAck(ConnAck {
                session_present: c.session_present,
                return_code: c.return_code,
            }),
            MessagePayload::Publish(p) => Packet::Publish(Publish {
                dup: self.dup,
                qos: self.qos,
                retain: self.retain,
                topic: Arc::from(p.topic_name.as_str()),
                packet_id: p.packet_id,
                payload: p.payload.clone(),
            }),
            MessagePayload::PubAck(p) => Packet::PubAck(PubAck::new(p.packet_id)),
            MessagePayload::PubRec(p) => Packet::PubRec(PubRec::new(p.packet_id)),
            MessagePayload::PubRel(p) => Packet::PubRel(PubRel::new(p.packet_id)),
            MessagePayload::PubComp(p) => Packet::PubComp(PubComp::new(p.packet_id)),
            MessagePayload::Subscribe(s) => Packet::Subscribe(Subscribe {
                packet_id: s.packet_id,
                subscriptions: s
                    .subscriptions
                    .iter()
                    .map(|t| Subscription {
                        filter: t.topic.clone(),
                        qos: t.granted.granted().unwrap_or_default(),
                    })
                    .collect(),
            }),
            MessagePayload::SubAck(s) => Packet::SubAck(SubAck {
                packet_id: s.packet_id,
                return_codes: s.return_codes.clone(),
            }),
            MessagePayload::Unsubscribe(u) => Packet::Unsubscribe(Unsubscribe {
                packet_id: u.packet_id,
                filters: u.topics.clone(),
            }),
            MessagePayload::UnsubAck(u) => Packet::UnsubAck(UnsubAck::new(u.packet_id)),
            MessagePayload::PingReq => Packet::PingReq,
            MessagePayload::PingResp => Packet::PingResp,
            MessagePayload::Disconnect(_) => Packet::Disconnect,
        }
    }
}
