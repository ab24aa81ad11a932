//! In-Flight Message Store
//!
//! Per client and clean-session scope, an ordered list of packet ids (the
//! redelivery order) plus one field-map record per id. Two kinds of record
//! live here: a QoS 1/2 PUBLISH waiting for its acknowledgment and a PUBREL
//! waiting for PUBCOMP.
//!
//! Record layout (all values are strings):
//!
//! | field | PUBLISH | PUBREL |
//! |---|---|---|
//! | `type` | `3` | `6` |
//! | `dup`, `retain` | `1` / `0` | absent |
//! | `qos` | `0`..`2` | `1` |
//! | `topicName` | topic | absent |
//! | `packetId` | id | id |
//! | `payload` | bytes, one char per byte (latin-1) | absent |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::protocol::{Packet, PacketType, PubRel, Publish, QoS};
use crate::store::{keys, KvOp, KvStore, StoreError};

/// In-flight store errors
#[derive(Debug)]
pub enum InFlightError {
    /// The record's `type` is not PUBLISH or PUBREL
    UnknownRecordType(String),
    /// A required field is absent
    MissingField(&'static str),
    /// A field holds an unparseable value
    InvalidField { field: &'static str, value: String },
    /// Backing store failure
    Store(StoreError),
}

impl fmt::Display for InFlightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InFlightError::UnknownRecordType(t) => write!(f, "unknown in-flight record type: {}", t),
            InFlightError::MissingField(field) => write!(f, "in-flight record has no '{}'", field),
            InFlightError::InvalidField { field, value } => {
                write!(f, "in-flight record field '{}' is invalid: {}", field, value)
            }
            InFlightError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for InFlightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InFlightError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for InFlightError {
    fn from(e: StoreError) -> Self {
        InFlightError::Store(e)
    }
}

pub type Result<T> = std::result::Result<T, InFlightError>;

/// A message awaiting the next step of its QoS handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InFlightRecord {
    Publish {
        dup: bool,
        qos: QoS,
        retain: bool,
        topic_name: String,
        packet_id: u16,
        payload: Bytes,
    },
    PubRel {
        packet_id: u16,
    },
}

fn flag(value: bool) -> String {
    let s = if value { "1" } else { "0" };
    s.to_string()
}

/// Bytes as a string with one char per byte, so arbitrary binary survives
/// a string-valued store
fn latin1_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn latin1_decode(text: &str) -> Result<Bytes> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c)).map_err(|_| InFlightError::InvalidField {
                field: "payload",
                value: c.to_string(),
            })
        })
        .collect::<Result<Vec<u8>>>()
        .map(Bytes::from)
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &'static str) -> Result<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(InFlightError::MissingField(name))
}

fn parse_field<T: std::str::FromStr>(fields: &HashMap<String, String>, name: &'static str) -> Result<T> {
    let raw = field(fields, name)?;
    raw.parse().map_err(|_| InFlightError::InvalidField {
        field: name,
        value: raw.to_string(),
    })
}

fn flag_field(fields: &HashMap<String, String>, name: &'static str) -> Result<bool> {
    match fields.get(name).map(String::as_str) {
        None | Some("0") => Ok(false),
        Some("1") => Ok(true),
        Some(other) => Err(InFlightError::InvalidField {
            field: name,
            value: other.to_string(),
        }),
    }
}

impl InFlightRecord {
    pub fn packet_id(&self) -> u16 {
        match self {
            InFlightRecord::Publish { packet_id, .. } | InFlightRecord::PubRel { packet_id } => {
                *packet_id
            }
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            InFlightRecord::Publish { .. } => PacketType::Publish,
            InFlightRecord::PubRel { .. } => PacketType::PubRel,
        }
    }

    /// Flat field map as persisted
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let type_field = ("type".to_string(), (self.packet_type() as u8).to_string());
        match self {
            InFlightRecord::Publish {
                dup,
                qos,
                retain,
                topic_name,
                packet_id,
                payload,
            } => vec![
                type_field,
                ("dup".to_string(), flag(*dup)),
                ("qos".to_string(), (*qos as u8).to_string()),
                ("retain".to_string(), flag(*retain)),
                ("topicName".to_string(), topic_name.clone()),
                ("packetId".to_string(), packet_id.to_string()),
                ("payload".to_string(), latin1_encode(payload)),
            ],
            InFlightRecord::PubRel { packet_id } => vec![
                type_field,
                ("qos".to_string(), "1".to_string()),
                ("packetId".to_string(), packet_id.to_string()),
            ],
        }
    }

    /// Decode a persisted field map
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let kind = field(fields, "type")?;
        let packet_type = kind.parse::<u8>().ok().and_then(PacketType::from_u8);
        match packet_type {
            Some(PacketType::Publish) => {
                let qos_raw: u8 = parse_field(fields, "qos")?;
                let qos = QoS::from_u8(qos_raw).ok_or_else(|| InFlightError::InvalidField {
                    field: "qos",
                    value: qos_raw.to_string(),
                })?;
                Ok(InFlightRecord::Publish {
                    dup: flag_field(fields, "dup")?,
                    qos,
                    retain: flag_field(fields, "retain")?,
                    topic_name: field(fields, "topicName")?.to_string(),
                    packet_id: parse_field(fields, "packetId")?,
                    payload: match fields.get("payload") {
                        Some(p) => latin1_decode(p)?,
                        None => Bytes::new(),
                    },
                })
            }
            Some(PacketType::PubRel) => Ok(InFlightRecord::PubRel {
                packet_id: parse_field(fields, "packetId")?,
            }),
            _ => Err(InFlightError::UnknownRecordType(kind.to_string())),
        }
    }

    /// Record for an outgoing packet; only PUBLISH with a packet id and
    /// PUBREL are tracked
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        match packet {
            Packet::Publish(p) => p.packet_id.map(|packet_id| InFlightRecord::Publish {
                dup: p.dup,
                qos: p.qos,
                retain: p.retain,
                topic_name: p.topic.to_string(),
                packet_id,
                payload: p.payload.clone(),
            }),
            Packet::PubRel(r) => Some(InFlightRecord::PubRel {
                packet_id: r.packet_id,
            }),
            _ => None,
        }
    }

    pub fn to_packet(&self) -> Packet {
        match self {
            InFlightRecord::Publish {
                dup,
                qos,
                retain,
                topic_name,
                packet_id,
                payload,
            } => Packet::Publish(Publish {
                dup: *dup,
                qos: *qos,
                retain: *retain,
                topic: Arc::from(topic_name.as_str()),
                packet_id: Some(*packet_id),
                payload: payload.clone(),
            }),
            InFlightRecord::PubRel { packet_id } => Packet::PubRel(PubRel::new(*packet_id)),
        }
    }

    /// Packet to resend after a reconnect: PUBLISH goes out with DUP set
    pub fn for_redelivery(&self) -> Packet {
        match self.to_packet() {
            Packet::Publish(mut p) => {
                p.dup = true;
                Packet::Publish(p)
            }
            other => other,
        }
    }
}

/// In-flight queues over a [`KvStore`]
#[derive(Clone)]
pub struct InFlightStore {
    store: Arc<dyn KvStore>,
}

impl InFlightStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Packet ids in enqueue order
    pub async fn list_ids(&self, client_id: &str, clean_session: bool) -> Result<Vec<u16>> {
        let key = keys::inflight_list(client_id, clean_session);
        let raw = self.store.lrange(&key, 0, -1).await?;
        raw.into_iter()
            .map(|id| {
                id.parse().map_err(|_| InFlightError::InvalidField {
                    field: "packetId",
                    value: id,
                })
            })
            .collect()
    }

    /// Record for `packet_id`, `None` if absent
    pub async fn get_record(&self, client_id: &str, packet_id: u16) -> Result<Option<InFlightRecord>> {
        let fields = self
            .store
            .hgetall(&keys::inflight_message(client_id, packet_id))
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        InFlightRecord::from_fields(&fields).map(Some)
    }

    /// Queue a record at the tail
    pub async fn append(&self, client_id: &str, clean_session: bool, record: &InFlightRecord) -> Result<()> {
        let packet_id = record.packet_id();
        let msg_key = keys::inflight_message(client_id, packet_id);
        self.store
            .apply(vec![
                KvOp::Del {
                    key: msg_key.clone(),
                },
                KvOp::HMSet {
                    key: msg_key,
                    fields: record.to_fields(),
                },
                KvOp::RPush {
                    key: keys::inflight_list(client_id, clean_session),
                    value: packet_id.to_string(),
                },
            ])
            .await?;
        debug!(client_id, packet_id, "In-flight record queued");
        Ok(())
    }

    /// Drop `packet_id` from the queue and delete its record; absent ids are
    /// not an error
    pub async fn remove(&self, client_id: &str, clean_session: bool, packet_id: u16) -> Result<()> {
        self.store
            .apply(vec![
                KvOp::LRem {
                    key: keys::inflight_list(client_id, clean_session),
                    value: packet_id.to_string(),
                },
                KvOp::Del {
                    key: keys::inflight_message(client_id, packet_id),
                },
            ])
            .await?;
        Ok(())
    }

    /// Move a queued QoS 2 PUBLISH to its PUBREL phase on PUBREC, keeping
    /// its queue position.
    ///
    /// Returns the PUBREL record to send. A record already in the PUBREL
    /// phase is returned unchanged. Unknown ids and QoS 1 records are left
    /// alone and give `None`.
    pub async fn release(&self, client_id: &str, packet_id: u16) -> Result<Option<InFlightRecord>> {
        match self.get_record(client_id, packet_id).await? {
            Some(InFlightRecord::Publish {
                qos: QoS::ExactlyOnce, ..
            }) => {
                let rel = InFlightRecord::PubRel { packet_id };
                let key = keys::inflight_message(client_id, packet_id);
                self.store
                    .apply(vec![
                        KvOp::Del { key: key.clone() },
                        KvOp::HMSet {
                            key,
                            fields: rel.to_fields(),
                        },
                    ])
                    .await?;
                Ok(Some(rel))
            }
            Some(rel @ InFlightRecord::PubRel { .. }) => Ok(Some(rel)),
            Some(InFlightRecord::Publish { qos, .. }) => {
                debug!(client_id, packet_id, ?qos, "PUBREC for a non QoS 2 message, ignoring");
                Ok(None)
            }
            None => {
                debug!(client_id, packet_id, "PUBREC for unknown packet id, ignoring");
                Ok(None)
            }
        }
    }

    /// Remove every queued id and record of a scope; returns how many ids
    /// were queued
    pub async fn clear(&self, client_id: &str, clean_session: bool) -> Result<usize> {
        let ids = self.list_ids(client_id, clean_session).await?;
        let mut ops: Vec<KvOp> = ids
            .iter()
            .map(|id| KvOp::Del {
                key: keys::inflight_message(client_id, *id),
            })
            .collect();
        ops.push(KvOp::Del {
            key: keys::inflight_list(client_id, clean_session),
        });
        self.store.apply(ops).await?;
        Ok(ids.len())
    }

    /// Queued records in redelivery order.
    ///
    /// Corrupt records and ids without a record are dropped from the queue
    /// with a warning rather than failing the whole scan.
    pub async fn pending(&self, client_id: &str, clean_session: bool) -> Result<Vec<InFlightRecord>> {
        let mut records = Vec::new();
        for packet_id in self.list_ids(client_id, clean_session).await? {
            match self.get_record(client_id, packet_id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    warn!(client_id, packet_id, "In-flight id without record, dropping");
                    self.remove(client_id, clean_session, packet_id).await?;
                }
                Err(InFlightError::Store(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(client_id, packet_id, "Dropping corrupt in-flight record: {}", e);
                    self.remove(client_id, clean_session, packet_id).await?;
                }
            }
        }
        Ok(records)
    }

    /// Number of queued ids
    pub async fn len(&self, client_id: &str, clean_session: bool) -> Result<usize> {
        let key = keys::inflight_list(client_id, clean_session);
        Ok(self.store.lrange(&key, 0, -1).await?.len())
    }
}
