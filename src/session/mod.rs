//! MQTT Session Management
//!
//! Session lifecycle on top of the stores: presence and the existence
//! marker on connect and disconnect, clean-session purges, SUBSCRIBE and
//! UNSUBSCRIBE bookkeeping, acknowledgment handling for in-flight messages,
//! and packet identifier allocation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::error::Result;
use crate::inflight::{InFlightRecord, InFlightStore};
use crate::message::{InternalMessage, MessageContext, MessagePayload};
use crate::presence::Presence;
use crate::protocol::{Packet, SubAck, SubAckReturnCode, Subscribe, UnsubAck, Unsubscribe};
use crate::store::{keys, KvStore, ScanCursor};
use crate::subscription::SubscriptionStore;
use crate::topic::TopicLevels;

/// Field of `client:<id>:counters` holding the last packet id handed out
const PACKET_ID_FIELD: &str = "packetId";

/// Result of a CONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// Session present flag for the CONNACK
    pub session_present: bool,
    /// Queued packets to resend, in order
    pub redeliver: Vec<Packet>,
}

/// Session manager for one broker node
#[derive(Clone)]
pub struct SessionManager {
    node_id: Arc<str>,
    store: Arc<dyn KvStore>,
    presence: Presence,
    subscriptions: SubscriptionStore,
    inflight: InFlightStore,
    scan_page_size: usize,
    max_topic_levels: usize,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KvStore>, node_id: &str, limits: &LimitsConfig) -> Self {
        Self {
            node_id: Arc::from(node_id),
            presence: Presence::new(store.clone()),
            subscriptions: SubscriptionStore::new(store.clone()),
            inflight: InFlightStore::new(store.clone()),
            store,
            scan_page_size: limits.scan_page_size.max(1),
            max_topic_levels: limits.max_topic_levels,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn subscriptions(&self) -> &SubscriptionStore {
        &self.subscriptions
    }

    pub fn inflight(&self) -> &InFlightStore {
        &self.inflight
    }

    /// Register a connected client on this node.
    ///
    /// A clean session starts from an empty clean scope and never sets the
    /// existence marker. A persistent session gets its queued in-flight
    /// packets back for redelivery.
    pub async fn connect(&self, ctx: &MessageContext) -> Result<ConnectOutcome> {
        let client_id = ctx.client_id.as_str();
        let existed = self.presence.session_exists(client_id).await?;

        if ctx.clean_session {
            self.purge(client_id, true).await?;
        }

        self.presence.add_client_node(client_id, &self.node_id).await?;
        // Only persistent sessions survive the connection
        if !ctx.clean_session {
            self.presence.mark_session_exists(client_id).await?;
        }

        let redeliver = if ctx.clean_session {
            Vec::new()
        } else {
            self.inflight
                .pending(client_id, false)
                .await?
                .iter()
                .map(InFlightRecord::for_redelivery)
                .collect()
        };

        let session_present = existed && !ctx.clean_session;
        info!(
            client_id,
            node = %self.node_id,
            clean_session = ctx.clean_session,
            session_present,
            redeliver = redeliver.len(),
            "Client connected"
        );
        Ok(ConnectOutcome {
            session_present,
            redeliver,
        })
    }

    /// Unregister a client from this node; a clean session loses its
    /// subscriptions and in-flight messages
    pub async fn disconnect(&self, ctx: &MessageContext) -> Result<()> {
        let client_id = ctx.client_id.as_str();
        self.presence
            .remove_client_node(client_id, &self.node_id)
            .await?;
        if ctx.clean_session {
            self.purge(client_id, true).await?;
        }
        info!(client_id, node = %self.node_id, "Client disconnected");
        Ok(())
    }

    async fn purge(&self, client_id: &str, clean_session: bool) -> Result<()> {
        let subscriptions = self.subscriptions.remove_all(client_id, clean_session).await?;
        let queued = self.inflight.clear(client_id, clean_session).await?;
        if subscriptions > 0 || queued > 0 {
            debug!(client_id, subscriptions, queued, "Session scope purged");
        }
        Ok(())
    }

    /// Apply a SUBSCRIBE with the codes granted by the authenticator.
    ///
    /// Filters that fail validation are refused with
    /// [`SubAckReturnCode::Failure`] even if they were granted.
    pub async fn subscribe(
        &self,
        ctx: &MessageContext,
        subscribe: &Subscribe,
        granted: &[SubAckReturnCode],
    ) -> Result<SubAck> {
        let message = InternalMessage::from_subscribe(ctx, subscribe, granted)?;
        let MessagePayload::Subscribe(payload) = &message.payload else {
            return Ok(SubAck {
                packet_id: subscribe.packet_id,
                return_codes: Vec::new(),
            });
        };

        let mut return_codes = Vec::with_capacity(payload.subscriptions.len());
        for sub in &payload.subscriptions {
            let code = match sub.granted {
                SubAckReturnCode::Granted(qos) => {
                    match TopicLevels::parse_with_max_levels(&sub.topic, self.max_topic_levels) {
                        Ok(levels) => {
                            self.subscriptions
                                .add(&ctx.client_id, ctx.clean_session, &levels, qos)
                                .await?;
                            SubAckReturnCode::Granted(qos)
                        }
                        Err(e) => {
                            debug!(client_id = %ctx.client_id, filter = %sub.topic, "Refusing filter: {}", e);
                            SubAckReturnCode::Failure
                        }
                    }
                }
                SubAckReturnCode::Failure => SubAckReturnCode::Failure,
            };
            return_codes.push(code);
        }

        Ok(SubAck {
            packet_id: subscribe.packet_id,
            return_codes,
        })
    }

    /// Apply an UNSUBSCRIBE; malformed filters are skipped
    pub async fn unsubscribe(&self, ctx: &MessageContext, unsubscribe: &Unsubscribe) -> Result<UnsubAck> {
        for filter in &unsubscribe.filters {
            match TopicLevels::parse(filter) {
                Ok(levels) => {
                    self.subscriptions
                        .remove(&ctx.client_id, ctx.clean_session, &levels)
                        .await?;
                }
                Err(e) => debug!(client_id = %ctx.client_id, filter = %filter, "Ignoring unsubscribe: {}", e),
            }
        }
        Ok(UnsubAck::new(unsubscribe.packet_id))
    }

    /// Advance the QoS handshake of an outgoing message.
    ///
    /// PUBACK and PUBCOMP complete it. PUBREC swaps a queued QoS 2 PUBLISH
    /// for a PUBREL in the same queue position and returns the PUBREL to
    /// send; a PUBREC for anything else is ignored.
    pub async fn acknowledge(&self, ctx: &MessageContext, ack: &Packet) -> Result<Option<Packet>> {
        let client_id = ctx.client_id.as_str();
        match ack {
            Packet::PubAck(a) => {
                self.inflight
                    .remove(client_id, ctx.clean_session, a.packet_id)
                    .await?;
                Ok(None)
            }
            Packet::PubComp(c) => {
                self.inflight
                    .remove(client_id, ctx.clean_session, c.packet_id)
                    .await?;
                Ok(None)
            }
            Packet::PubRec(r) => {
                let rel = self.inflight.release(client_id, r.packet_id).await?;
                Ok(rel.map(|rel| rel.to_packet()))
            }
            other => {
                warn!(client_id, packet_type = ?other.packet_type(), "Not an acknowledgment");
                Ok(None)
            }
        }
    }

    /// Next packet identifier for messages sent to `client_id`, in 1..=65535
    pub async fn next_packet_id(&self, client_id: &str) -> Result<u16> {
        let counter = self
            .store
            .hincrby(&keys::client_counters(client_id), PACKET_ID_FIELD, 1)
            .await?;
        Ok(((counter - 1).rem_euclid(u16::MAX as i64) + 1) as u16)
    }

    /// Drop the presence entries of every client on a dead node; returns how
    /// many were removed
    pub async fn evict_node(&self, node: &str) -> Result<usize> {
        let mut cursor = ScanCursor::start();
        let mut evicted = 0;
        loop {
            let page = self
                .presence
                .list_connected_clients(node, &cursor, self.scan_page_size)
                .await?;
            for client_id in &page.items {
                self.presence.remove_client_node(client_id, node).await?;
                evicted += 1;
            }
            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        info!(node, evicted, "Node evicted");
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::message::ConversionError;
    use crate::protocol::{ProtocolVersion, PubAck, PubComp, PubRec, PubRel, QoS, Subscription};
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemoryStore::new()), "node-a", &LimitsConfig::default())
    }

    fn ctx(client_id: &str, clean_session: bool) -> MessageContext {
        MessageContext::new(ProtocolVersion::V311, clean_session, client_id)
    }

    fn subscribe(filters: &[(&str, QoS)]) -> Subscribe {
        Subscribe {
            packet_id: 10,
            subscriptions: filters
                .iter()
                .map(|(f, q)| Subscription {
                    filter: f.to_string(),
                    qos: *q,
                })
                .collect(),
        }
    }

    fn queued(packet_id: u16) -> InFlightRecord {
        InFlightRecord::Publish {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: false,
            topic_name: "t".into(),
            packet_id,
            payload: Bytes::from_static(b"p"),
        }
    }

    #[tokio::test]
    async fn test_connect_reports_session_present() {
        let sessions = manager();
        let first = sessions.connect(&ctx("c1", false)).await.unwrap();
        assert!(!first.session_present);

        sessions.disconnect(&ctx("c1", false)).await.unwrap();
        let second = sessions.connect(&ctx("c1", false)).await.unwrap();
        assert!(second.session_present);

        // A clean connect never resumes
        let clean = sessions.connect(&ctx("c1", true)).await.unwrap();
        assert!(!clean.session_present);

        // Nor does it leave a session behind for a later persistent connect
        sessions.connect(&ctx("c2", true)).await.unwrap();
        sessions.disconnect(&ctx("c2", true)).await.unwrap();
        assert!(!sessions.presence().session_exists("c2").await.unwrap());
        let first_persistent = sessions.connect(&ctx("c2", false)).await.unwrap();
        assert!(!first_persistent.session_present);

        let nodes = sessions.presence().connected_nodes("c1").await.unwrap();
        assert!(nodes.contains("node-a"));
    }

    #[tokio::test]
    async fn test_persistent_session_redelivers_with_dup() {
        let sessions = manager();
        sessions.connect(&ctx("c1", false)).await.unwrap();
        sessions.inflight().append("c1", false, &queued(1)).await.unwrap();
        sessions
            .inflight()
            .append("c1", false, &InFlightRecord::PubRel { packet_id: 2 })
            .await
            .unwrap();
        sessions.disconnect(&ctx("c1", false)).await.unwrap();

        let outcome = sessions.connect(&ctx("c1", false)).await.unwrap();
        assert_eq!(outcome.redeliver.len(), 2);
        match &outcome.redeliver[0] {
            Packet::Publish(p) => assert!(p.dup),
            other => panic!("unexpected packet {:?}", other),
        }
        assert_eq!(outcome.redeliver[1], Packet::PubRel(PubRel::new(2)));
    }

    #[tokio::test]
    async fn test_clean_disconnect_purges_clean_scope_only() {
        let sessions = manager();
        sessions.connect(&ctx("c1", true)).await.unwrap();
        sessions
            .subscribe(
                &ctx("c1", true),
                &subscribe(&[("a/+", QoS::AtLeastOnce)]),
                &[SubAckReturnCode::Granted(QoS::AtLeastOnce)],
            )
            .await
            .unwrap();
        sessions.inflight().append("c1", true, &queued(5)).await.unwrap();
        sessions
            .subscriptions()
            .add("c1", false, &TopicLevels::parse("keep").unwrap(), QoS::AtMostOnce)
            .await
            .unwrap();

        sessions.disconnect(&ctx("c1", true)).await.unwrap();

        let subs = sessions.subscriptions();
        assert!(subs.get_by_client("c1", true).await.unwrap().is_empty());
        assert_eq!(subs.get_by_client("c1", false).await.unwrap().len(), 1);
        assert!(sessions.inflight().list_ids("c1", true).await.unwrap().is_empty());
        assert!(sessions.presence().connected_nodes("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_validates_filters_and_counts() {
        let sessions = manager();
        let c = ctx("c1", false);

        let suback = sessions
            .subscribe(
                &c,
                &subscribe(&[("a/#", QoS::ExactlyOnce), ("a/#/b", QoS::AtMostOnce), ("x", QoS::AtMostOnce)]),
                &[
                    SubAckReturnCode::Granted(QoS::AtLeastOnce),
                    SubAckReturnCode::Granted(QoS::AtMostOnce),
                    SubAckReturnCode::Failure,
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            suback.return_codes,
            vec![
                SubAckReturnCode::Granted(QoS::AtLeastOnce),
                SubAckReturnCode::Failure,
                SubAckReturnCode::Failure,
            ]
        );
        assert_eq!(suback.packet_id, 10);
        assert_eq!(sessions.subscriptions().get_by_client("c1", false).await.unwrap().len(), 1);

        let err = sessions
            .subscribe(&c, &subscribe(&[("a", QoS::AtMostOnce), ("b", QoS::AtMostOnce)]), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conversion(ConversionError::SubscriptionCountMismatch { topics: 2, granted: 0 })
        ));

        let unsuback = sessions
            .unsubscribe(
                &c,
                &Unsubscribe {
                    packet_id: 11,
                    filters: vec!["a/#".into(), "bad/#/x".into()],
                },
            )
            .await
            .unwrap();
        assert_eq!(unsuback, UnsubAck::new(11));
        assert!(sessions.subscriptions().get_by_client("c1", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_qos2_handshake() {
        let sessions = manager();
        let c = ctx("c1", false);
        sessions.inflight().append("c1", false, &queued(3)).await.unwrap();

        let rel = sessions.acknowledge(&c, &Packet::PubRec(PubRec::new(3))).await.unwrap();
        assert_eq!(rel, Some(Packet::PubRel(PubRel::new(3))));
        assert_eq!(
            sessions.inflight().get_record("c1", 3).await.unwrap(),
            Some(InFlightRecord::PubRel { packet_id: 3 })
        );

        sessions.acknowledge(&c, &Packet::PubComp(PubComp::new(3))).await.unwrap();
        assert!(sessions.inflight().list_ids("c1", false).await.unwrap().is_empty());

        // Unknown ids are fine and leave nothing behind
        sessions.acknowledge(&c, &Packet::PubAck(PubAck::new(99))).await.unwrap();
        assert_eq!(sessions.acknowledge(&c, &Packet::PubRec(PubRec::new(77))).await.unwrap(), None);
        assert_eq!(sessions.inflight().get_record("c1", 77).await.unwrap(), None);
        assert!(!sessions
            .store()
            .exists(&keys::inflight_message("c1", 77))
            .await
            .unwrap());
        assert_eq!(sessions.acknowledge(&c, &Packet::PingReq).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_packet_ids_wrap() {
        let sessions = manager();
        assert_eq!(sessions.next_packet_id("c1").await.unwrap(), 1);
        assert_eq!(sessions.next_packet_id("c1").await.unwrap(), 2);
        assert_eq!(sessions.next_packet_id("c2").await.unwrap(), 1);

        sessions
            .store()
            .hset(&keys::client_counters("c1"), PACKET_ID_FIELD, "65534")
            .await
            .unwrap();
        assert_eq!(sessions.next_packet_id("c1").await.unwrap(), 65535);
        assert_eq!(sessions.next_packet_id("c1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evict_node() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let limits = LimitsConfig {
            scan_page_size: 4,
            ..Default::default()
        };
        let node_a = SessionManager::new(store.clone(), "node-a", &limits);
        let node_b = SessionManager::new(store, "node-b", &limits);

        for i in 0..10 {
            node_a.connect(&ctx(&format!("c{}", i), false)).await.unwrap();
        }
        node_b.connect(&ctx("c0", false)).await.unwrap();

        assert_eq!(node_b.evict_node("node-a").await.unwrap(), 10);
        let page = node_b
            .presence()
            .list_connected_clients("node-a", &ScanCursor::start(), 100)
            .await
            .unwrap();
        assert!(page.items.is_empty());

        let nodes = node_b.presence().connected_nodes("c0").await.unwrap();
        assert_eq!(nodes.into_iter().collect::<Vec<_>>(), vec!["node-b"]);
    }
}
