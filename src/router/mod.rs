//! Publish fan-out
//!
//! Resolves the subscribers of a published topic (exact-name subscribers
//! plus every matching wildcard filter from the [`FilterTree`]), computes the
//! delivery QoS per client and queues QoS 1/2 deliveries in the recipient's
//! in-flight store.

use std::sync::Arc;

use ahash::AHashMap;
use tracing::{debug, trace, warn};

use crate::config::LimitsConfig;
use crate::error::Result;
use crate::inflight::InFlightRecord;
use crate::protocol::{Publish, QoS};
use crate::session::SessionManager;
use crate::store::KvStore;
use crate::subscription::SubscriptionStore;
use crate::topic::{FilterTree, TopicLevels};

/// One outgoing copy of a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub client_id: String,
    /// Scope holding the subscription that selected this client
    pub clean_session: bool,
    /// Packet to send, with the effective QoS and a fresh packet id
    pub publish: Publish,
    /// Whether the message was stored in the in-flight queue; always true
    /// for QoS 1 and 2
    pub queued: bool,
}

/// Best subscription of one client for a topic
struct Target {
    qos: QoS,
    pattern: String,
}

/// Routes PUBLISH packets to subscribers
#[derive(Clone)]
pub struct Router {
    filters: FilterTree,
    subscriptions: SubscriptionStore,
    sessions: SessionManager,
    max_inflight: usize,
    max_topic_levels: usize,
}

impl Router {
    pub fn new(sessions: SessionManager, limits: &LimitsConfig) -> Self {
        let store: Arc<dyn KvStore> = sessions.store().clone();
        Self {
            filters: FilterTree::new(store),
            subscriptions: sessions.subscriptions().clone(),
            sessions,
            max_inflight: limits.max_inflight,
            max_topic_levels: limits.max_topic_levels,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn filters(&self) -> &FilterTree {
        &self.filters
    }

    /// Fan a PUBLISH out to its subscribers.
    ///
    /// Each client receives at most one copy, at the highest QoS granted by
    /// any of its matching subscriptions and never above the publish QoS.
    /// QoS 1/2 copies are skipped for clients whose in-flight queue holds
    /// `max_inflight` messages. Deliveries come back sorted by client id.
    pub async fn route_publish(&self, publish: &Publish) -> Result<Vec<Delivery>> {
        let topic = TopicLevels::parse_name_with_max_levels(&publish.topic, self.max_topic_levels)?;

        let mut targets: AHashMap<String, Target> = AHashMap::new();
        let exact = self.subscriptions.get_by_topic(&topic).await?;
        merge_targets(&mut targets, exact, &topic.joined());

        let filters = self.filters.matching_filters(&topic).await?;
        for filter in &filters {
            let subscribers = self.subscriptions.get_by_topic(filter).await?;
            merge_targets(&mut targets, subscribers, &filter.joined());
        }
        trace!(topic = %publish.topic, filters = filters.len(), clients = targets.len(), "Subscribers resolved");

        let mut targets: Vec<(String, Target)> = targets.into_iter().collect();
        targets.sort_by(|a, b| a.0.cmp(&b.0));

        let mut deliveries = Vec::with_capacity(targets.len());
        for (client_id, target) in targets {
            // The reverse index can outlive the client-side entry
            let Some(clean_session) = self.subscriptions.scope_of(&client_id, &target.pattern).await? else {
                debug!(client_id = %client_id, pattern = %target.pattern, "Skipping stale subscriber");
                continue;
            };
            if let Some(delivery) = self.deliver(publish, client_id, clean_session, target.qos).await? {
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    /// Build one outgoing copy. QoS 1/2 copies are queued before they are
    /// handed out; a client whose queue is full gets no copy at all.
    async fn deliver(
        &self,
        publish: &Publish,
        client_id: String,
        clean_session: bool,
        granted: QoS,
    ) -> Result<Option<Delivery>> {
        let qos = publish.qos.min(granted);
        let inflight = self.sessions.inflight();

        let packet_id = if qos.needs_ack() {
            if self.max_inflight > 0 && inflight.len(&client_id, clean_session).await? >= self.max_inflight {
                warn!(client_id = %client_id, clean_session, max_inflight = self.max_inflight, "In-flight queue full, dropping delivery");
                return Ok(None);
            }
            let packet_id = self.sessions.next_packet_id(&client_id).await?;
            let record = InFlightRecord::Publish {
                dup: false,
                qos,
                retain: false,
                topic_name: publish.topic.to_string(),
                packet_id,
                payload: publish.payload.clone(),
            };
            inflight.append(&client_id, clean_session, &record).await?;
            Some(packet_id)
        } else {
            None
        };

        debug!(client_id = %client_id, topic = %publish.topic, ?qos, ?packet_id, "Delivery");
        Ok(Some(Delivery {
            client_id,
            clean_session,
            publish: Publish {
                dup: false,
                qos,
                retain: false,
                topic: publish.topic.clone(),
                packet_id,
                payload: publish.payload.clone(),
            },
            queued: packet_id.is_some(),
        }))
    }
}

fn merge_targets(targets: &mut AHashMap<String, Target>, subscribers: std::collections::HashMap<String, QoS>, pattern: &str) {
    for (client_id, qos) in subscribers {
        match targets.get_mut(&client_id) {
            Some(existing) if existing.qos >= qos => {}
            Some(existing) => {
                existing.qos = qos;
                existing.pattern = pattern.to_string();
            }
            None => {
                targets.insert(
                    client_id,
                    Target {
                        qos,
                        pattern: pattern.to_string(),
                    },
                );
            }
        }
    }
}
