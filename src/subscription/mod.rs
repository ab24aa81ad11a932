//! Subscription Store
//!
//! A subscription is recorded on two sides: the client's own table
//! (`pattern -> qos`, split by clean-session scope) and the pattern's
//! reverse index (`clientId -> qos`). Wildcard filters additionally hold one
//! reference on every node of their path in the [`FilterTree`]; exact topic
//! names never enter the tree.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::protocol::QoS;
use crate::store::{keys, KvOp, KvStore, Result};
use crate::topic::{FilterTree, TopicLevels};

pub(crate) fn parse_qos(raw: &str) -> Option<QoS> {
    raw.parse::<u8>().ok().and_then(QoS::from_u8)
}

fn qos_table(raw: HashMap<String, String>, key: &str) -> HashMap<String, QoS> {
    raw.into_iter()
        .filter_map(|(k, v)| match parse_qos(&v) {
            Some(qos) => Some((k, qos)),
            None => {
                warn!(key, entry = %k, value = %v, "Ignoring subscription with invalid QoS");
                None
            }
        })
        .collect()
}

/// Reverse-index key of a pattern
fn subscribers_key(levels: &TopicLevels) -> String {
    let segments: Vec<&str> = levels.iter().collect();
    if levels.is_filter() {
        keys::topic_filter(segments.as_slice())
    } else {
        keys::topic_name(segments.as_slice())
    }
}

#[derive(Clone)]
pub struct SubscriptionStore {
    store: Arc<dyn KvStore>,
}

impl SubscriptionStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Subscribers registered under exactly this pattern.
    ///
    /// This is the reverse index only: for a topic name it returns the
    /// clients subscribed to that literal name, not the wildcard matches.
    pub async fn get_by_topic(&self, levels: &TopicLevels) -> Result<HashMap<String, QoS>> {
        let key = subscribers_key(levels);
        let raw = self.store.hgetall(&key).await?;
        Ok(qos_table(raw, &key))
    }

    /// Patterns a client is subscribed to in one scope
    pub async fn get_by_client(&self, client_id: &str, clean_session: bool) -> Result<HashMap<String, QoS>> {
        let key = keys::subscription(client_id, clean_session);
        let raw = self.store.hgetall(&key).await?;
        Ok(qos_table(raw, &key))
    }

    /// Granted QoS of one pattern for a client, if subscribed
    pub async fn get(&self, client_id: &str, clean_session: bool, pattern: &str) -> Result<Option<QoS>> {
        let raw = self
            .store
            .hget(&keys::subscription(client_id, clean_session), pattern)
            .await?;
        Ok(raw.as_deref().and_then(parse_qos))
    }

    /// Scope in which a client holds `pattern`, persistent scope first
    pub async fn scope_of(&self, client_id: &str, pattern: &str) -> Result<Option<bool>> {
        for clean_session in [false, true] {
            if self.get(client_id, clean_session, pattern).await?.is_some() {
                return Ok(Some(clean_session));
            }
        }
        Ok(None)
    }

    /// Subscribe, or update the QoS of an existing subscription.
    ///
    /// Filter tree references are only taken for a new subscription, so a
    /// re-subscribe does not inflate the counts. The reverse index holds one
    /// entry per client for both scopes, at the higher of the two QoS
    /// values. Returns whether the subscription is new.
    pub async fn add(&self, client_id: &str, clean_session: bool, levels: &TopicLevels, qos: QoS) -> Result<bool> {
        let pattern = levels.joined();
        let existing = self.get(client_id, clean_session, &pattern).await?;
        let other = self.get(client_id, !clean_session, &pattern).await?;
        let indexed = other.map_or(qos, |o| o.max(qos));

        let mut ops = vec![
            KvOp::HSet {
                key: keys::subscription(client_id, clean_session),
                field: pattern.clone(),
                value: (qos as u8).to_string(),
            },
            KvOp::HSet {
                key: subscribers_key(levels),
                field: client_id.to_string(),
                value: (indexed as u8).to_string(),
            },
        ];
        let new = existing.is_none();
        if new && levels.is_filter() {
            ops.extend(FilterTree::insert_ops(levels));
        }
        self.store.apply(ops).await?;

        debug!(client_id, clean_session, pattern = %pattern, ?qos, new, "Subscription stored");
        Ok(new)
    }

    /// Unsubscribe; returns whether the subscription existed.
    ///
    /// If the other scope still holds the pattern, the reverse-index entry
    /// is kept at that scope's QoS.
    pub async fn remove(&self, client_id: &str, clean_session: bool, levels: &TopicLevels) -> Result<bool> {
        let pattern = levels.joined();
        let existed = self.get(client_id, clean_session, &pattern).await?.is_some();
        let other = self.get(client_id, !clean_session, &pattern).await?;
        self.store
            .apply(Self::remove_ops(client_id, clean_session, levels, existed, other))
            .await?;
        debug!(client_id, clean_session, pattern = %pattern, existed, "Subscription removed");
        Ok(existed)
    }

    fn remove_ops(
        client_id: &str,
        clean_session: bool,
        levels: &TopicLevels,
        release_tree: bool,
        other_scope: Option<QoS>,
    ) -> Vec<KvOp> {
        let reverse = match other_scope {
            Some(qos) => KvOp::HSet {
                key: subscribers_key(levels),
                field: client_id.to_string(),
                value: (qos as u8).to_string(),
            },
            None => KvOp::HDel {
                key: subscribers_key(levels),
                field: client_id.to_string(),
            },
        };
        let mut ops = vec![
            KvOp::HDel {
                key: keys::subscription(client_id, clean_session),
                field: levels.joined(),
            },
            reverse,
        ];
        if release_tree && levels.is_filter() {
            ops.extend(FilterTree::remove_ops(levels));
        }
        ops
    }

    /// Remove every subscription of a scope.
    ///
    /// Best effort: a subscription added while the sweep runs may survive
    /// on the reverse-index side. Unparseable patterns only lose their
    /// client-side entry. Returns the number of subscriptions removed.
    pub async fn remove_all(&self, client_id: &str, clean_session: bool) -> Result<usize> {
        let client_key = keys::subscription(client_id, clean_session);
        let patterns = self.store.hgetall(&client_key).await?;
        let other_scope = self.get_by_client(client_id, !clean_session).await?;

        let mut ops = Vec::new();
        for pattern in patterns.keys() {
            match TopicLevels::parse(pattern) {
                Ok(levels) => ops.extend(Self::remove_ops(
                    client_id,
                    clean_session,
                    &levels,
                    true,
                    other_scope.get(pattern).copied(),
                )),
                Err(e) => warn!(client_id, pattern = %pattern, "Dropping invalid stored pattern: {}", e),
            }
        }
        ops.push(KvOp::Del { key: client_key });
        self.store.apply(ops).await?;

        debug!(client_id, clean_session, count = patterns.len(), "Subscriptions purged");
        Ok(patterns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Value};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn levels(s: &str) -> TopicLevels {
        TopicLevels::parse(s).unwrap()
    }

    async fn snapshot(kv: &MemoryStore, keys: &[String]) -> BTreeMap<String, Option<Value>> {
        let mut out = BTreeMap::new();
        for key in keys {
            out.insert(key.clone(), kv.load(key).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_add_filter_and_name() {
        let kv = Arc::new(MemoryStore::new());
        let subs = SubscriptionStore::new(kv.clone());

        assert!(subs.add("c1", false, &levels("sensors/+/temp"), QoS::AtLeastOnce).await.unwrap());
        assert!(subs.add("c1", false, &levels("sensors/a/temp"), QoS::ExactlyOnce).await.unwrap());

        let by_client = subs.get_by_client("c1", false).await.unwrap();
        assert_eq!(by_client.len(), 2);
        assert_eq!(by_client["sensors/+/temp"], QoS::AtLeastOnce);
        assert!(subs.get_by_client("c1", true).await.unwrap().is_empty());

        let by_filter = subs.get_by_topic(&levels("sensors/+/temp")).await.unwrap();
        assert_eq!(by_filter.get("c1"), Some(&QoS::AtLeastOnce));
        let by_name = subs.get_by_topic(&levels("sensors/a/temp")).await.unwrap();
        assert_eq!(by_name.get("c1"), Some(&QoS::ExactlyOnce));

        // Only the filter went into the tree
        let tree = FilterTree::new(kv.clone());
        assert_eq!(tree.child_count(&[], "sensors").await.unwrap(), 1);
        assert_eq!(subs.scope_of("c1", "sensors/a/temp").await.unwrap(), Some(false));
        assert_eq!(subs.scope_of("c2", "sensors/a/temp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_then_remove_restores_state() {
        let kv = Arc::new(MemoryStore::new());
        let subs = SubscriptionStore::new(kv.clone());
        subs.add("c0", true, &levels("a/+/c"), QoS::AtMostOnce).await.unwrap();

        let watched: Vec<String> = vec![
            keys::subscription("c1", true),
            keys::topic_filter(&["a", "+", "c"]),
            keys::topic_filter_child::<&str>(&[]),
            keys::topic_filter_child(&["a"]),
            keys::topic_filter_child(&["a", "+"]),
            keys::topic_filter_child(&["a", "+", "c"]),
        ];
        let before = snapshot(&kv, &watched).await;

        subs.add("c1", true, &levels("a/+/c"), QoS::AtLeastOnce).await.unwrap();
        // Re-subscribing only updates the QoS
        assert!(!subs.add("c1", true, &levels("a/+/c"), QoS::ExactlyOnce).await.unwrap());
        assert!(subs.remove("c1", true, &levels("a/+/c")).await.unwrap());
        assert!(!subs.remove("c1", true, &levels("a/+/c")).await.unwrap());

        assert_eq!(snapshot(&kv, &watched).await, before);
    }

    #[tokio::test]
    async fn test_remove_all_scope() {
        let kv = Arc::new(MemoryStore::new());
        let subs = SubscriptionStore::new(kv.clone());
        subs.add("c1", true, &levels("a/#"), QoS::AtLeastOnce).await.unwrap();
        subs.add("c1", true, &levels("x/y"), QoS::AtMostOnce).await.unwrap();
        subs.add("c1", false, &levels("keep/+"), QoS::AtMostOnce).await.unwrap();

        assert_eq!(subs.remove_all("c1", true).await.unwrap(), 2);
        assert!(subs.get_by_client("c1", true).await.unwrap().is_empty());
        assert!(subs.get_by_topic(&levels("x/y")).await.unwrap().is_empty());
        assert_eq!(subs.get_by_client("c1", false).await.unwrap().len(), 1);

        let tree = FilterTree::new(kv.clone());
        assert_eq!(tree.child_count(&[], "a").await.unwrap(), 0);
        assert_eq!(tree.child_count(&[], "keep").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_pattern_in_both_scopes() {
        let kv = Arc::new(MemoryStore::new());
        let subs = SubscriptionStore::new(kv.clone());
        subs.add("c1", false, &levels("a/+"), QoS::AtLeastOnce).await.unwrap();
        subs.add("c1", true, &levels("a/+"), QoS::AtMostOnce).await.unwrap();

        // The lower clean-scope QoS does not overwrite the persistent one
        let reverse = subs.get_by_topic(&levels("a/+")).await.unwrap();
        assert_eq!(reverse.get("c1"), Some(&QoS::AtLeastOnce));

        // Dropping the clean scope keeps the persistent subscription routable
        assert!(subs.remove("c1", true, &levels("a/+")).await.unwrap());
        let reverse = subs.get_by_topic(&levels("a/+")).await.unwrap();
        assert_eq!(reverse.get("c1"), Some(&QoS::AtLeastOnce));
        let tree = FilterTree::new(kv.clone());
        assert_eq!(tree.child_count(&[], "a").await.unwrap(), 1);

        // Same through a scope purge, with the persistent QoS restored
        subs.add("c1", true, &levels("a/+"), QoS::ExactlyOnce).await.unwrap();
        assert_eq!(
            subs.get_by_topic(&levels("a/+")).await.unwrap().get("c1"),
            Some(&QoS::ExactlyOnce)
        );
        subs.remove_all("c1", true).await.unwrap();
        assert_eq!(
            subs.get_by_topic(&levels("a/+")).await.unwrap().get("c1"),
            Some(&QoS::AtLeastOnce)
        );
        assert_eq!(subs.scope_of("c1", "a/+").await.unwrap(), Some(false));

        assert!(subs.remove("c1", false, &levels("a/+")).await.unwrap());
        assert!(subs.get_by_topic(&levels("a/+")).await.unwrap().is_empty());
        assert_eq!(tree.child_count(&[], "a").await.unwrap(), 0);
    }
}
