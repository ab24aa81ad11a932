//! Presence Registry
//!
//! Which clients are connected to which broker node, indexed both ways,
//! plus the per-client session existence marker.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{keys, KvOp, KvStore, Result, ScanCursor, ScanPage};

#[derive(Clone)]
pub struct Presence {
    store: Arc<dyn KvStore>,
}

impl Presence {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Record `client_id` as connected to `node`.
    ///
    /// A client already present on another node is kept there; reconciling
    /// the two is up to the caller.
    pub async fn add_client_node(&self, client_id: &str, node: &str) -> Result<()> {
        self.store
            .apply(vec![
                KvOp::SAdd {
                    key: keys::connected_clients(node),
                    member: client_id.to_string(),
                },
                KvOp::SAdd {
                    key: keys::connected_nodes(client_id),
                    member: node.to_string(),
                },
            ])
            .await?;

        let nodes = self.connected_nodes(client_id).await?;
        if nodes.len() > 1 {
            warn!(client_id, ?nodes, "Client is connected to more than one node");
        }
        debug!(client_id, node, "Client presence added");
        Ok(())
    }

    pub async fn remove_client_node(&self, client_id: &str, node: &str) -> Result<()> {
        self.store
            .apply(vec![
                KvOp::SRem {
                    key: keys::connected_clients(node),
                    member: client_id.to_string(),
                },
                KvOp::SRem {
                    key: keys::connected_nodes(client_id),
                    member: node.to_string(),
                },
            ])
            .await?;
        debug!(client_id, node, "Client presence removed");
        Ok(())
    }

    /// Nodes the client is currently connected to
    pub async fn connected_nodes(&self, client_id: &str) -> Result<BTreeSet<String>> {
        self.store.smembers(&keys::connected_nodes(client_id)).await
    }

    pub async fn session_exists(&self, client_id: &str) -> Result<bool> {
        self.store.exists(&keys::client_exists(client_id)).await
    }

    pub async fn mark_session_exists(&self, client_id: &str) -> Result<()> {
        self.store.set(&keys::client_exists(client_id), "1").await
    }

    /// One page of the clients connected to `node`; pass `page.next` back to
    /// continue
    pub async fn list_connected_clients(&self, node: &str, cursor: &ScanCursor, limit: usize) -> Result<ScanPage> {
        self.store
            .sscan(&keys::connected_clients(node), cursor, limit)
            .await
    }
}
