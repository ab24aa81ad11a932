//! Key schema.
//!
//! Every key the engine touches is built here.
//!
//! | Purpose | Key | Shape |
//! |---|---|---|
//! | connected clients per node | `node:<node>:clients` | set |
//! | connected nodes per client | `client:<id>:nodes` | set |
//! | session existence | `client:<id>:exists` | scalar |
//! | in-flight id order | `client:<id>:inflight:<clean>` | list |
//! | in-flight record | `client:<id>:inflight:msg:<packetId>` | hash |
//! | client's subscriptions | `client:<id>:sub:<clean>` | hash |
//! | per-client counters | `client:<id>:counters` | hash |
//! | topic name subscribers | `topic:name:<levels>` | hash |
//! | topic filter subscribers | `topic:filter:<levels>` | hash |
//! | filter tree node | `topic:filter:children:<prefix>` | hash |
//!
//! Subscriber keys of filters whose first level starts with `children:` or
//! `~` get a leading `~`, so they never land on a tree node key.

use crate::topic::join;

const FILTER_ESCAPE: char = '~';

fn clean_flag(clean_session: bool) -> &'static str {
    if clean_session {
        "1"
    } else {
        "0"
    }
}

pub fn connected_clients(node: &str) -> String {
    format!("node:{}:clients", node)
}

pub fn connected_nodes(client_id: &str) -> String {
    format!("client:{}:nodes", client_id)
}

pub fn client_exists(client_id: &str) -> String {
    format!("client:{}:exists", client_id)
}

pub fn inflight_list(client_id: &str, clean_session: bool) -> String {
    format!("client:{}:inflight:{}", client_id, clean_flag(clean_session))
}

pub fn inflight_message(client_id: &str, packet_id: u16) -> String {
    format!("client:{}:inflight:msg:{}", client_id, packet_id)
}

pub fn subscription(client_id: &str, clean_session: bool) -> String {
    format!("client:{}:sub:{}", client_id, clean_flag(clean_session))
}

pub fn client_counters(client_id: &str) -> String {
    format!("client:{}:counters", client_id)
}

pub fn topic_name<S: AsRef<str>>(levels: &[S]) -> String {
    format!("topic:name:{}", join(levels))
}

pub fn topic_filter<S: AsRef<str>>(levels: &[S]) -> String {
    let joined = join(levels);
    if joined.starts_with(FILTER_ESCAPE) || joined.starts_with("children:") {
        format!("topic:filter:{}{}", FILTER_ESCAPE, joined)
    } else {
        format!("topic:filter:{}", joined)
    }
}

/// Tree node reached by following `prefix` from the root
pub fn topic_filter_child<S: AsRef<str>>(prefix: &[S]) -> String {
    format!("topic:filter:children:{}", join(prefix))
}
