//! End-to-end tests for the MeshMQ state engine
//!
//! Each flow runs against both store backends: subscribe, publish, queue,
//! acknowledge and disconnect, the way a broker node drives the engine.

use std::sync::Arc;

use bytes::Bytes;
use pretty_assertions::assert_eq;

use meshmq::auth::{Authenticator, StaticAuthenticator};
use meshmq::config::{AuthConfig, LimitsConfig, UserConfig};
use meshmq::message::{InternalMessage, MessageContext, MessagePayload};
use meshmq::protocol::{
    Packet, ProtocolVersion, PubAck, PubComp, PubRec, PubRel, Publish, QoS, SubAckReturnCode, Subscribe,
    Subscription, Unsubscribe,
};
use meshmq::store::{FjallStore, KvStore, MemoryStore};
use meshmq::topic::TopicLevels;
use meshmq::{Router, SessionManager};

fn memory_store() -> Arc<dyn KvStore> {
    Arc::new(MemoryStore::new())
}

fn node(store: Arc<dyn KvStore>, node_id: &str) -> Router {
    let limits = LimitsConfig::default();
    Router::new(SessionManager::new(store, node_id, &limits), &limits)
}

fn ctx(client_id: &str, clean_session: bool) -> MessageContext {
    MessageContext::new(ProtocolVersion::V311, clean_session, client_id)
}

fn publish(topic: &str, qos: QoS, payload: &'static [u8]) -> Publish {
    Publish {
        dup: false,
        qos,
        retain: false,
        topic: Arc::from(topic),
        packet_id: qos.needs_ack().then_some(1),
        payload: Bytes::from_static(payload),
    }
}

async fn subscribe(router: &Router, ctx: &MessageContext, filters: &[(&str, QoS)]) -> Vec<SubAckReturnCode> {
    let request = Subscribe {
        packet_id: 1,
        subscriptions: filters
            .iter()
            .map(|(filter, qos)| Subscription {
                filter: filter.to_string(),
                qos: *qos,
            })
            .collect(),
    };
    let granted: Vec<SubAckReturnCode> = request
        .subscriptions
        .iter()
        .map(|s| SubAckReturnCode::Granted(s.qos))
        .collect();
    router
        .sessions()
        .subscribe(ctx, &request, &granted)
        .await
        .unwrap()
        .return_codes
}

async fn full_flow(store: Arc<dyn KvStore>) {
    let router = node(store, "node-a");
    let sessions = router.sessions();

    let sub = ctx("subscriber", false);
    let outcome = sessions.connect(&sub).await.unwrap();
    assert!(!outcome.session_present);
    subscribe(&router, &sub, &[("sensors/+/temp", QoS::ExactlyOnce), ("sensors/#", QoS::AtMostOnce)]).await;

    // QoS 2 publish lands once, at QoS 2, in the in-flight queue
    let deliveries = router
        .route_publish(&publish("sensors/kitchen/temp", QoS::ExactlyOnce, b"\x00\xff21.5"))
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1);
    let delivery = &deliveries[0];
    assert_eq!(delivery.publish.qos, QoS::ExactlyOnce);
    assert!(delivery.queued);
    let packet_id = delivery.publish.packet_id.unwrap();

    // Connection drops before the handshake completes
    sessions.disconnect(&sub).await.unwrap();
    let resumed = sessions.connect(&sub).await.unwrap();
    assert!(resumed.session_present);
    assert_eq!(resumed.redeliver.len(), 1);
    match &resumed.redeliver[0] {
        Packet::Publish(p) => {
            assert!(p.dup);
            assert_eq!(p.packet_id, Some(packet_id));
            assert_eq!(p.payload, Bytes::from_static(b"\x00\xff21.5"));
        }
        other => panic!("unexpected redelivery {:?}", other),
    }

    let rel = sessions.acknowledge(&sub, &Packet::PubRec(PubRec::new(packet_id))).await.unwrap();
    assert_eq!(rel, Some(Packet::PubRel(PubRel::new(packet_id))));
    let again = sessions.connect(&sub).await.unwrap();
    assert_eq!(again.redeliver, vec![Packet::PubRel(PubRel::new(packet_id))]);

    sessions.acknowledge(&sub, &Packet::PubComp(PubComp::new(packet_id))).await.unwrap();
    assert!(sessions.inflight().pending("subscriber", false).await.unwrap().is_empty());

    // Unsubscribing one filter leaves the other
    sessions
        .unsubscribe(
            &sub,
            &Unsubscribe {
                packet_id: 3,
                filters: vec!["sensors/+/temp".into()],
            },
        )
        .await
        .unwrap();
    let deliveries = router
        .route_publish(&publish("sensors/kitchen/temp", QoS::AtLeastOnce, b"x"))
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].publish.qos, QoS::AtMostOnce);
    assert!(!deliveries[0].queued);
}

async fn clean_session_flow(store: Arc<dyn KvStore>) {
    let router = node(store, "node-a");
    let sessions = router.sessions();

    let sub = ctx("transient", true);
    sessions.connect(&sub).await.unwrap();
    subscribe(&router, &sub, &[("a/#", QoS::AtLeastOnce)]).await;

    let deliveries = router.route_publish(&publish("a/b", QoS::AtLeastOnce, b"1")).await.unwrap();
    assert!(deliveries[0].clean_session);
    assert!(deliveries[0].queued);
    let packet_id = deliveries[0].publish.packet_id.unwrap();
    sessions.acknowledge(&sub, &Packet::PubAck(PubAck::new(packet_id))).await.unwrap();
    router.route_publish(&publish("a/c", QoS::AtLeastOnce, b"2")).await.unwrap();

    sessions.disconnect(&sub).await.unwrap();

    assert!(router.route_publish(&publish("a/b", QoS::AtLeastOnce, b"3")).await.unwrap().is_empty());
    assert!(sessions.inflight().list_ids("transient", true).await.unwrap().is_empty());
    assert_eq!(
        router
            .filters()
            .child_count(&[], "a")
            .await
            .unwrap(),
        0
    );
    let topic = TopicLevels::parse_name("a/b").unwrap();
    assert!(router.filters().matching_filters(&topic).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_full_flow() {
    full_flow(memory_store()).await;
}

#[tokio::test]
async fn test_memory_clean_session_flow() {
    clean_session_flow(memory_store()).await;
}

#[tokio::test]
async fn test_fjall_full_flow() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KvStore> = Arc::new(FjallStore::open(dir.path()).unwrap());
    full_flow(store).await;
}

#[tokio::test]
async fn test_fjall_clean_session_flow() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KvStore> = Arc::new(FjallStore::open(dir.path()).unwrap());
    clean_session_flow(store).await;
}

#[tokio::test]
async fn test_fjall_session_resumes_on_another_node() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FjallStore::open(dir.path()).unwrap());

    let node_a = node(store.clone(), "node-a");
    let sub = ctx("durable", false);
    node_a.sessions().connect(&sub).await.unwrap();
    subscribe(&node_a, &sub, &[("metrics/#", QoS::AtLeastOnce)]).await;
    node_a
        .route_publish(&publish("metrics/cpu", QoS::AtLeastOnce, b"0.7"))
        .await
        .unwrap();
    node_a.sessions().disconnect(&sub).await.unwrap();
    store.flush().await.unwrap();

    let node_b = node(store, "node-b");
    let resumed = node_b.sessions().connect(&sub).await.unwrap();
    assert!(resumed.session_present);
    assert_eq!(resumed.redeliver.len(), 1);

    let deliveries = node_b.route_publish(&publish("metrics/mem", QoS::AtLeastOnce, b"0.3")).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].client_id, "durable");
    // Packet ids keep counting across nodes
    assert_eq!(deliveries[0].publish.packet_id, Some(2));

    let nodes = node_b.sessions().presence().connected_nodes("durable").await.unwrap();
    assert_eq!(nodes.into_iter().collect::<Vec<_>>(), vec!["node-b"]);
}

#[tokio::test]
async fn test_clients_on_two_nodes_share_state() {
    let store = memory_store();
    let node_a = node(store.clone(), "node-a");
    let node_b = node(store, "node-b");

    let sub = ctx("roaming", false);
    node_a.sessions().connect(&sub).await.unwrap();
    subscribe(&node_a, &sub, &[("chat/+", QoS::AtLeastOnce)]).await;

    // A publish handled on the other node still reaches the subscriber
    let deliveries = node_b.route_publish(&publish("chat/lobby", QoS::AtLeastOnce, b"hi")).await.unwrap();
    assert_eq!(deliveries.len(), 1);

    node_b.sessions().evict_node("node-a").await.unwrap();
    assert!(node_b.sessions().presence().connected_nodes("roaming").await.unwrap().is_empty());
    // Eviction only touches presence
    assert_eq!(node_b.sessions().inflight().len("roaming", false).await.unwrap(), 1);
}

#[tokio::test]
async fn test_authorized_subscribe_through_message_model() {
    let auth = StaticAuthenticator::new(&AuthConfig {
        enabled: true,
        allow_anonymous: false,
        users: vec![UserConfig {
            username: "viewer".into(),
            password: "pw".into(),
            max_qos: 1,
        }],
    });
    let router = node(memory_store(), "node-a");
    let sub = ctx("viewer-1", true).with_user_name(Some("viewer"));

    assert!(auth.auth_connect("viewer-1", Some("viewer"), Some(b"pw")).await.unwrap().is_ok());
    router.sessions().connect(&sub).await.unwrap();

    let request = Subscribe {
        packet_id: 9,
        subscriptions: vec![
            Subscription {
                filter: "news/#".into(),
                qos: QoS::ExactlyOnce,
            },
            Subscription {
                filter: "news/#/bad".into(),
                qos: QoS::AtMostOnce,
            },
        ],
    };
    let granted = auth
        .auth_subscribe("viewer-1", Some("viewer"), &request.subscriptions)
        .await
        .unwrap();
    let suback = router.sessions().subscribe(&sub, &request, &granted).await.unwrap();
    assert_eq!(
        suback.return_codes,
        vec![SubAckReturnCode::Granted(QoS::AtLeastOnce), SubAckReturnCode::Failure]
    );

    // The canonical form of the SUBACK carries the same codes
    let message = InternalMessage::from_wire(&sub, &Packet::SubAck(suback.clone())).unwrap();
    match &message.payload {
        MessagePayload::SubAck(payload) => assert_eq!(payload.packet_id, 9),
        other => panic!("unexpected payload {:?}", other),
    }
    assert_eq!(message.to_wire(), Packet::SubAck(suback));

    let deliveries = router.route_publish(&publish("news/today", QoS::ExactlyOnce, b"!")).await.unwrap();
    assert_eq!(deliveries[0].publish.qos, QoS::AtLeastOnce);
}
