//! MeshMQ - session, subscription and routing state for clustered MQTT brokers
//!
//! The engine keeps all broker state in a shared key-value store so that any
//! node can serve any client: subscriptions with a wildcard filter tree,
//! in-flight QoS 1/2 queues, and which node each client is connected to.
//! Network I/O and packet codecs live outside this crate.

pub mod auth;
pub mod config;
pub mod error;
pub mod inflight;
pub mod message;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;
pub mod subscription;
pub mod topic;

pub use auth::{Authenticator, StaticAuthenticator};
pub use config::Config;
pub use error::{Error, Result};
pub use inflight::{InFlightRecord, InFlightStore};
pub use message::{InternalMessage, MessageContext, MessagePayload};
pub use presence::Presence;
pub use protocol::{Packet, ProtocolVersion, QoS};
pub use router::{Delivery, Router};
pub use session::{ConnectOutcome, SessionManager};
pub use store::{FjallStore, KvStore, MemoryStore};
pub use subscription::SubscriptionStore;
pub use topic::{FilterTree, TopicLevels};
