//! Fjall-based store backend.
//!
//! Uses fjall (an LSM-tree based embedded database) for local persistence.
//! Each logical key maps to one bincode-encoded [`Value`]. Writers are
//! serialised so read-modify-write ops stay consistent, and a whole
//! [`KvOp`] batch commits as one fjall batch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::backend::KvStore;
use super::error::{Result, StoreError};
use super::value::{apply_op, KvOp, Value};

/// Fjall-based store
pub struct FjallStore {
    keyspace: Keyspace,
    entries: PartitionHandle,
    write_lock: Mutex<()>,
}

impl FjallStore {
    /// Open a fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let keyspace = Config::new(path).open()?;
        let entries = keyspace.open_partition("kv", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            entries,
            write_lock: Mutex::new(()),
        })
    }

    /// Serialize a value using bincode
    fn serialize(value: &Value) -> Result<Vec<u8>> {
        bincode::encode_to_vec(value, bincode::config::standard()).map_err(StoreError::from)
    }

    /// Deserialize a value using bincode
    fn deserialize(bytes: &[u8]) -> Result<Value> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(StoreError::from)
    }

    fn read(&self, key: &str) -> Result<Option<Value>> {
        match self.entries.get(key)? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Spawn a background task that persists the journal every `interval`
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = store.keyspace.persist(PersistMode::SyncAll) {
                    error!("Failed to flush store: {}", e);
                }
            }
        })
    }
}

#[async_trait]
impl KvStore for FjallStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        self.read(key)
    }

    async fn apply(&self, ops: Vec<KvOp>) -> Result<Vec<i64>> {
        let _guard = self.write_lock.lock();

        // Stage every touched key so later ops in the batch see earlier ones
        let mut staged: HashMap<String, Option<Value>> = HashMap::new();
        let mut replies = Vec::with_capacity(ops.len());
        for op in &ops {
            let key = op.key();
            if !staged.contains_key(key) {
                staged.insert(key.to_string(), self.read(key)?);
            }
            let slot = staged
                .get_mut(key)
                .ok_or_else(|| StoreError::Unavailable("staged key vanished".to_string()))?;
            replies.push(apply_op(slot, op)?);
        }

        let mut batch = self.keyspace.batch();
        for (key, slot) in staged {
            match slot {
                Some(value) => batch.insert(&self.entries, key, Self::serialize(&value)?),
                None => batch.remove(&self.entries, key),
            }
        }
        batch.commit()?;

        debug!("Committed batch of {} ops", ops.len());
        Ok(replies)
    }

    fn supports_atomic_batch(&self) -> bool {
        true
    }

    async fn flush(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}
