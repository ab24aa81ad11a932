//! In-process store backend.
//!
//! Every op is atomic on its key (it runs under the dashmap shard lock), but
//! a batch is applied op by op, so concurrent readers can observe a
//! half-applied multi-key update, exactly like a remote store without
//! transactions.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::backend::KvStore;
use super::error::Result;
use super::value::{apply_op, KvOp, Value};

/// DashMap-backed store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn apply_one(&self, op: &KvOp) -> Result<i64> {
        match self.entries.entry(op.key().to_string()) {
            Entry::Occupied(mut occupied) => {
                let mut slot = Some(occupied.get().clone());
                let reply = apply_op(&mut slot, op)?;
                match slot {
                    Some(value) => {
                        occupied.insert(value);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                Ok(reply)
            }
            Entry::Vacant(vacant) => {
                let mut slot = None;
                let reply = apply_op(&mut slot, op)?;
                if let Some(value) = slot {
                    vacant.insert(value);
                }
                Ok(reply)
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn apply(&self, ops: Vec<KvOp>) -> Result<Vec<i64>> {
        ops.iter().map(|op| self.apply_one(op)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ScanCursor, StoreError};

    #[tokio::test]
    async fn test_hash_primitives() {
        let store = MemoryStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store.hset("h", "b", "2").await.unwrap();

        assert_eq!(store.hget("h", "a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(
            store.hmget("h", &["b", "zz", "a"]).await.unwrap(),
            vec![Some("2".to_string()), None, Some("1".to_string())]
        );
        assert_eq!(store.hgetall("h").await.unwrap().len(), 2);

        assert!(store.hdel("h", "a").await.unwrap());
        assert!(!store.hdel("h", "a").await.unwrap());
        assert!(store.hdel("h", "b").await.unwrap());
        // Empty hashes disappear
        assert!(!store.exists("h").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_and_scan() {
        let store = MemoryStore::new();
        for i in 0..7 {
            assert!(store.sadd("s", &format!("m{}", i)).await.unwrap());
        }
        assert!(!store.sadd("s", "m0").await.unwrap());

        let mut seen = Vec::new();
        let mut cursor = ScanCursor::start();
        loop {
            let page = store.sscan("s", &cursor, 3).await.unwrap();
            assert!(page.items.len() <= 3);
            seen.extend(page.items);
            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(store.smembers("s").await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert!(matches!(
            store.hgetall("k").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(store.rpush("k", "x").await.is_err());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.hincrby("counts", "x", 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(
            store.hget("counts", "x").await.unwrap().as_deref(),
            Some("800")
        );
    }
}
