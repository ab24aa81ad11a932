//! Key-value store trait.
//!
//! The engine only needs a handful of Redis-style primitives over four value
//! shapes (scalar, hash, set, list). A backend provides two things: reading a
//! key's value and applying a batch of write ops. Every other primitive is
//! derived from those.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use super::error::Result;
use super::value::{
    as_hash, as_list, as_scalar, as_set, list_range, scan_set, KvOp, ScanCursor, ScanPage, Value,
};

/// Shared key-value store
///
/// Implementations must be safe to call from many tasks at once. Each op in
/// [`KvStore::apply`] is atomic on its own key; whether the whole batch is
/// atomic is reported by [`KvStore::supports_atomic_batch`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    /// Apply write ops in order, returning one integer reply per op
    async fn apply(&self, ops: Vec<KvOp>) -> Result<Vec<i64>>;

    /// Whether `apply` commits all ops of a batch atomically
    fn supports_atomic_batch(&self) -> bool {
        false
    }

    /// Flush pending writes to durable storage
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Apply a single write op
    async fn execute(&self, op: KvOp) -> Result<i64> {
        let mut replies = self.apply(vec![op]).await?;
        Ok(replies.pop().unwrap_or(0))
    }

    // ========================================================================
    // Scalars
    // ========================================================================

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.load(key).await? {
            Some(value) => Ok(Some(as_scalar(key, &value)?.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.execute(KvOp::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.load(key).await?.is_some())
    }

    /// Delete a key of any shape; returns whether it existed
    async fn del(&self, key: &str) -> Result<bool> {
        let removed = self
            .execute(KvOp::Del {
                key: key.to_string(),
            })
            .await?;
        Ok(removed > 0)
    }

    // ========================================================================
    // Hashes
    // ========================================================================

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self.load(key).await? {
            Some(value) => Ok(as_hash(key, &value)?.get(field).cloned()),
            None => Ok(None),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.load(key).await? {
            Some(value) => Ok(as_hash(key, &value)?
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            None => Ok(HashMap::new()),
        }
    }

    /// Values of `fields`, in order; absent fields are `None`
    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        match self.load(key).await? {
            Some(value) => {
                let hash = as_hash(key, &value)?;
                Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect())
            }
            None => Ok(vec![None; fields.len()]),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.execute(KvOp::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let removed = self
            .execute(KvOp::HDel {
                key: key.to_string(),
                field: field.to_string(),
            })
            .await?;
        Ok(removed > 0)
    }

    /// Add `delta` to an integer field; the result never drops below zero
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.execute(KvOp::HIncrBy {
            key: key.to_string(),
            field: field.to_string(),
            delta,
        })
        .await
    }

    // ========================================================================
    // Sets
    // ========================================================================

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let added = self
            .execute(KvOp::SAdd {
                key: key.to_string(),
                member: member.to_string(),
            })
            .await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let removed = self
            .execute(KvOp::SRem {
                key: key.to_string(),
                member: member.to_string(),
            })
            .await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<BTreeSet<String>> {
        match self.load(key).await? {
            Some(value) => Ok(as_set(key, &value)?.clone()),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Page through a set, `count` members at a time
    async fn sscan(&self, key: &str, cursor: &ScanCursor, count: usize) -> Result<ScanPage> {
        match self.load(key).await? {
            Some(value) => Ok(scan_set(as_set(key, &value)?, cursor, count)),
            None => Ok(ScanPage::default()),
        }
    }

    // ========================================================================
    // Lists
    // ========================================================================

    /// Append to the tail; returns the new length
    async fn rpush(&self, key: &str, value: &str) -> Result<i64> {
        self.execute(KvOp::RPush {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// Elements between `start` and `stop` inclusive (negative counts from
    /// the tail, so `0, -1` is the whole list)
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        match self.load(key).await? {
            Some(value) => Ok(list_range(as_list(key, &value)?, start, stop)),
            None => Ok(Vec::new()),
        }
    }

    /// Remove every occurrence of `value`; returns how many were removed
    async fn lrem(&self, key: &str, value: &str) -> Result<i64> {
        self.execute(KvOp::LRem {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }
}
