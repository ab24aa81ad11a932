//! Stored value shapes and the write operations that mutate them.
//!
//! Both backends share this logic: a backend only decides where a [`Value`]
//! lives and how many ops commit together.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use bincode::{Decode, Encode};

use super::error::{Result, StoreError};

/// Value held under a single key
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Value {
    /// Plain string
    Scalar(String),
    /// Field -> value map
    Hash(BTreeMap<String, String>),
    /// Unordered set (iterated in sorted order)
    Set(BTreeSet<String>),
    /// Ordered list
    List(Vec<String>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Scalar(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
        }
    }
}

/// Write operation against a single key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// Set a scalar
    Set { key: String, value: String },
    /// Delete a key of any shape
    Del { key: String },
    /// Set one hash field
    HSet {
        key: String,
        field: String,
        value: String,
    },
    /// Set several hash fields
    HMSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Delete one hash field
    HDel { key: String, field: String },
    /// Add `delta` to an integer hash field; the result saturates at zero and
    /// a field reaching zero is pruned
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// Add a set member
    SAdd { key: String, member: String },
    /// Remove a set member
    SRem { key: String, member: String },
    /// Append to the tail of a list
    RPush { key: String, value: String },
    /// Remove every occurrence of `value` from a list
    LRem { key: String, value: String },
}

impl KvOp {
    pub fn key(&self) -> &str {
        match self {
            KvOp::Set { key, .. }
            | KvOp::Del { key }
            | KvOp::HSet { key, .. }
            | KvOp::HMSet { key, .. }
            | KvOp::HDel { key, .. }
            | KvOp::HIncrBy { key, .. }
            | KvOp::SAdd { key, .. }
            | KvOp::SRem { key, .. }
            | KvOp::RPush { key, .. }
            | KvOp::LRem { key, .. } => key,
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

pub(crate) fn as_hash<'a>(key: &str, value: &'a Value) -> Result<&'a BTreeMap<String, String>> {
    match value {
        Value::Hash(h) => Ok(h),
        _ => Err(wrong_type(key, "hash")),
    }
}

pub(crate) fn as_set<'a>(key: &str, value: &'a Value) -> Result<&'a BTreeSet<String>> {
    match value {
        Value::Set(s) => Ok(s),
        _ => Err(wrong_type(key, "set")),
    }
}

pub(crate) fn as_list<'a>(key: &str, value: &'a Value) -> Result<&'a Vec<String>> {
    match value {
        Value::List(l) => Ok(l),
        _ => Err(wrong_type(key, "list")),
    }
}

pub(crate) fn as_scalar<'a>(key: &str, value: &'a Value) -> Result<&'a str> {
    match value {
        Value::Scalar(s) => Ok(s),
        _ => Err(wrong_type(key, "scalar")),
    }
}

fn hash_mut<'a>(key: &str, slot: &'a mut Option<Value>) -> Result<&'a mut BTreeMap<String, String>> {
    match slot.get_or_insert_with(|| Value::Hash(BTreeMap::new())) {
        Value::Hash(h) => Ok(h),
        _ => Err(wrong_type(key, "hash")),
    }
}

fn set_mut<'a>(key: &str, slot: &'a mut Option<Value>) -> Result<&'a mut BTreeSet<String>> {
    match slot.get_or_insert_with(|| Value::Set(BTreeSet::new())) {
        Value::Set(s) => Ok(s),
        _ => Err(wrong_type(key, "set")),
    }
}

fn list_mut<'a>(key: &str, slot: &'a mut Option<Value>) -> Result<&'a mut Vec<String>> {
    match slot.get_or_insert_with(|| Value::List(Vec::new())) {
        Value::List(l) => Ok(l),
        _ => Err(wrong_type(key, "list")),
    }
}

/// Apply `op` to the value slot of its key.
///
/// Returns the integer reply of the operation: the new field value for
/// `HIncrBy`, the list length for `RPush`, otherwise the number of elements
/// added or removed. On error the slot is left untouched. Empty collections
/// are removed from the slot.
pub(crate) fn apply_op(slot: &mut Option<Value>, op: &KvOp) -> Result<i64> {
    let key = op.key();
    let reply = match op {
        KvOp::Set { value, .. } => {
            *slot = Some(Value::Scalar(value.clone()));
            1
        }
        KvOp::Del { .. } => i64::from(slot.take().is_some()),
        KvOp::HSet { field, value, .. } => {
            let hash = hash_mut(key, slot)?;
            i64::from(hash.insert(field.clone(), value.clone()).is_none())
        }
        KvOp::HMSet { fields, .. } => {
            let hash = hash_mut(key, slot)?;
            let mut added = 0;
            for (field, value) in fields {
                if hash.insert(field.clone(), value.clone()).is_none() {
                    added += 1;
                }
            }
            added
        }
        KvOp::HDel { field, .. } => match slot {
            None => 0,
            Some(_) => i64::from(hash_mut(key, slot)?.remove(field).is_some()),
        },
        KvOp::HIncrBy { field, delta, .. } => {
            let current = match slot {
                None => 0,
                Some(Value::Hash(h)) => match h.get(field) {
                    Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                        key: key.to_string(),
                        field: field.clone(),
                    })?,
                    None => 0,
                },
                Some(_) => return Err(wrong_type(key, "hash")),
            };
            let next = current.saturating_add(*delta).max(0);
            let hash = hash_mut(key, slot)?;
            if next == 0 {
                hash.remove(field);
            } else {
                hash.insert(field.clone(), next.to_string());
            }
            next
        }
        KvOp::SAdd { member, .. } => i64::from(set_mut(key, slot)?.insert(member.clone())),
        KvOp::SRem { member, .. } => match slot {
            None => 0,
            Some(_) => i64::from(set_mut(key, slot)?.remove(member)),
        },
        KvOp::RPush { value, .. } => {
            let list = list_mut(key, slot)?;
            list.push(value.clone());
            list.len() as i64
        }
        KvOp::LRem { value, .. } => match slot {
            None => 0,
            Some(_) => {
                let list = list_mut(key, slot)?;
                let before = list.len();
                list.retain(|v| v != value);
                (before - list.len()) as i64
            }
        },
    };

    if slot.as_ref().is_some_and(Value::is_empty) {
        *slot = None;
    }
    Ok(reply)
}

/// Opaque position in a set scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCursor(Option<String>);

impl ScanCursor {
    /// Cursor that starts a new scan
    pub fn start() -> Self {
        Self(None)
    }

    pub fn is_start(&self) -> bool {
        self.0.is_none()
    }
}

/// One page of a set scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Members in this page
    pub items: Vec<String>,
    /// Cursor for the next page, `None` once the scan is complete
    pub next: Option<ScanCursor>,
}

/// Page through a set in sorted member order
pub(crate) fn scan_set(set: &BTreeSet<String>, cursor: &ScanCursor, count: usize) -> ScanPage {
    let count = count.max(1);
    let lower = match &cursor.0 {
        Some(last) => Bound::Excluded(last.clone()),
        None => Bound::Unbounded,
    };
    let mut range = set.range((lower, Bound::Unbounded));
    let items: Vec<String> = range.by_ref().take(count).cloned().collect();
    let next = match (range.next(), items.last()) {
        (Some(_), Some(last)) => Some(ScanCursor(Some(last.clone()))),
        _ => None,
    };
    ScanPage { items, next }
}

/// Slice a list with inclusive, possibly negative, indices
pub(crate) fn list_range(list: &[String], start: i64, stop: i64) -> Vec<String> {
    let len = list.len() as i64;
    let norm = |i: i64| if i < 0 { len + i } else { i };
    let start = norm(start).max(0);
    let stop = norm(stop).min(len - 1);
    if len == 0 || start > stop {
        return Vec::new();
    }
    list[start as usize..=stop as usize].to_vec()
}
