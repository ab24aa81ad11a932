//! Topic filter tree
//!
//! Every active wildcard filter is a path from the root, terminated by the
//! [`END`] marker. Each tree node is one hash in the store mapping a child
//! segment to the number of subscriptions whose path passes through it, so
//! `sensors/+/temp` contributes one count to each of:
//!
//! ```text
//! topic:filter:children:                 sensors -> 1
//! topic:filter:children:sensors          +       -> 1
//! topic:filter:children:sensors/+        temp    -> 1
//! topic:filter:children:sensors/+/temp   END     -> 1
//! ```
//!
//! Matching does not descend the tree in one call. A [`FilterWalk`] hands out
//! [`LevelQuery`]s, the caller resolves each one with
//! [`FilterTree::match_level`] (or any other way it likes, e.g. batched), and
//! feeds the answers back. Branches that end in `#` stop early.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::try_join_all;
use tracing::trace;

use super::levels::{TopicLevels, END, MULTI_WILDCARD, SINGLE_WILDCARD};
use crate::store::{keys, KvOp, KvStore, Result};

/// Children with a positive count found at one tree node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelCandidates {
    /// Child named after the topic level itself
    pub literal: bool,
    /// `+` child
    pub single_level: bool,
    /// `#` child
    pub multi_level: bool,
    /// [`END`] child: a filter ends at this node
    pub end: bool,
}

impl LevelCandidates {
    pub fn is_empty(&self) -> bool {
        !(self.literal || self.single_level || self.multi_level || self.end)
    }
}

/// One tree lookup requested by a walk
///
/// `path[..index]` is the filter prefix explored so far (with `+` where a
/// single-level wildcard was followed) and `path[index..]` the remaining
/// levels of the published topic, ending with [`END`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelQuery {
    pub path: Vec<String>,
    pub index: usize,
}

impl LevelQuery {
    /// Tree node this query reads
    pub fn node(&self) -> &[String] {
        &self.path[..self.index]
    }

    /// Whether the query sits on the terminal [`END`] position
    pub fn is_terminal(&self) -> bool {
        self.index + 1 == self.path.len()
    }

    /// Child fields to read from the node
    pub fn fields(&self) -> Vec<&str> {
        if self.is_terminal() {
            vec![END, MULTI_WILDCARD]
        } else {
            vec![self.path[self.index].as_str(), MULTI_WILDCARD, SINGLE_WILDCARD]
        }
    }

    /// Interpret the counts read for [`LevelQuery::fields`]
    pub fn candidates(&self, counts: &[Option<String>]) -> LevelCandidates {
        let positive = |i: usize| {
            counts
                .get(i)
                .and_then(|c| c.as_deref())
                .and_then(|c| c.parse::<i64>().ok())
                .is_some_and(|c| c > 0)
        };
        if self.is_terminal() {
            LevelCandidates {
                end: positive(0),
                multi_level: positive(1),
                ..Default::default()
            }
        } else {
            LevelCandidates {
                literal: positive(0),
                multi_level: positive(1),
                single_level: positive(2),
                ..Default::default()
            }
        }
    }
}

/// Level-by-level matching cursor for one published topic
///
/// Holds no store handle: it only says which node to look at next and turns
/// the answers into matching filters.
#[derive(Debug)]
pub struct FilterWalk {
    system: bool,
    pending: VecDeque<LevelQuery>,
    matches: Vec<TopicLevels>,
}

impl FilterWalk {
    pub fn new(topic: &TopicLevels) -> Self {
        let mut pending = VecDeque::with_capacity(4);
        pending.push_back(LevelQuery {
            path: topic.tree_path(),
            index: 0,
        });
        Self {
            system: topic.is_system(),
            pending,
            matches: Vec::new(),
        }
    }

    /// Next lookup to perform, if the walk is not finished
    pub fn next_query(&mut self) -> Option<LevelQuery> {
        self.pending.pop_front()
    }

    /// Every lookup that can be issued right now, for batching
    pub fn drain_queries(&mut self) -> Vec<LevelQuery> {
        self.pending.drain(..).collect()
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    /// Feed back the candidates found for `query`
    pub fn advance(&mut self, query: LevelQuery, found: LevelCandidates) {
        // $-topics are never matched by a wildcard in the first level
        let wildcards = !(self.system && query.index == 0);
        let node = query.node();

        if found.multi_level && wildcards {
            self.matches.push(TopicLevels::from_segments(
                node.iter().map(String::as_str).chain([MULTI_WILDCARD]),
            ));
        }

        if query.is_terminal() {
            if found.end {
                self.matches.push(TopicLevels::from_segments(node));
            }
            return;
        }

        let next = query.index + 1;
        if found.single_level && wildcards {
            let mut path = query.path.clone();
            path[query.index] = SINGLE_WILDCARD.to_string();
            self.pending.push_back(LevelQuery { path, index: next });
        }
        if found.literal {
            self.pending.push_back(LevelQuery {
                path: query.path,
                index: next,
            });
        }
    }

    /// Filters matched so far
    pub fn matches(&self) -> &[TopicLevels] {
        &self.matches
    }

    pub fn into_matches(self) -> Vec<TopicLevels> {
        self.matches
    }
}

/// Filter tree persisted in a [`KvStore`]
#[derive(Clone)]
pub struct FilterTree {
    store: Arc<dyn KvStore>,
}

impl FilterTree {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Candidate children of the node `path[..index]` for level `index`.
    ///
    /// On the terminal position only `END` and `#` are asked for; on any
    /// other level the literal segment, `#` and `+`.
    pub async fn match_level(&self, path: &[String], index: usize) -> Result<LevelCandidates> {
        let query = LevelQuery {
            path: path.to_vec(),
            index,
        };
        self.resolve(&query).await
    }

    async fn resolve(&self, query: &LevelQuery) -> Result<LevelCandidates> {
        let counts = self
            .store
            .hmget(&keys::topic_filter_child(query.node()), &query.fields())
            .await?;
        Ok(query.candidates(&counts))
    }

    /// All indexed filters matching a topic name.
    ///
    /// Drives a [`FilterWalk`] to completion, resolving each wave of pending
    /// lookups concurrently. Stale counts can yield filters nobody is
    /// subscribed to any more; callers filter those out by their subscriber
    /// tables.
    pub async fn matching_filters(&self, topic: &TopicLevels) -> Result<Vec<TopicLevels>> {
        let mut walk = FilterWalk::new(topic);
        while !walk.is_done() {
            let wave = walk.drain_queries();
            let found = try_join_all(wave.iter().map(|q| self.resolve(q))).await?;
            for (query, candidates) in wave.into_iter().zip(found) {
                walk.advance(query, candidates);
            }
        }
        trace!(topic = %topic, matches = walk.matches().len(), "filter walk complete");
        Ok(walk.into_matches())
    }

    /// Ops adding one reference along the filter's path
    pub fn insert_ops(filter: &TopicLevels) -> Vec<KvOp> {
        Self::count_ops(filter, 1)
    }

    /// Ops removing one reference along the filter's path
    pub fn remove_ops(filter: &TopicLevels) -> Vec<KvOp> {
        Self::count_ops(filter, -1)
    }

    fn count_ops(filter: &TopicLevels, delta: i64) -> Vec<KvOp> {
        let path = filter.tree_path();
        (0..path.len())
            .map(|i| KvOp::HIncrBy {
                key: keys::topic_filter_child(&path[..i]),
                field: path[i].clone(),
                delta,
            })
            .collect()
    }

    /// Reference count of `segment` under the node `prefix`
    pub async fn child_count(&self, prefix: &[String], segment: &str) -> Result<i64> {
        let raw = self
            .store
            .hget(&keys::topic_filter_child(prefix), segment)
            .await?;
        Ok(raw.and_then(|c| c.parse().ok()).unwrap_or(0))
    }
}
