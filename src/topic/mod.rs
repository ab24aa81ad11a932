//! Topic model and wildcard matching
//!
//! Topic names and filters are validated and split into [`TopicLevels`]
//! before they reach any store. Wildcard filters are indexed in the
//! [`FilterTree`], a tree of per-level reference counts persisted as one hash
//! per tree node, and matched against published topic names with a
//! [`FilterWalk`] that issues one node lookup per level.

mod levels;
mod tree;
pub mod validation;

pub use levels::{
    is_filter, join, TopicLevels, END, MULTI_WILDCARD, SEPARATOR, SINGLE_WILDCARD,
};
pub use tree::{FilterTree, FilterWalk, LevelCandidates, LevelQuery};
pub use validation::{
    topic_matches_filter, validate_topic_filter, validate_topic_filter_with_max_levels,
    validate_topic_name, validate_topic_name_with_max_levels, TopicLevel,
};

use std::fmt;

/// Topic validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// Bad level structure, with the reason
    MalformedTopic(&'static str),
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedTopic(reason) => write!(f, "malformed topic: {}", reason),
        }
    }
}

impl std::error::Error for TopicError {}
