//! Parsed topic levels
//!
//! A [`TopicLevels`] is the validated, split form of a topic name or topic
//! filter. It is the only way topics reach the stores, so every key built from
//! it is free of empty or malformed segments.

use std::fmt;
use std::str::FromStr;

use compact_str::CompactString;
use smallvec::SmallVec;

use super::validation::{
    validate_topic_filter_with_max_levels, validate_topic_name_with_max_levels,
};
use super::TopicError;

/// Level separator
pub const SEPARATOR: char = '/';

/// Single-level wildcard
pub const SINGLE_WILDCARD: &str = "+";

/// Multi-level wildcard
pub const MULTI_WILDCARD: &str = "#";

/// Terminal marker in the filter tree: "a filter ends exactly here".
///
/// Contains a null character, which validation rejects in every topic, so it
/// can never collide with a real level.
pub const END: &str = "\u{0}";

/// Returns true if any level is a wildcard
pub fn is_filter<S: AsRef<str>>(levels: &[S]) -> bool {
    levels
        .iter()
        .any(|l| l.as_ref() == SINGLE_WILDCARD || l.as_ref() == MULTI_WILDCARD)
}

/// Ordered, non-empty sequence of topic levels
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicLevels {
    levels: SmallVec<[CompactString; 8]>,
}

impl TopicLevels {
    /// Parse a topic name or topic filter
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        Self::parse_with_max_levels(topic, 0)
    }

    /// Parse a topic name or filter, rejecting more than `max_topic_levels`
    /// levels (0 = unlimited)
    pub fn parse_with_max_levels(topic: &str, max_topic_levels: usize) -> Result<Self, TopicError> {
        validate_topic_filter_with_max_levels(topic, max_topic_levels)?;
        Ok(Self::split(topic))
    }

    /// Parse a topic name, rejecting wildcards
    pub fn parse_name(topic: &str) -> Result<Self, TopicError> {
        Self::parse_name_with_max_levels(topic, 0)
    }

    pub fn parse_name_with_max_levels(topic: &str, max_topic_levels: usize) -> Result<Self, TopicError> {
        validate_topic_name_with_max_levels(topic, max_topic_levels)?;
        Ok(Self::split(topic))
    }

    /// Build from segments already known to be valid (e.g. a tree path)
    pub(crate) fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            levels: segments
                .into_iter()
                .map(|s| CompactString::new(s.as_ref()))
                .collect(),
        }
    }

    fn split(topic: &str) -> Self {
        Self {
            levels: topic.split(SEPARATOR).map(CompactString::new).collect(),
        }
    }

    /// Whether this is a topic filter (contains `+` or `#`)
    pub fn is_filter(&self) -> bool {
        is_filter(self.levels.as_slice())
    }

    /// Whether this is a `$`-prefixed system topic
    pub fn is_system(&self) -> bool {
        self.levels[0].starts_with('$')
    }

    /// Number of levels (never zero)
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.levels.get(index).map(CompactString::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().map(CompactString::as_str)
    }

    /// Levels joined back with `/`
    pub fn joined(&self) -> String {
        join(self.levels.as_slice())
    }

    /// Path of this topic through the filter tree: every level followed by
    /// the [`END`] marker
    pub fn tree_path(&self) -> Vec<String> {
        self.iter()
            .map(str::to_string)
            .chain(std::iter::once(END.to_string()))
            .collect()
    }
}

/// Join levels with `/`
pub fn join<S: AsRef<str>>(levels: &[S]) -> String {
    let mut out = String::new();
    for (i, level) in levels.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(level.as_ref());
    }
    out
}

impl FromStr for TopicLevels {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("a", 1, false ; "single level name")]
    #[test_case("a/b/c", 3, false ; "multi level name")]
    #[test_case("sensors/+/temp", 3, true ; "single wildcard filter")]
    #[test_case("a/#", 2, true ; "multi wildcard filter")]
    #[test_case("#", 1, true ; "bare multi wildcard")]
    #[test_case("$SYS/uptime", 2, false ; "system topic")]
    fn test_parse_valid(topic: &str, len: usize, filter: bool) {
        let levels = TopicLevels::parse(topic).unwrap();
        assert_eq!(levels.len(), len);
        assert_eq!(levels.is_filter(), filter);
        assert_eq!(levels.joined(), topic);
    }

    #[test_case("" ; "empty")]
    #[test_case("a//b" ; "empty middle level")]
    #[test_case("/a" ; "leading separator")]
    #[test_case("a/" ; "trailing separator")]
    #[test_case("a/#/b" ; "multi wildcard not last")]
    #[test_case("a/b#" ; "multi wildcard inside level")]
    #[test_case("a+/b" ; "single wildcard inside level")]
    fn test_parse_malformed(topic: &str) {
        assert!(matches!(
            TopicLevels::parse(topic),
            Err(TopicError::MalformedTopic(_))
        ));
    }

    #[test]
    fn test_parse_name_rejects_wildcards() {
        assert!(TopicLevels::parse_name("a/+").is_err());
        assert!(TopicLevels::parse_name("a/b").is_ok());
    }

    #[test]
    fn test_tree_path_ends_with_marker() {
        let levels: TopicLevels = "a/+".parse().unwrap();
        assert_eq!(levels.tree_path(), vec!["a", "+", END]);
        assert!(levels.get(2).is_none());
        assert!(!levels.is_system());
        assert!(TopicLevels::parse("$SYS/#").unwrap().is_system());
    }

    #[test]
    fn test_is_filter_free_fn() {
        assert!(is_filter(&["a", "+"]));
        assert!(is_filter(&["#"]));
        assert!(!is_filter(&["a", "b"]));
    }
}
