//! Topic name and filter validation
//!
//! Rules follow MQTT 3.1.1 section 4.7 on topic names and topic filters.
//!
//! Key rules:
//! - Topic names MUST NOT contain wildcards (+ or #)
//! - Topic filters MAY contain wildcards
//! - Multi-level wildcard (#) must be the last level
//! - Single-level wildcard (+) must occupy entire level
//! - Levels must not be empty, since they become store key segments
//! - Topics starting with $ are system topics and have special matching rules

use super::TopicError;

/// Maximum encoded topic length
const MAX_TOPIC_LEN: usize = 65535;

/// Represents a level in a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicLevel<'a> {
    /// Normal topic level
    Normal(&'a str),
    /// Single-level wildcard (+)
    SingleWildcard,
    /// Multi-level wildcard (#)
    MultiWildcard,
}

/// Parse topic into levels
pub fn parse_levels(topic: &str) -> impl Iterator<Item = TopicLevel<'_>> {
    topic.split('/').map(|level| match level {
        "+" => TopicLevel::SingleWildcard,
        "#" => TopicLevel::MultiWildcard,
        s => TopicLevel::Normal(s),
    })
}

fn check_common(topic: &str, max_topic_levels: usize) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::MalformedTopic("topic cannot be empty"));
    }

    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::MalformedTopic("topic exceeds maximum length"));
    }

    if topic.contains('\0') {
        return Err(TopicError::MalformedTopic(
            "topic cannot contain null character",
        ));
    }

    // Check max topic levels (0 = unlimited)
    if max_topic_levels > 0 && topic.split('/').count() > max_topic_levels {
        return Err(TopicError::MalformedTopic(
            "topic exceeds maximum allowed levels",
        ));
    }

    if topic.split('/').any(str::is_empty) {
        return Err(TopicError::MalformedTopic("topic level cannot be empty"));
    }

    Ok(())
}

/// Validate a topic name (used in PUBLISH)
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    validate_topic_name_with_max_levels(topic, 0)
}

/// Validate a topic name with configurable max levels
///
/// Topic names:
/// - Must be at least 1 character
/// - Must not exceed 65535 bytes
/// - Must not contain null character
/// - Must not contain wildcards (+ or #)
/// - Must not contain empty levels
/// - Must not exceed max_topic_levels if set (0 = unlimited)
pub fn validate_topic_name_with_max_levels(
    topic: &str,
    max_topic_levels: usize,
) -> Result<(), TopicError> {
    check_common(topic, max_topic_levels)?;

    if topic.contains('+') || topic.contains('#') {
        return Err(TopicError::MalformedTopic(
            "topic name cannot contain wildcards",
        ));
    }

    Ok(())
}

/// Validate a topic filter (used in SUBSCRIBE/UNSUBSCRIBE)
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    validate_topic_filter_with_max_levels(filter, 0)
}

/// Validate a topic filter with configurable max levels
///
/// Topic filters:
/// - Must be at least 1 character
/// - Must not exceed 65535 bytes
/// - Must not contain null character
/// - Must not contain empty levels
/// - Multi-level wildcard (#) must occupy the entire last level
/// - Single-level wildcard (+) must occupy an entire level
/// - Must not exceed max_topic_levels if set (0 = unlimited)
pub fn validate_topic_filter_with_max_levels(
    filter: &str,
    max_topic_levels: usize,
) -> Result<(), TopicError> {
    check_common(filter, max_topic_levels)?;

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err(TopicError::MalformedTopic(
                    "multi-level wildcard must occupy entire level",
                ));
            }
            if i != levels.len() - 1 {
                return Err(TopicError::MalformedTopic(
                    "multi-level wildcard must be last level",
                ));
            }
        }

        if level.contains('+') && *level != "+" {
            return Err(TopicError::MalformedTopic(
                "single-level wildcard must occupy entire level",
            ));
        }
    }

    Ok(())
}

/// Check if a topic filter matches a topic name
///
/// Matching rules:
/// - / is the level separator
/// - + matches exactly one level
/// - # matches zero or more levels (must be last)
/// - $-topics don't match filters starting with + or #
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');

    for filter_level in parse_levels(filter) {
        match filter_level {
            // # matches everything remaining, including the parent level
            TopicLevel::MultiWildcard => return true,
            TopicLevel::SingleWildcard => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            TopicLevel::Normal(expected) => match topic_levels.next() {
                Some(level) if level == expected => {}
                _ => return false,
            },
        }
    }

    // Both must be exhausted for a match
    topic_levels.next().is_none()
}
