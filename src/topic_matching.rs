//! Topic name / topic filter matching with `+` and `#` wildcard support.

use crate::error::{MqttError, Result};

/// Matches a topic name against a topic filter.
///
/// `+` matches exactly one level, `#` matches the rest of the topic and must
/// be the last level. Shared-subscription filters (`$share/<group>/...`) are
/// matched on the part after the group name.
///
/// ```
/// # use mqtt_duo::topic_matching::matches;
/// assert!(matches("sport/tennis", "sport/+"));
/// assert!(matches("sport/tennis/player1", "sport/#"));
/// assert!(matches("sport/tennis", "$share/pool/sport/+"));
/// assert!(!matches("sport/tennis", "sport/+/player1"));
/// ```
#[must_use]
pub fn matches(topic: &str, filter: &str) -> bool {
    if topic.is_empty() || !is_valid_topic(topic) {
        return false;
    }

    let filter = strip_shared_prefix(filter).unwrap_or(filter);
    if !is_valid_filter(filter) {
        return false;
    }

    if topic == filter {
        return true;
    }
    if filter == "#" {
        // "#" does not match $SYS-style topics.
        return !topic.starts_with('$');
    }

    let topic_parts: Vec<&str> = topic.split('/').collect();
    let filter_parts: Vec<&str> = filter.split('/').collect();

    // Wildcards at the first level never match topics starting with '$'.
    if topic.starts_with('$') && matches!(filter_parts.first(), Some(&"+") | Some(&"#")) {
        return false;
    }

    match_parts(&topic_parts, &filter_parts)
}

fn match_parts(topic_parts: &[&str], filter_parts: &[&str]) -> bool {
    match (topic_parts.first(), filter_parts.first()) {
        (None, None) => true,
        // "sport/#" also matches "sport" itself.
        (_, Some(&"#")) => filter_parts.len() == 1,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(&topic_part), Some(&filter_part)) => {
            (filter_part == "+" || filter_part == topic_part)
                && match_parts(&topic_parts[1..], &filter_parts[1..])
        }
    }
}

/// Matches a topic against any of the given filters. An empty list admits
/// everything.
#[must_use]
pub fn matches_any(topic: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| matches(topic, f))
}

/// Strips a `$share/<group>/` prefix, returning the inner filter.
#[must_use]
pub fn strip_shared_prefix(filter: &str) -> Option<&str> {
    let rest = filter.strip_prefix("$share/")?;
    let slash = rest.find('/')?;
    let inner = &rest[slash + 1..];
    (!inner.is_empty()).then_some(inner)
}

/// A topic name carries no wildcards and no null characters.
#[must_use]
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.contains('\0')
        && !topic.contains('+')
        && !topic.contains('#')
        && topic.len() <= usize::from(u16::MAX)
}

/// A topic filter may carry wildcards: `+` alone in its level, `#` alone and
/// last.
#[must_use]
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') || filter.len() > usize::from(u16::MAX) {
        return false;
    }

    let filter = strip_shared_prefix(filter).unwrap_or(filter);
    let parts: Vec<&str> = filter.split('/').collect();
    for (i, part) in parts.iter().enumerate() {
        if part.contains('#') {
            return *part == "#" && i == parts.len() - 1;
        }
        if part.contains('+') && *part != "+" {
            return false;
        }
    }
    true
}

/// Validates a topic name for publishing.
///
/// # Errors
///
/// Returns `InvalidTopicName` if the name is empty or carries wildcards.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || !is_valid_topic(topic) {
        return Err(MqttError::InvalidTopicName(topic.to_string()));
    }
    Ok(())
}

/// Validates a subscription filter.
///
/// # Errors
///
/// Returns `InvalidTopicFilter` for malformed wildcard placement.
pub fn validate_filter(filter: &str) -> Result<()> {
    if !is_valid_filter(filter) {
        return Err(MqttError::InvalidTopicFilter(filter.to_string()));
    }
    Ok(())
}
