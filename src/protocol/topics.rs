//! Topic names, topic filters and keyword matching
//!
//! MQTT topic rules as the broker applies them: `+` matches exactly one level,
//! `#` matches every remaining level and may only appear last, and topics that
//! start with `$` are invisible to filters that start with a wildcard.

use thiserror::Error;

/// Catch-all filter used by discovery and unfiltered recordings
pub const CATCH_ALL_FILTER: &str = "#";

/// Longest topic the MQTT wire format can carry
pub const MAX_TOPIC_LEN: usize = 65_535;

/// Validate a topic name used for publishing or point reads
pub fn validate_topic_name(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(ValidationError::TopicTooLong(topic.len()));
    }
    if let Some(ch) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(ValidationError::InvalidTopicChar(ch));
    }
    Ok(())
}

/// Validate a subscription filter
pub fn validate_topic_filter(filter: &str) -> Result<(), ValidationError> {
    if filter.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(ValidationError::TopicTooLong(filter.len()));
    }
    if filter.contains('\0') {
        return Err(ValidationError::InvalidTopicChar('\0'));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(ValidationError::InvalidFilter(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(ValidationError::InvalidFilter(filter.to_string()));
        }
    }
    Ok(())
}

/// Whether a filter contains wildcard levels
pub fn is_wildcard_filter(filter: &str) -> bool {
    filter.split('/').any(|level| level == "+" || level == "#")
}

/// Check if a topic matches a subscription filter
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    if topic == filter {
        return true;
    }

    let mut topic_levels = topic.split('/');
    for filter_level in filter.split('/') {
        match filter_level {
            "#" => return true,
            "+" => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            literal => match topic_levels.next() {
                Some(level) if level == literal => {}
                _ => return false,
            },
        }
    }
    topic_levels.next().is_none()
}

/// Case-insensitive substring match against any keyword; no keywords matches everything
pub fn matches_keywords<S: AsRef<str>>(topic: &str, keywords: &[S]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let topic = topic.to_lowercase();
    keywords
        .iter()
        .any(|keyword| topic.contains(&keyword.as_ref().to_lowercase()))
}

/// Whether a topic falls under one of the ignored prefixes
pub fn is_ignored_topic<S: AsRef<str>>(topic: &str, prefixes: &[S]) -> bool {
    prefixes
        .iter()
        .any(|prefix| topic.starts_with(prefix.as_ref()))
}

/// Hint returned when a point read finds nothing
pub fn discovery_suggestion(topic: &str) -> String {
    let levels: Vec<&str> = topic.split('/').collect();
    if levels.len() > 1 {
        let base = levels[..2].join("/");
        format!(
            "Try discovering topics with keywords='{}' or check if topic '{base}/#' exists",
            levels[0]
        )
    } else {
        format!("Try discovering topics with keywords='{topic}'")
    }
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Topic is {0} bytes long, the limit is 65535")]
    TopicTooLong(usize),
    #[error("Topic contains invalid character: {0:?}")]
    InvalidTopicChar(char),
    #[error("Invalid topic filter: '{0}'")]
    InvalidFilter(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn topic_always_matches_itself(topic in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,5}") {
            prop_assert!(topic_matches_filter(&topic, &topic));
        }

        #[test]
        fn catch_all_matches_any_plain_topic(topic in "[a-z0-9]{1,8}(/[a-z0-9]{0,8}){0,5}") {
            prop_assert!(topic_matches_filter(&topic, CATCH_ALL_FILTER));
        }

        #[test]
        fn replacing_first_level_with_plus_still_matches(
            head in "[a-z]{1,8}",
            tail in "(/[a-z0-9]{1,8}){0,4}",
        ) {
            let topic = format!("{head}{tail}");
            let filter = format!("+{tail}");
            prop_assert!(topic_matches_filter(&topic, &filter));
        }

        #[test]
        fn keywords_are_case_insensitive(topic in "[a-zA-Z/]{1,30}") {
            let upper = topic.to_uppercase();
            prop_assert!(matches_keywords(&topic, &[upper]));
        }
    }

    #[test]
    fn test_exact_and_literal_mismatch() {
        assert!(topic_matches_filter("home/door/front", "home/door/front"));
        assert!(!topic_matches_filter("home/door/front", "home/door/back"));
        assert!(!topic_matches_filter("home/door", "home/door/front"));
        assert!(!topic_matches_filter("home/door/front", "home/door"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches_filter("home/door/front", "home/+/front"));
        assert!(topic_matches_filter("home/door", "home/+"));
        assert!(!topic_matches_filter("home", "home/+"));
        assert!(!topic_matches_filter("home/door/front", "home/+"));
        assert!(topic_matches_filter("home/", "home/+"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches_filter("home", "home/#"));
        assert!(topic_matches_filter("home/door/front", "home/#"));
        assert!(topic_matches_filter("home/door/front", "+/door/#"));
        assert!(!topic_matches_filter("office/door", "home/#"));
    }

    #[test]
    fn test_system_topics_hidden_from_leading_wildcards() {
        assert!(!topic_matches_filter("$SYS/broker/uptime", "#"));
        assert!(!topic_matches_filter("$SYS/broker/uptime", "+/broker/uptime"));
        assert!(topic_matches_filter("$SYS/broker/uptime", "$SYS/#"));
    }

    #[test]
    fn test_validate_topic_name() {
        assert!(validate_topic_name("home/door/front").is_ok());
        assert_eq!(validate_topic_name(""), Err(ValidationError::EmptyTopic));
        assert_eq!(
            validate_topic_name("home/+/front"),
            Err(ValidationError::InvalidTopicChar('+'))
        );
        assert_eq!(
            validate_topic_name("home/#"),
            Err(ValidationError::InvalidTopicChar('#'))
        );
        assert!(matches!(
            validate_topic_name(&"x".repeat(MAX_TOPIC_LEN + 1)),
            Err(ValidationError::TopicTooLong(_))
        ));
    }

    #[test]
    fn test_validate_topic_filter() {
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("home/+/front").is_ok());
        assert!(validate_topic_filter("home/#").is_ok());
        assert!(validate_topic_filter("").is_err());
        assert!(validate_topic_filter("home/#/front").is_err());
        assert!(validate_topic_filter("home/door#").is_err());
        assert!(validate_topic_filter("home/do+or").is_err());
    }

    #[test]
    fn test_is_wildcard_filter() {
        assert!(is_wildcard_filter("#"));
        assert!(is_wildcard_filter("home/+/temp"));
        assert!(!is_wildcard_filter("home/door/front"));
    }

    #[test]
    fn test_matches_keywords_or_logic() {
        let keywords = ["door", "WINDOW"];
        assert!(matches_keywords("home/door/front", &keywords));
        assert!(matches_keywords("home/Window/side", &keywords));
        assert!(!matches_keywords("home/light/kitchen", &keywords));
        assert!(matches_keywords::<&str>("anything", &[]));
    }

    #[test]
    fn test_is_ignored_topic() {
        let prefixes = ["zigbee2mqtt/bridge/", "homeassistant/"];
        assert!(is_ignored_topic("zigbee2mqtt/bridge/state", &prefixes));
        assert!(is_ignored_topic("homeassistant/sensor/config", &prefixes));
        assert!(!is_ignored_topic("zigbee2mqtt/kitchen_plug", &prefixes));
    }

    #[test]
    fn test_discovery_suggestion() {
        assert_eq!(
            discovery_suggestion("zigbee2mqtt/kitchen/plug"),
            "Try discovering topics with keywords='zigbee2mqtt' or check if topic 'zigbee2mqtt/kitchen/#' exists"
        );
        assert_eq!(
            discovery_suggestion("thermostat"),
            "Try discovering topics with keywords='thermostat'"
        );
    }
}
