//! Topic conventions for module traffic
//!
//! `status/<name>` carries the periodic heartbeat and `log/<name>` the
//! redirected log lines.

pub const TOPIC_SEPARATOR: char = '/';
pub const STATUS_TOPIC_PREFIX: &str = "status";
pub const LOG_TOPIC_PREFIX: &str = "log";

/// Topic construction for reserved module topics
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build heartbeat topic: `status/{name}`
    pub fn build_status_topic(name: &str) -> String {
        format!("{STATUS_TOPIC_PREFIX}{TOPIC_SEPARATOR}{name}")
    }

    /// Build log topic: `log/{name}`
    pub fn build_log_topic(name: &str) -> String {
        format!("{LOG_TOPIC_PREFIX}{TOPIC_SEPARATOR}{name}")
    }
}

/// Final path segment of `topic`; the whole topic when it has no separator
pub fn measurement_of(topic: &str) -> &str {
    match topic.rfind(TOPIC_SEPARATOR) {
        Some(index) => &topic[index + TOPIC_SEPARATOR.len_utf8()..],
        None => topic,
    }
}
