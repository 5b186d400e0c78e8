//! NATS JetStream provider configuration

use serde::{Deserialize, Serialize};

/// Storage backend for the JetStream stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Persist messages on disk
    #[default]
    File,
    /// Keep messages in server memory only
    Memory,
}

/// Connection and stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// JetStream stream holding every cache topic
    pub stream_name: String,

    /// Subject prefix shared by all topics (`cache` covers `cache.>`)
    pub subject_prefix: String,

    pub storage: StorageType,

    /// Maximum retained messages (-1 = unlimited)
    pub max_events: i64,

    /// Maximum message age in seconds (0 = unlimited)
    pub max_age_secs: u64,

    /// Maximum stream size in bytes (-1 = unlimited)
    pub max_bytes: i64,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,

    /// Optional auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            stream_name: "CACHE_EVENTS".to_string(),
            subject_prefix: "cache".to_string(),
            storage: StorageType::File,
            max_events: 1_000_000,
            max_age_secs: 7 * 24 * 3600,
            max_bytes: -1,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            token: None,
        }
    }
}

impl NatsConfig {
    /// Subjects captured by the stream
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![format!("{}.>", self.subject_prefix)]
    }

    /// Durable consumer name for a consumer group
    ///
    /// JetStream names may not contain `.`, `*`, `>` or whitespace.
    pub fn consumer_name(&self, group: &str) -> String {
        group
            .chars()
            .map(|c| match c {
                '.' | '*' | '>' | ' ' | '\t' => '-',
                other => other,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NatsConfig::default();
        assert_eq!(config.stream_subjects(), vec!["cache.>"]);
        assert_eq!(config.storage, StorageType::File);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_consumer_name_sanitized() {
        let config = NatsConfig::default();
        assert_eq!(config.consumer_name("alert-consumer-group"), "alert-consumer-group");
        assert_eq!(config.consumer_name("team.alerts >"), "team-alerts--");
    }
}
