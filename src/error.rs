//! Error types for cache-sentinel

use thiserror::Error;

/// Errors that can occur in the alerting and shipping pipeline
#[derive(Debug, Error)]
pub enum SentinelError {
    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish failure
    #[error("Failed to publish event to topic '{topic}': {reason}")]
    Publish {
        topic: String,
        reason: String,
    },

    /// Subscribe failure
    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscribe {
        topic: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream/topic creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer/subscription creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Acknowledgement (offset commit) failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Broker backend not supported or not available
    #[error("Provider error: {0}")]
    Provider(String),

    /// Event failed schema validation
    #[error("Schema validation failed for '{message_type}': {reason}")]
    SchemaValidation {
        message_type: String,
        reason: String,
    },

    /// A single document could not be written to the index store
    #[error("Failed to index document into '{index}': {reason}")]
    Index {
        index: String,
        reason: String,
    },

    /// Every attempt to (re)connect to the index store failed
    #[error("Index store unavailable after {attempts} attempts: {reason}")]
    StoreUnavailable {
        attempts: u32,
        reason: String,
    },
}

/// Result type alias for sentinel operations
pub type Result<T> = std::result::Result<T, SentinelError>;
