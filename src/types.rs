//! Core event types shared by every cache-tier process and both consumers
//!
//! All wire types use the snake_case field names the cache services emit.
//! `message_type` is the discriminator of the [`Event`] envelope.

use crate::error::{Result, SentinelError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Emission time of an event
pub type Timestamp = DateTime<Utc>;

/// Free-form key/value annotations attached to a log event
pub type Annotations = BTreeMap<String, AnnotationValue>;

/// Discriminator of the event envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Registration,
    Heartbeat,
    Log,
}

impl MessageType {
    /// Wire name (e.g. `HEARTBEAT`)
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Registration => "REGISTRATION",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Log => "LOG",
        }
    }
}

/// Node status carried by registration and heartbeat events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Up,
    Down,
}

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Wire name (e.g. `WARN`)
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// A node entering or leaving the fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationEvent {
    pub node_id: String,
    pub service_name: String,
    pub status: NodeStatus,
    #[serde(with = "iso8601")]
    pub timestamp: Timestamp,
}

/// Periodic liveness signal; `Down` is the final signal of a graceful exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(with = "iso8601")]
    pub timestamp: Timestamp,
}

/// Nested error payload of an ERROR log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub error_code: String,
    pub error_message: String,
}

/// A diagnostic log line from a cache-tier process
///
/// Fields that are not part of the fixed schema (operation name, key,
/// sizes, ...) are collected into `annotations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Unique per event (UUID v4 for events emitted by this crate)
    pub log_id: String,

    pub node_id: String,

    pub log_level: LogLevel,

    pub service_name: String,

    pub message: String,

    #[serde(with = "iso8601")]
    pub timestamp: Timestamp,

    /// WARN only, paired with `threshold_limit_ms`
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_time_ms: Option<f64>,

    /// WARN only, paired with `response_time_ms`
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub threshold_limit_ms: Option<f64>,

    /// ERROR only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,

    #[serde(flatten)]
    pub annotations: Annotations,
}

/// Scalar annotation value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnotationValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AnnotationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationValue::Bool(b) => write!(f, "{}", b),
            AnnotationValue::Int(i) => write!(f, "{}", i),
            AnnotationValue::Float(x) => write!(f, "{}", x),
            AnnotationValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AnnotationValue {
    fn from(value: &str) -> Self {
        AnnotationValue::Text(value.to_string())
    }
}

impl From<String> for AnnotationValue {
    fn from(value: String) -> Self {
        AnnotationValue::Text(value)
    }
}

impl From<i64> for AnnotationValue {
    fn from(value: i64) -> Self {
        AnnotationValue::Int(value)
    }
}

impl From<usize> for AnnotationValue {
    fn from(value: usize) -> Self {
        AnnotationValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AnnotationValue {
    fn from(value: f64) -> Self {
        AnnotationValue::Float(value)
    }
}

impl From<bool> for AnnotationValue {
    fn from(value: bool) -> Self {
        AnnotationValue::Bool(value)
    }
}

/// The atomic unit on the event stream. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Registration(RegistrationEvent),
    Heartbeat(HeartbeatEvent),
    Log(LogEvent),
}

impl Event {
    /// Registration (UP on start, DOWN on graceful exit)
    pub fn registration(
        node_id: impl Into<String>,
        service_name: impl Into<String>,
        status: NodeStatus,
    ) -> Self {
        Event::Registration(RegistrationEvent {
            node_id: node_id.into(),
            service_name: service_name.into(),
            status,
            timestamp: Utc::now(),
        })
    }

    /// Heartbeat with the given status
    pub fn heartbeat(node_id: impl Into<String>, status: NodeStatus) -> Self {
        Event::Heartbeat(HeartbeatEvent {
            node_id: node_id.into(),
            status,
            timestamp: Utc::now(),
        })
    }

    /// INFO log with free-form annotations
    pub fn log_info(
        node_id: impl Into<String>,
        service_name: impl Into<String>,
        message: impl Into<String>,
        annotations: Annotations,
    ) -> Self {
        let mut log = LogEvent::new(node_id, service_name, LogLevel::Info, message);
        log.annotations = annotations;
        Event::Log(log)
    }

    /// WARN log; timing fields are always set together
    pub fn log_warn(
        node_id: impl Into<String>,
        service_name: impl Into<String>,
        message: impl Into<String>,
        response_time_ms: f64,
        threshold_limit_ms: f64,
    ) -> Self {
        let mut log = LogEvent::new(node_id, service_name, LogLevel::Warn, message);
        log.response_time_ms = Some(response_time_ms);
        log.threshold_limit_ms = Some(threshold_limit_ms);
        Event::Log(log)
    }

    /// ERROR log with nested error details
    pub fn log_error(
        node_id: impl Into<String>,
        service_name: impl Into<String>,
        message: impl Into<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        let mut log = LogEvent::new(node_id, service_name, LogLevel::Error, message);
        log.error_details = Some(ErrorDetails {
            error_code: error_code.into(),
            error_message: error_message.into(),
        });
        Event::Log(log)
    }

    /// Identifier of the emitting process
    pub fn node_id(&self) -> &str {
        match self {
            Event::Registration(e) => &e.node_id,
            Event::Heartbeat(e) => &e.node_id,
            Event::Log(e) => &e.node_id,
        }
    }

    /// Emission time
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Event::Registration(e) => e.timestamp,
            Event::Heartbeat(e) => e.timestamp,
            Event::Log(e) => e.timestamp,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Event::Registration(_) => MessageType::Registration,
            Event::Heartbeat(_) => MessageType::Heartbeat,
            Event::Log(_) => MessageType::Log,
        }
    }

    /// Topic this event is published to
    pub fn topic(&self) -> Topic {
        Topic::for_event(self)
    }
}

impl LogEvent {
    fn new(
        node_id: impl Into<String>,
        service_name: impl Into<String>,
        log_level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            log_id: uuid::Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            log_level,
            service_name: service_name.into(),
            message: message.into(),
            timestamp: Utc::now(),
            response_time_ms: None,
            threshold_limit_ms: None,
            error_details: None,
            annotations: Annotations::new(),
        }
    }

    /// Attach an annotation
    pub fn with_annotation(
        mut self,
        key: impl Into<String>,
        value: impl Into<AnnotationValue>,
    ) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// Broker topics carrying cache events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Heartbeat,
    Registration,
    LogInfo,
    LogWarn,
    LogError,
}

impl Topic {
    /// Stream name on the broker
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Heartbeat => "cache.heartbeat",
            Topic::Registration => "cache.registration",
            Topic::LogInfo => "cache.log.info",
            Topic::LogWarn => "cache.log.warn",
            Topic::LogError => "cache.log.error",
        }
    }

    /// Route an event to its topic
    pub fn for_event(event: &Event) -> Topic {
        match event {
            Event::Registration(_) => Topic::Registration,
            Event::Heartbeat(_) => Topic::Heartbeat,
            Event::Log(log) => match log.log_level {
                LogLevel::Info => Topic::LogInfo,
                LogLevel::Warn => Topic::LogWarn,
                LogLevel::Error => Topic::LogError,
            },
        }
    }

    /// Message type carried on this topic
    pub fn message_type(&self) -> MessageType {
        match self {
            Topic::Heartbeat => MessageType::Heartbeat,
            Topic::Registration => MessageType::Registration,
            Topic::LogInfo | Topic::LogWarn | Topic::LogError => MessageType::Log,
        }
    }

    /// Log level carried on this topic, for the `cache.log.*` topics
    pub fn log_level(&self) -> Option<LogLevel> {
        match self {
            Topic::LogInfo => Some(LogLevel::Info),
            Topic::LogWarn => Some(LogLevel::Warn),
            Topic::LogError => Some(LogLevel::Error),
            Topic::Heartbeat | Topic::Registration => None,
        }
    }

    pub fn parse(name: &str) -> Option<Topic> {
        Topic::all().into_iter().find(|t| t.as_str() == name)
    }

    pub fn all() -> [Topic; 5] {
        [
            Topic::Heartbeat,
            Topic::Registration,
            Topic::LogInfo,
            Topic::LogWarn,
            Topic::LogError,
        ]
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw message delivered by the broker
///
/// Payloads are kept undecoded: the alerting engine validates and decodes
/// them, while the log shipper indexes the document as published.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    /// Topic the message was read from
    pub topic: String,

    /// Broker-assigned sequence (offset) of the message
    pub sequence: u64,

    /// Number of delivery attempts
    pub num_delivered: u64,

    /// Raw JSON payload
    pub payload: Bytes,
}

impl ReceivedEvent {
    /// Parse the payload as a JSON object
    pub fn document(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::from_slice::<serde_json::Value>(&self.payload)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(SentinelError::SchemaValidation {
                message_type: "UNKNOWN".to_string(),
                reason: format!("payload must be a JSON object, got {}", json_kind(&other)),
            }),
        }
    }

    /// Validate against `registry` and decode into a typed [`Event`]
    ///
    /// The topic fills in a missing `message_type` or `log_level`.
    pub fn decode(&self, registry: &dyn crate::schema::SchemaRegistry) -> Result<Event> {
        crate::schema::decode_event_on(registry, Topic::parse(&self.topic), &self.payload)
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Where a consumer group starts reading when it has no committed offset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverPolicy {
    /// Earliest available message
    #[default]
    All,
    /// Only messages published after the group is created
    New,
}

/// Options for creating subscriptions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOptions {
    /// Start position on first run; later runs resume from the committed offset
    #[serde(default)]
    pub deliver_policy: DeliverPolicy,

    /// How long the broker waits for an ack before redelivery (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_wait_secs: Option<u64>,
}

impl SubscribeOptions {
    pub fn deliver(policy: DeliverPolicy) -> Self {
        Self {
            deliver_policy: policy,
            ..Default::default()
        }
    }
}

/// Accepts numbers or numeric strings (`"0"`) for millisecond fields
fn lenient_millis<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid millisecond value '{}': {}", s, e))),
    }
}

/// ISO-8601 timestamps: RFC 3339 with offset, or naive local-style
/// timestamps without offset (read as UTC). Written as RFC 3339 UTC.
pub mod iso8601 {
    use super::Timestamp;
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<Timestamp, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid ISO-8601 timestamp '{}': {}", raw, e))
    }
}
