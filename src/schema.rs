//! Event schema registry: validate raw documents before decoding
//!
//! Each schema is keyed by message type, with the log level appended for
//! LOG events (`LOG.WARN`). Validation is limited to the fields each
//! type/level requires; everything else on a log event is a free-form
//! annotation.

use crate::error::{Result, SentinelError};
use crate::types::{json_kind, Event, Topic};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

/// Schema definition for one message type (or log level)
#[derive(Debug, Clone)]
pub struct EventSchema {
    /// Schema key, e.g. `HEARTBEAT` or `LOG.ERROR`
    pub event_type: String,

    /// Fields that must be present and non-null; dotted paths reach into
    /// nested objects (`error_details.error_message`)
    pub required_fields: Vec<String>,

    /// Fields that must be present together or both absent
    pub paired_fields: Vec<(String, String)>,

    /// Optional description
    pub description: String,
}

impl EventSchema {
    fn new(event_type: &str, required: &[&str], description: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            required_fields: required.iter().map(|f| f.to_string()).collect(),
            paired_fields: Vec::new(),
            description: description.to_string(),
        }
    }
}

/// Trait for event schema registries
pub trait SchemaRegistry: Send + Sync {
    /// Register (or replace) a schema
    fn register(&self, schema: EventSchema) -> Result<()>;

    /// Get the schema registered under `event_type`
    fn get(&self, event_type: &str) -> Result<Option<EventSchema>>;

    /// List all registered schema keys, sorted
    fn list_types(&self) -> Result<Vec<String>>;

    /// Validate a raw document against the schema for its type
    ///
    /// Documents whose type has no registered schema pass.
    fn validate(&self, document: &Map<String, Value>) -> Result<()>;
}

/// In-memory schema registry
pub struct MemorySchemaRegistry {
    schemas: RwLock<HashMap<String, EventSchema>>,
}

impl MemorySchemaRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the cache event contract
    pub fn with_cache_schemas() -> Self {
        let common_log = [
            "log_id",
            "node_id",
            "log_level",
            "service_name",
            "message",
            "timestamp",
        ];
        let with = |extra: &[&'static str]| -> Vec<&'static str> {
            common_log.iter().chain(extra.iter()).copied().collect()
        };

        let mut warn = EventSchema::new("LOG.WARN", &with(&[]), "Slow operation or departure notice");
        warn.paired_fields.push((
            "response_time_ms".to_string(),
            "threshold_limit_ms".to_string(),
        ));

        let schemas = vec![
            EventSchema::new(
                "REGISTRATION",
                &["node_id", "service_name", "status", "timestamp"],
                "Node entering or leaving the fleet",
            ),
            EventSchema::new(
                "HEARTBEAT",
                &["node_id", "status", "timestamp"],
                "Periodic liveness signal",
            ),
            EventSchema::new("LOG.INFO", &with(&[]), "Informational log"),
            warn,
            EventSchema::new(
                "LOG.ERROR",
                &with(&["error_details.error_code", "error_details.error_message"]),
                "Failed cache operation",
            ),
        ];

        let mut map = HashMap::new();
        for schema in schemas {
            map.insert(schema.event_type.clone(), schema);
        }
        Self {
            schemas: RwLock::new(map),
        }
    }
}

impl Default for MemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry for MemorySchemaRegistry {
    fn register(&self, schema: EventSchema) -> Result<()> {
        if schema.event_type.is_empty() {
            return Err(SentinelError::Config(
                "Event type cannot be empty".to_string(),
            ));
        }

        let mut schemas = self.schemas.write().map_err(|e| {
            SentinelError::Provider(format!("Schema registry lock poisoned: {}", e))
        })?;
        schemas.insert(schema.event_type.clone(), schema);
        Ok(())
    }

    fn get(&self, event_type: &str) -> Result<Option<EventSchema>> {
        let schemas = self.schemas.read().map_err(|e| {
            SentinelError::Provider(format!("Schema registry lock poisoned: {}", e))
        })?;
        Ok(schemas.get(event_type).cloned())
    }

    fn list_types(&self) -> Result<Vec<String>> {
        let schemas = self.schemas.read().map_err(|e| {
            SentinelError::Provider(format!("Schema registry lock poisoned: {}", e))
        })?;
        let mut types: Vec<String> = schemas.keys().cloned().collect();
        types.sort();
        Ok(types)
    }

    fn validate(&self, document: &Map<String, Value>) -> Result<()> {
        let key = schema_key(document)?;

        let schemas = self.schemas.read().map_err(|e| {
            SentinelError::Provider(format!("Schema registry lock poisoned: {}", e))
        })?;
        let schema = match schemas.get(&key) {
            Some(s) => s,
            None => return Ok(()),
        };

        for field in &schema.required_fields {
            if lookup(document, field).is_none() {
                return Err(SentinelError::SchemaValidation {
                    message_type: key.clone(),
                    reason: format!("Missing required field '{}'", field),
                });
            }
        }

        for (a, b) in &schema.paired_fields {
            let has_a = lookup(document, a).is_some();
            let has_b = lookup(document, b).is_some();
            if has_a != has_b {
                let (present, missing) = if has_a { (a, b) } else { (b, a) };
                return Err(SentinelError::SchemaValidation {
                    message_type: key.clone(),
                    reason: format!(
                        "Field '{}' requires '{}' to be present as well",
                        present, missing
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Schema key for a raw document (`HEARTBEAT`, `LOG.WARN`, ...)
pub fn schema_key(document: &Map<String, Value>) -> Result<String> {
    let message_type = match document.get("message_type") {
        Some(Value::String(s)) => s.as_str(),
        Some(other) => {
            return Err(SentinelError::SchemaValidation {
                message_type: "UNKNOWN".to_string(),
                reason: format!("'message_type' must be a string, got {}", json_kind(other)),
            })
        }
        None => {
            return Err(SentinelError::SchemaValidation {
                message_type: "UNKNOWN".to_string(),
                reason: "Missing required field 'message_type'".to_string(),
            })
        }
    };

    if message_type != "LOG" {
        return Ok(message_type.to_string());
    }

    match document.get("log_level") {
        Some(Value::String(level)) => Ok(format!("LOG.{}", level)),
        _ => Err(SentinelError::SchemaValidation {
            message_type: "LOG".to_string(),
            reason: "Missing required field 'log_level'".to_string(),
        }),
    }
}

/// Validate and decode a raw payload into a typed [`Event`]
pub fn decode_event(registry: &dyn SchemaRegistry, payload: &[u8]) -> Result<Event> {
    decode_event_on(registry, None, payload)
}

/// Like [`decode_event`], for a payload read from `topic`
///
/// A payload without `message_type` (or a log without `log_level`) takes
/// it from the topic. Fields present in the payload always win.
pub fn decode_event_on(
    registry: &dyn SchemaRegistry,
    topic: Option<Topic>,
    payload: &[u8],
) -> Result<Event> {
    let mut document = match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => map,
        other => {
            return Err(SentinelError::SchemaValidation {
                message_type: "UNKNOWN".to_string(),
                reason: format!("payload must be a JSON object, got {}", json_kind(&other)),
            })
        }
    };

    if let Some(topic) = topic {
        fill_from_topic(&mut document, topic);
    }

    registry.validate(&document)?;
    Ok(serde_json::from_value(Value::Object(document))?)
}

fn fill_from_topic(document: &mut Map<String, Value>, topic: Topic) {
    if !document.contains_key("message_type") {
        document.insert(
            "message_type".to_string(),
            Value::String(topic.message_type().as_str().to_string()),
        );
    }
    let is_log = document.get("message_type").and_then(Value::as_str) == Some("LOG");
    if let (true, Some(level)) = (is_log, topic.log_level()) {
        document
            .entry("log_level")
            .or_insert_with(|| Value::String(level.as_str().to_string()));
    }
}

/// Resolve a dotted path; explicit nulls count as absent
fn lookup<'a>(document: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogLevel, NodeStatus};
    use serde_json::json;

    fn registry() -> MemorySchemaRegistry {
        MemorySchemaRegistry::with_cache_schemas()
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn error_doc() -> Value {
        json!({
            "log_id": "l-1",
            "node_id": "Writer_Service",
            "log_level": "ERROR",
            "message_type": "LOG",
            "message": "Failed to set value for key: foo",
            "service_name": "CacheWriterService",
            "error_details": {
                "error_code": "SET_ERROR",
                "error_message": "Cache set operation returned error"
            },
            "timestamp": "2024-11-02T14:03:07.512330"
        })
    }

    #[test]
    fn test_default_schema_types() {
        let types = registry().list_types().unwrap();
        assert_eq!(
            types,
            vec!["HEARTBEAT", "LOG.ERROR", "LOG.INFO", "LOG.WARN", "REGISTRATION"]
        );
    }

    #[test]
    fn test_register_and_get() {
        let reg = MemorySchemaRegistry::new();
        reg.register(EventSchema::new("CUSTOM", &["a"], "custom")).unwrap();

        let schema = reg.get("CUSTOM").unwrap().unwrap();
        assert_eq!(schema.required_fields, vec!["a"]);
        assert!(reg.get("MISSING").unwrap().is_none());
    }

    #[test]
    fn test_register_empty_type_fails() {
        let reg = MemorySchemaRegistry::new();
        assert!(reg.register(EventSchema::new("", &[], "")).is_err());
    }

    #[test]
    fn test_schema_key() {
        assert_eq!(
            schema_key(&object(json!({"message_type": "HEARTBEAT"}))).unwrap(),
            "HEARTBEAT"
        );
        assert_eq!(
            schema_key(&object(json!({"message_type": "LOG", "log_level": "WARN"}))).unwrap(),
            "LOG.WARN"
        );
        assert!(schema_key(&object(json!({"message_type": "LOG"}))).is_err());
        assert!(schema_key(&object(json!({"node_id": "n"}))).is_err());
        assert!(schema_key(&object(json!({"message_type": 3}))).is_err());
    }

    #[test]
    fn test_validate_heartbeat_missing_status() {
        let err = registry()
            .validate(&object(json!({
                "message_type": "HEARTBEAT",
                "node_id": "n1",
                "timestamp": "2024-11-02T14:03:07"
            })))
            .unwrap_err();
        assert!(err.to_string().contains("status"), "{}", err);
    }

    #[test]
    fn test_validate_error_requires_nested_message() {
        let reg = registry();
        assert!(reg.validate(&object(error_doc())).is_ok());

        let mut doc = error_doc();
        doc["error_details"]
            .as_object_mut()
            .unwrap()
            .remove("error_message");
        let err = reg.validate(&object(doc)).unwrap_err();
        assert!(err.to_string().contains("error_details.error_message"));
    }

    #[test]
    fn test_validate_null_counts_as_missing() {
        let mut doc = error_doc();
        doc["error_details"] = Value::Null;
        assert!(registry().validate(&object(doc)).is_err());
    }

    #[test]
    fn test_validate_warn_pairing() {
        let reg = registry();
        let base = json!({
            "log_id": "l-2",
            "node_id": "Writer_Service",
            "log_level": "WARN",
            "message_type": "LOG",
            "message": "Slow SET operation for key: foo",
            "service_name": "CacheWriterService",
            "timestamp": "2024-11-02T14:03:07"
        });
        assert!(reg.validate(&object(base.clone())).is_ok());

        let mut both = base.clone();
        both["response_time_ms"] = json!(150.2);
        both["threshold_limit_ms"] = json!(100.0);
        assert!(reg.validate(&object(both)).is_ok());

        let mut only_one = base;
        only_one["response_time_ms"] = json!(150.2);
        let err = reg.validate(&object(only_one)).unwrap_err();
        assert!(err.to_string().contains("threshold_limit_ms"));
    }

    #[test]
    fn test_unregistered_type_passes_validation() {
        let reg = MemorySchemaRegistry::new();
        assert!(reg
            .validate(&object(json!({"message_type": "HEARTBEAT"})))
            .is_ok());
    }

    #[test]
    fn test_decode_event() {
        let reg = registry();
        let payload = serde_json::to_vec(&error_doc()).unwrap();
        let event = decode_event(&reg, &payload).unwrap();
        match event {
            Event::Log(log) => {
                assert_eq!(log.log_level, LogLevel::Error);
                assert_eq!(
                    log.error_details.unwrap().error_message,
                    "Cache set operation returned error"
                );
            }
            other => panic!("expected log, got {:?}", other),
        }

        let heartbeat = br#"{"message_type":"HEARTBEAT","node_id":"n","status":"DOWN","timestamp":"2024-11-02T14:03:07"}"#;
        match decode_event(&reg, heartbeat).unwrap() {
            Event::Heartbeat(hb) => assert_eq!(hb.status, NodeStatus::Down),
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_on_topic_fills_missing_type() {
        let reg = registry();
        let heartbeat = br#"{"node_id":"n","status":"UP","timestamp":"2024-11-02T14:03:07"}"#;
        assert!(decode_event(&reg, heartbeat).is_err());
        match decode_event_on(&reg, Some(Topic::Heartbeat), heartbeat).unwrap() {
            Event::Heartbeat(hb) => assert_eq!(hb.status, NodeStatus::Up),
            other => panic!("expected heartbeat, got {:?}", other),
        }

        let warn = br#"{"log_id":"l-3","node_id":"n","service_name":"s","message":"slow",
            "timestamp":"2024-11-02T14:03:07","response_time_ms":150,"threshold_limit_ms":100}"#;
        match decode_event_on(&reg, Some(Topic::LogWarn), warn).unwrap() {
            Event::Log(log) => assert_eq!(log.log_level, LogLevel::Warn),
            other => panic!("expected log, got {:?}", other),
        }

        // an explicit type wins over the topic
        let registration = br#"{"message_type":"REGISTRATION","node_id":"n","service_name":"s",
            "status":"UP","timestamp":"2024-11-02T14:03:07"}"#;
        assert!(matches!(
            decode_event_on(&reg, Some(Topic::Heartbeat), registration).unwrap(),
            Event::Registration(_)
        ));
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        let reg = registry();
        assert!(decode_event(&reg, b"not json").is_err());
        assert!(decode_event(&reg, b"\"text\"").is_err());
        assert!(decode_event(&reg, br#"{"message_type":"UNKNOWN_TYPE","node_id":"n"}"#).is_err());
    }
}
