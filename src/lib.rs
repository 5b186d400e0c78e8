//! # cache-sentinel
//!
//! Operational side-channel for a tiered cache deployment.
//!
//! ## Overview
//!
//! Every cache-tier process emits lifecycle and diagnostic events onto a
//! shared event stream. Two independent consumers read that stream:
//!
//! - the **alerting engine** turns events into color-classified alert
//!   lines and detects nodes that stopped heartbeating
//! - the **log shipper** indexes every event into a search store and
//!   survives store outages by dropping the failing message and
//!   reconnecting
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use cache_sentinel::{AlertEngine, AlertEngineConfig, Emitter, EmitterConfig, EventBus};
//! use cache_sentinel::provider::memory::MemoryProvider;
//! use cache_sentinel::sink::MemoryAlertSink;
//!
//! # async fn example() -> cache_sentinel::Result<()> {
//! let bus = Arc::new(EventBus::new(MemoryProvider::default()));
//!
//! let sink = Arc::new(MemoryAlertSink::default());
//! let alerts = AlertEngine::new(bus.clone(), sink.clone(), AlertEngineConfig::default())
//!     .start()
//!     .await?;
//!
//! let emitter = Emitter::new(bus, "Writer_Service", "CacheWriterService", EmitterConfig::default());
//! emitter.register().await;
//! emitter.error("Failed to set value", "SET_ERROR", "Cache set operation returned error").await;
//!
//! alerts.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory** - in-process broker for tests and single-process use
//! - **nats** - NATS JetStream, one durable consumer per consumer group

pub mod alert;
pub mod bus;
pub mod config;
pub mod dlq;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod index;
pub mod liveness;
pub mod monitor;
pub mod provider;
pub mod schema;
pub mod shipper;
pub mod sink;
pub mod types;

// Re-export core types
pub use alert::{classify, Alert, AlertKind, Observation};
pub use bus::EventBus;
pub use config::SentinelConfig;
pub use dlq::{DeadLetterEvent, DeadLetterStage, DlqHandler, MemoryDlqHandler};
pub use emitter::{Emitter, EmitterConfig, HeartbeatHandle};
pub use engine::{AlertEngine, AlertEngineConfig, ServiceHandle};
pub use error::{Result, SentinelError};
pub use index::{
    ElasticsearchConnector, IndexResponse, IndexStore, MemoryIndexStore, StoreConnector,
};
pub use liveness::{LivenessTable, NodeLivenessRecord, SharedLiveness};
pub use monitor::{HeartbeatMonitor, MonitorConfig};
pub use provider::{EventProvider, ProviderInfo, Subscription};
pub use schema::{EventSchema, MemorySchemaRegistry, SchemaRegistry};
pub use shipper::{LogShipper, RetryPolicy, ShipperConfig, ShipperStats, ShipperStatsSnapshot};
pub use sink::{AlertSink, ConsoleSink, MemoryAlertSink};
pub use types::{
    Annotations, AnnotationValue, DeliverPolicy, Event, LogLevel, MessageType, NodeStatus,
    ReceivedEvent, SubscribeOptions, Topic,
};

// Re-export providers for convenience
pub use provider::memory::{MemoryConfig, MemoryProvider};
pub use provider::nats::{NatsClient, NatsConfig, NatsProvider, NatsSubscription, StorageType};
