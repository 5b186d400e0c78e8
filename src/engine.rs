//! Alerting engine: stream consumption plus liveness monitoring
//!
//! Two independent tasks share the liveness table. The consume loop
//! decodes each message, updates the table and delivers the classified
//! alert; the monitor scans the table on its own schedule.

use crate::alert::{classify, Alert, Observation};
use crate::bus::EventBus;
use crate::dlq::{DeadLetterEvent, DeadLetterStage, DlqHandler};
use crate::error::Result;
use crate::liveness::{LivenessTable, SharedLiveness};
use crate::monitor::{HeartbeatMonitor, MonitorConfig};
use crate::provider::Subscription;
use crate::schema::{MemorySchemaRegistry, SchemaRegistry};
use crate::sink::AlertSink;
use crate::types::{DeliverPolicy, Event, ReceivedEvent, SubscribeOptions, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct AlertEngineConfig {
    pub group: String,
    /// Start position on first run
    pub deliver_policy: DeliverPolicy,
    pub topics: Vec<String>,
    pub monitor: MonitorConfig,
    /// How long `ServiceHandle::shutdown` waits before aborting tasks
    pub shutdown_grace: Duration,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            group: "alert-consumer-group".to_string(),
            deliver_policy: DeliverPolicy::New,
            topics: [
                Topic::LogError,
                Topic::LogWarn,
                Topic::Heartbeat,
                Topic::Registration,
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
            monitor: MonitorConfig::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

pub struct AlertEngine {
    bus: Arc<EventBus>,
    registry: Arc<dyn SchemaRegistry>,
    sink: Arc<dyn AlertSink>,
    liveness: SharedLiveness,
    dlq: Option<Arc<dyn DlqHandler>>,
    config: AlertEngineConfig,
}

impl AlertEngine {
    /// Engine validating against the cache event schemas
    pub fn new(bus: Arc<EventBus>, sink: Arc<dyn AlertSink>, config: AlertEngineConfig) -> Self {
        Self {
            bus,
            registry: Arc::new(MemorySchemaRegistry::with_cache_schemas()),
            sink,
            liveness: LivenessTable::shared(),
            dlq: None,
            config,
        }
    }

    /// Replace the schema registry
    pub fn with_registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Record skipped messages in `dlq`
    pub fn with_dlq(mut self, dlq: Arc<dyn DlqHandler>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    /// The liveness table this engine writes
    pub fn liveness(&self) -> SharedLiveness {
        Arc::clone(&self.liveness)
    }

    /// Process one delivered message
    ///
    /// Routing follows the payload, not the topic it arrived on; the topic
    /// only fills in a `message_type` the payload leaves out. Messages
    /// that fail validation are skipped (and dead-lettered) and returned
    /// as `Err`; the caller keeps consuming.
    pub async fn handle_delivery(&self, received: &ReceivedEvent) -> Result<Option<Alert>> {
        let event = match received.decode(self.registry.as_ref()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    topic = %received.topic,
                    sequence = received.sequence,
                    error = %e,
                    "Skipping invalid message"
                );
                if let Some(dlq) = &self.dlq {
                    let entry =
                        DeadLetterEvent::new(received.clone(), DeadLetterStage::Alerting, e.to_string());
                    if let Err(dlq_err) = dlq.handle(entry).await {
                        tracing::warn!(error = %dlq_err, "Failed to record skipped message");
                    }
                }
                return Err(e);
            }
        };

        // The alert is delivered under the table lock, after the update, so
        // the monitor cannot report the node missing ahead of its SHUTDOWN.
        let mut table = self.liveness.lock().await;
        let now = Instant::now();
        match &event {
            Event::Heartbeat(hb) => {
                table.observe_heartbeat(&hb.node_id, now);
            }
            other => {
                table.observe_first_seen(other.node_id(), now);
            }
        }

        let alert = classify(&Observation::Event(event));
        if let Some(alert) = &alert {
            self.sink.deliver(alert);
        }
        Ok(alert)
    }

    /// Join the consumer group and start the consume loop and the monitor
    pub async fn start(self) -> Result<ServiceHandle> {
        let sub = self
            .bus
            .subscribe(
                &self.config.group,
                &self.config.topics,
                &SubscribeOptions::deliver(self.config.deliver_policy),
            )
            .await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = HeartbeatMonitor::new(
            self.liveness(),
            Arc::clone(&self.sink),
            self.config.monitor.clone(),
        )
        .spawn(stop_rx.clone());

        let grace = self.config.shutdown_grace;
        let consumer = tokio::spawn(consume(Arc::new(self), sub, stop_rx));

        Ok(ServiceHandle {
            stop_tx,
            tasks: vec![("consumer", consumer), ("monitor", monitor)],
            grace,
        })
    }
}

async fn consume(
    engine: Arc<AlertEngine>,
    mut sub: Box<dyn Subscription>,
    mut stop: watch::Receiver<bool>,
) {
    tracing::info!(group = %engine.config.group, "Alert consumer started");

    loop {
        let next = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            next = sub.next() => next,
        };

        match next {
            Ok(Some(received)) => {
                // Invalid messages are already logged and dead-lettered
                let _ = engine.handle_delivery(&received).await;
            }
            Ok(None) => {
                tracing::info!("Event stream closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to receive event");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    tracing::info!("Alert consumer stopped");
}

/// Handle to a running set of background tasks
pub struct ServiceHandle {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    grace: Duration,
}

impl ServiceHandle {
    /// Signal every task and wait for each up to the grace period
    ///
    /// Tasks still running after the grace period are aborted.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        for (name, task) in self.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.grace, task).await.is_err() {
                tracing::warn!(task = name, "Task did not stop in time, aborting");
                abort.abort();
            }
        }
    }

    /// True once every task has exited on its own
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|(_, t)| t.is_finished())
    }
}
