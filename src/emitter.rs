//! Emission client used inside each cache-tier process
//!
//! Publishes the lifecycle and diagnostic events the alerting engine and
//! log shipper consume. Emission is best-effort: a failed send is logged
//! as a warning and reported as `false`, it never reaches the caller as
//! an error, so cache operations are not aborted by a broker outage.

use crate::bus::EventBus;
use crate::types::{AnnotationValue, Annotations, Event, NodeStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Timing settings of the emission client
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Heartbeat period while healthy
    pub heartbeat_interval: Duration,
    /// Operations slower than this also emit a WARN
    pub slow_threshold: Duration,
    /// Pause between the final shutdown messages
    pub shutdown_pause: Duration,
    /// Wait after the last shutdown message for the broker handoff
    pub shutdown_linger: Duration,
    /// Max wait for the heartbeat task to stop
    pub stop_timeout: Duration,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            slow_threshold: Duration::from_millis(100),
            shutdown_pause: Duration::from_millis(500),
            shutdown_linger: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-process emission client
pub struct Emitter {
    bus: Arc<EventBus>,
    node_id: String,
    service_name: String,
    config: EmitterConfig,
    failures: AtomicU64,
}

impl Emitter {
    pub fn new(
        bus: Arc<EventBus>,
        node_id: impl Into<String>,
        service_name: impl Into<String>,
        config: EmitterConfig,
    ) -> Self {
        Self {
            bus,
            node_id: node_id.into(),
            service_name: service_name.into(),
            config,
            failures: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Number of events that could not be published
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn emit(&self, event: Event) -> bool {
        match self.bus.publish(&event).await {
            Ok(_) => true,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    node_id = %self.node_id,
                    topic = %event.topic(),
                    error = %e,
                    "Failed to emit event"
                );
                false
            }
        }
    }

    /// REGISTRATION(UP); must precede every other event of this node
    pub async fn register(&self) -> bool {
        self.emit(Event::registration(
            &self.node_id,
            &self.service_name,
            NodeStatus::Up,
        ))
        .await
    }

    /// A single HEARTBEAT(UP)
    pub async fn heartbeat(&self) -> bool {
        self.emit(Event::heartbeat(&self.node_id, NodeStatus::Up)).await
    }

    pub async fn info(&self, message: impl Into<String>, annotations: Annotations) -> bool {
        self.emit(Event::log_info(
            &self.node_id,
            &self.service_name,
            message,
            annotations,
        ))
        .await
    }

    pub async fn warn(
        &self,
        message: impl Into<String>,
        response_time_ms: f64,
        threshold_limit_ms: f64,
    ) -> bool {
        self.emit(Event::log_warn(
            &self.node_id,
            &self.service_name,
            message,
            response_time_ms,
            threshold_limit_ms,
        ))
        .await
    }

    pub async fn error(
        &self,
        message: impl Into<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> bool {
        self.emit(Event::log_error(
            &self.node_id,
            &self.service_name,
            message,
            error_code,
            error_message,
        ))
        .await
    }

    /// Report a successful cache operation
    ///
    /// Emits INFO annotated with `operation` and `key` (plus `extra`), and a
    /// WARN with the measured and allowed latency when `elapsed` exceeds
    /// the slow threshold.
    pub async fn record_operation(
        &self,
        operation: &str,
        key: &str,
        elapsed: Duration,
        extra: Annotations,
    ) -> bool {
        let op = operation.to_uppercase();
        let mut annotations = extra;
        annotations.insert("operation".to_string(), AnnotationValue::from(op.as_str()));
        annotations.insert("key".to_string(), AnnotationValue::from(key));

        let mut ok = self
            .info(format!("{} succeeded for key: {}", op, key), annotations)
            .await;

        if elapsed > self.config.slow_threshold {
            ok &= self
                .warn(
                    format!("Slow {} operation for key: {}", op, key),
                    millis(elapsed),
                    millis(self.config.slow_threshold),
                )
                .await;
        }
        ok
    }

    /// Report a failed cache operation as ERROR with `<OP>_ERROR` as code
    pub async fn record_failure(
        &self,
        operation: &str,
        key: &str,
        error_message: impl Into<String>,
    ) -> bool {
        let op = operation.to_uppercase();
        self.error(
            format!("Failed {} operation for key: {}", op, key),
            format!("{}_ERROR", op),
            error_message,
        )
        .await
    }

    /// Start the periodic heartbeat task
    pub fn spawn_heartbeat(self: &Arc<Self>) -> HeartbeatHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let emitter = Arc::clone(self);
        let interval = self.config.heartbeat_interval;

        let task = tokio::spawn(async move {
            while !*stop_rx.borrow() {
                emitter.heartbeat().await;
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::debug!(node_id = %emitter.node_id, "Heartbeat loop stopped");
        });

        HeartbeatHandle { stop_tx, task }
    }

    /// Graceful departure
    ///
    /// Stops the heartbeat task, then sends WARN "node going off",
    /// REGISTRATION(DOWN) and HEARTBEAT(DOWN) in that order, pausing between
    /// sends, and finally lingers so the broker handoff can complete.
    pub async fn shutdown(&self, heartbeat: Option<HeartbeatHandle>) {
        if let Some(handle) = heartbeat {
            handle.stop(self.config.stop_timeout).await;
        }

        tracing::info!(node_id = %self.node_id, "Sending departure events");

        let departure = [
            Event::log_warn(&self.node_id, &self.service_name, "node going off", 0.0, 0.0),
            Event::registration(&self.node_id, &self.service_name, NodeStatus::Down),
            Event::heartbeat(&self.node_id, NodeStatus::Down),
        ];
        for event in departure {
            self.emit(event).await;
            tokio::time::sleep(self.config.shutdown_pause).await;
        }

        tokio::time::sleep(self.config.shutdown_linger).await;
        tracing::info!(
            node_id = %self.node_id,
            failures = self.failures(),
            "Emitter shut down"
        );
    }
}

/// Handle to a running heartbeat task
pub struct HeartbeatHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Signal the task and wait up to `timeout` for it to finish
    pub async fn stop(self, timeout: Duration) {
        let _ = self.stop_tx.send(true);
        let abort = self.task.abort_handle();
        if tokio::time::timeout(timeout, self.task).await.is_err() {
            tracing::warn!("Heartbeat task did not stop in time, aborting");
            abort.abort();
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
