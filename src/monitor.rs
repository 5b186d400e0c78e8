//! Heartbeat liveness monitor
//!
//! Scans the liveness table on a fixed period and raises HEARTBEAT MISSING
//! for every node silent past the threshold. The scan is level-triggered:
//! a node keeps producing one alert per scan until it heartbeats again.

use crate::alert::{classify, Observation};
use crate::liveness::SharedLiveness;
use crate::sink::AlertSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Scan settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Silence longer than this raises an alert
    pub threshold: Duration,
    pub scan_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(10),
            scan_interval: Duration::from_secs(5),
        }
    }
}

pub struct HeartbeatMonitor {
    table: SharedLiveness,
    sink: Arc<dyn AlertSink>,
    config: MonitorConfig,
}

impl HeartbeatMonitor {
    pub fn new(table: SharedLiveness, sink: Arc<dyn AlertSink>, config: MonitorConfig) -> Self {
        Self {
            table,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run one scan; returns the number of alerts raised
    pub async fn scan(&self) -> usize {
        // Alerts are delivered under the lock so a SHUTDOWN raised by the
        // consume loop cannot be overtaken by a stale MISSING.
        let table = self.table.lock().await;
        let silent = table.silent_nodes(Instant::now(), self.config.threshold);

        for node in &silent {
            let observation = Observation::HeartbeatMissing {
                node_id: node.node_id.clone(),
                silent_for: node.silent_for,
                threshold: self.config.threshold,
            };
            if let Some(alert) = classify(&observation) {
                self.sink.deliver(&alert);
            }
        }

        tracing::debug!(
            nodes = table.len(),
            silent = silent.len(),
            "Liveness scan complete"
        );
        silent.len()
    }

    /// Scan every `scan_interval`, starting immediately, until `stop` flips
    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.scan_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                threshold_secs = self.config.threshold.as_secs_f64(),
                scan_interval_secs = self.config.scan_interval.as_secs_f64(),
                "Heartbeat monitor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.scan().await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Heartbeat monitor stopped");
        })
    }
}
