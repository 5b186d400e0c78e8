//! Alert sinks: where rendered alerts go
//!
//! The console sink is the operator-facing channel of the alerting
//! engine. It is deliberately separate from `tracing`, which carries the
//! engine's own diagnostics.

use crate::alert::{Alert, AlertKind};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::RwLock;

/// Destination for classified alerts
///
/// Delivery is synchronous so callers can deliver while holding the
/// liveness table lock, which keeps per-node alert order consistent.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: &Alert);
}

/// One line per alert on stdout
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    colored: bool,
}

impl ConsoleSink {
    /// Colored output
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Uncolored output (pipes, log files)
    pub fn plain() -> Self {
        Self { colored: false }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertSink for ConsoleSink {
    fn deliver(&self, alert: &Alert) {
        let line = if self.colored {
            alert.render()
        } else {
            alert.render_plain()
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{}", line) {
            tracing::warn!(error = %e, kind = %alert.kind, "Failed to write alert");
        }
    }
}

/// Bounded in-memory sink, used by tests and for inspection
pub struct MemoryAlertSink {
    alerts: RwLock<VecDeque<Alert>>,
    max_alerts: usize,
}

impl MemoryAlertSink {
    pub fn new(max_alerts: usize) -> Self {
        Self {
            alerts: RwLock::new(VecDeque::new()),
            max_alerts,
        }
    }

    /// Up to `limit` alerts, oldest first
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        match self.alerts.read() {
            Ok(alerts) => {
                let skip = alerts.len().saturating_sub(limit);
                alerts.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// All retained alerts, oldest first
    pub fn all(&self) -> Vec<Alert> {
        self.recent(usize::MAX)
    }

    pub fn count(&self) -> usize {
        self.alerts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn of_kind(&self, kind: AlertKind) -> Vec<Alert> {
        match self.alerts.read() {
            Ok(alerts) => alerts.iter().filter(|a| a.kind == kind).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for MemoryAlertSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl AlertSink for MemoryAlertSink {
    fn deliver(&self, alert: &Alert) {
        let Ok(mut alerts) = self.alerts.write() else {
            tracing::warn!("Alert sink lock poisoned, alert discarded");
            return;
        };
        alerts.push_back(alert.clone());
        while self.max_alerts > 0 && alerts.len() > self.max_alerts {
            alerts.pop_front();
        }
    }
}
