//! Alert classification and rendering
//!
//! `classify` is the routing table from observations to alerts. It is a
//! pure function: the same observation always yields the same alert
//! content, only the render timestamp differs.

use crate::types::{Event, LogLevel, NodeStatus};
use chrono::{DateTime, Local};
use colored::{Color, ColoredString, Colorize};
use std::fmt;
use std::time::Duration;

/// Class of an operator-facing alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    Error,
    Warning,
    HeartbeatMissing,
    Shutdown,
}

impl AlertKind {
    /// Label printed in the alert line
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::Error => "ERROR",
            AlertKind::Warning => "WARNING",
            AlertKind::HeartbeatMissing => "HEARTBEAT MISSING",
            AlertKind::Shutdown => "SHUTDOWN",
        }
    }

    /// Presentation color; carries no control-flow meaning
    pub fn color(&self) -> Color {
        match self {
            AlertKind::Error => Color::Red,
            AlertKind::Warning => Color::Yellow,
            AlertKind::HeartbeatMissing => Color::Magenta,
            AlertKind::Shutdown => Color::Cyan,
        }
    }

    pub fn all() -> [AlertKind; 4] {
        [
            AlertKind::Error,
            AlertKind::Warning,
            AlertKind::HeartbeatMissing,
            AlertKind::Shutdown,
        ]
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Something the alerting engine observed
#[derive(Debug, Clone)]
pub enum Observation {
    /// A decoded event from the stream
    Event(Event),
    /// Synthetic observation raised by the liveness monitor
    HeartbeatMissing {
        node_id: String,
        silent_for: Duration,
        threshold: Duration,
    },
}

/// One operator-facing alert
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub node_id: String,
    pub message: String,
    /// Alert-processing time, not event time
    pub raised_at: DateTime<Local>,
}

impl Alert {
    pub fn new(kind: AlertKind, node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: node_id.into(),
            message: message.into(),
            raised_at: Local::now(),
        }
    }

    /// `[YYYY-mm-dd HH:MM:SS] KIND: message`
    pub fn render_plain(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.raised_at.format("%Y-%m-%d %H:%M:%S"),
            self.kind.label(),
            self.message
        )
    }

    /// The plain line in the kind's color
    pub fn render(&self) -> String {
        self.styled().to_string()
    }

    /// Styled line; whether escapes are emitted is decided when displayed
    pub fn styled(&self) -> ColoredString {
        self.render_plain().color(self.kind.color())
    }
}

/// Route an observation to its alert
///
/// Returns `None` for every combination the routing table does not name
/// (INFO logs, UP heartbeats, registrations, ...).
pub fn classify(observation: &Observation) -> Option<Alert> {
    match observation {
        Observation::HeartbeatMissing {
            node_id, threshold, ..
        } => Some(Alert::new(
            AlertKind::HeartbeatMissing,
            node_id,
            format!(
                "No heartbeat from Node {} for {} seconds!",
                node_id,
                threshold.as_secs()
            ),
        )),
        Observation::Event(Event::Heartbeat(hb)) if hb.status == NodeStatus::Down => Some(
            Alert::new(
                AlertKind::Shutdown,
                &hb.node_id,
                format!("Node {} is shutting down!", hb.node_id),
            ),
        ),
        Observation::Event(Event::Log(log)) => match log.log_level {
            LogLevel::Error => {
                let detail = log
                    .error_details
                    .as_ref()
                    .map(|d| d.error_message.as_str())
                    .unwrap_or(log.message.as_str());
                Some(Alert::new(
                    AlertKind::Error,
                    &log.node_id,
                    format!(
                        "Error in {} (Node {}): {}",
                        log.service_name, log.node_id, detail
                    ),
                ))
            }
            LogLevel::Warn => Some(Alert::new(
                AlertKind::Warning,
                &log.node_id,
                format!(
                    "Warning in {} (Node {}): {}",
                    log.service_name, log.node_id, log.message
                ),
            )),
            LogLevel::Info => None,
        },
        Observation::Event(_) => None,
    }
}
