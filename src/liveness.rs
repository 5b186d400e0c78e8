//! Per-node liveness bookkeeping for absence-based failure detection
//!
//! Times are broker-receipt instants on the monotonic clock, not the
//! emitter's wall-clock timestamps, so clock skew between nodes cannot
//! make a node look silent or alive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Liveness table shared by the consume loop (writer) and the scan timer (reader)
pub type SharedLiveness = Arc<Mutex<LivenessTable>>;

/// Last-seen record of one node
#[derive(Debug, Clone)]
pub struct NodeLivenessRecord {
    pub node_id: String,
    /// Only ever moves forward
    pub last_seen: Instant,
    pub first_seen: Instant,
    pub heartbeats: u64,
}

/// A node silent for longer than the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct SilentNode {
    pub node_id: String,
    pub silent_for: Duration,
}

/// All nodes seen so far. Records are never removed.
#[derive(Debug, Default)]
pub struct LivenessTable {
    records: HashMap<String, NodeLivenessRecord>,
}

impl LivenessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedLiveness {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Record a heartbeat received at `at`
    ///
    /// Creates the record if needed. Returns `true` if `last_seen` moved;
    /// a duplicate or older observation leaves it untouched.
    pub fn observe_heartbeat(&mut self, node_id: &str, at: Instant) -> bool {
        match self.records.get_mut(node_id) {
            Some(record) => {
                record.heartbeats += 1;
                if at > record.last_seen {
                    record.last_seen = at;
                    true
                } else {
                    false
                }
            }
            None => {
                self.insert(node_id, at, 1);
                true
            }
        }
    }

    /// Record any non-heartbeat event; only creates a missing record
    ///
    /// Returns `true` if the node was not known before.
    pub fn observe_first_seen(&mut self, node_id: &str, at: Instant) -> bool {
        if self.records.contains_key(node_id) {
            return false;
        }
        self.insert(node_id, at, 0);
        true
    }

    fn insert(&mut self, node_id: &str, at: Instant, heartbeats: u64) {
        tracing::debug!(node_id = %node_id, "Tracking new node");
        self.records.insert(
            node_id.to_string(),
            NodeLivenessRecord {
                node_id: node_id.to_string(),
                last_seen: at,
                first_seen: at,
                heartbeats,
            },
        );
    }

    pub fn last_seen(&self, node_id: &str) -> Option<Instant> {
        self.records.get(node_id).map(|r| r.last_seen)
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeLivenessRecord> {
        self.records.get(node_id)
    }

    /// Nodes with `now - last_seen > threshold`, sorted by node id
    pub fn silent_nodes(&self, now: Instant, threshold: Duration) -> Vec<SilentNode> {
        let mut silent: Vec<SilentNode> = self
            .records
            .values()
            .filter_map(|r| {
                let silent_for = now.saturating_duration_since(r.last_seen);
                (silent_for > threshold).then(|| SilentNode {
                    node_id: r.node_id.clone(),
                    silent_for,
                })
            })
            .collect();
        silent.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        silent
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
