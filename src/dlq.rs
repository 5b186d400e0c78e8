//! Dead-letter record of messages a consumer gave up on
//!
//! The alerting engine records messages it could not parse or validate,
//! the log shipper records documents it dropped before reconnecting.
//! Entries are kept for operator inspection only: nothing here is ever
//! re-delivered or re-indexed.

use crate::error::Result;
use crate::types::{ReceivedEvent, Timestamp};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consumer that dead-lettered a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStage {
    /// Skipped by the alerting engine (schema or parse failure)
    Alerting,
    /// Dropped by the log shipper (processing or store failure)
    Shipping,
}

impl DeadLetterStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterStage::Alerting => "alerting",
            DeadLetterStage::Shipping => "shipping",
        }
    }
}

/// A message a consumer skipped or dropped, with the reason
#[derive(Debug, Clone)]
pub struct DeadLetterEvent {
    /// The raw message as delivered
    pub event: ReceivedEvent,

    pub stage: DeadLetterStage,

    /// Why the message was given up on
    pub reason: String,

    pub dead_lettered_at: Timestamp,
}

impl DeadLetterEvent {
    pub fn new(event: ReceivedEvent, stage: DeadLetterStage, reason: impl Into<String>) -> Self {
        Self {
            event,
            stage,
            reason: reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Trait for dead-letter handlers
#[async_trait]
pub trait DlqHandler: Send + Sync {
    /// Record a dead-lettered message
    async fn handle(&self, event: DeadLetterEvent) -> Result<()>;

    /// Number of retained entries
    async fn count(&self) -> Result<usize>;

    /// Most recent entries first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEvent>>;
}

/// Bounded in-memory dead-letter handler
///
/// The oldest entries are discarded once `max_events` is exceeded.
pub struct MemoryDlqHandler {
    events: Arc<RwLock<Vec<DeadLetterEvent>>>,
    max_events: usize,
}

impl MemoryDlqHandler {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            max_events,
        }
    }
}

impl Default for MemoryDlqHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DlqHandler for MemoryDlqHandler {
    async fn handle(&self, event: DeadLetterEvent) -> Result<()> {
        tracing::warn!(
            stage = event.stage.as_str(),
            topic = %event.event.topic,
            sequence = event.event.sequence,
            reason = %event.reason,
            "Message dead-lettered"
        );

        let mut events = self.events.write().await;
        events.push(event);

        if self.max_events > 0 && events.len() > self.max_events {
            let drain_count = events.len() - self.max_events;
            events.drain(..drain_count);
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let events = self.events.read().await;
        Ok(events.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}

/// Log how many messages were dead-lettered and the latest `limit` of them
///
/// Returns the total count.
pub async fn log_summary(dlq: &dyn DlqHandler, limit: usize) -> Result<usize> {
    let total = dlq.count().await?;
    if total == 0 {
        return Ok(0);
    }

    tracing::warn!(total, "Messages were dead-lettered during this run");
    for entry in dlq.list(limit).await? {
        tracing::warn!(
            stage = entry.stage.as_str(),
            topic = %entry.event.topic,
            sequence = entry.event.sequence,
            reason = %entry.reason,
            at = %entry.dead_lettered_at,
            "Dead-lettered message"
        );
    }
    Ok(total)
}
