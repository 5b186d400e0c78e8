//! Event provider trait: the broker abstraction
//!
//! Backends (NATS JetStream, in-memory) implement `EventProvider` so the
//! emitter, alerting engine and log shipper run unchanged on any of them.

use crate::error::Result;
use crate::types::{ReceivedEvent, SubscribeOptions};
use async_trait::async_trait;
use bytes::Bytes;

pub mod memory;
pub mod nats;

/// Core trait for broker backends
///
/// Subscriptions belong to a consumer group: each message is delivered
/// to one subscription of the group, and the group's committed position
/// survives reconnects. Delivery auto-commits, so a consumer that crashes
/// after receiving a message will not see it again, while one that
/// crashes before the commit will (at-least-once on replay).
#[async_trait]
pub trait EventProvider: Send + Sync {
    /// Publish a raw payload, returning the provider-assigned sequence number
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<u64>;

    /// Join consumer group `group` reading `topics`
    ///
    /// `opts.deliver_policy` only applies when the group has no committed
    /// position yet.
    async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>>;

    /// Get provider info (message count, etc.)
    async fn info(&self) -> Result<ProviderInfo>;

    /// Provider name (e.g., "nats", "memory")
    fn name(&self) -> &str;

    /// Health check: returns true if the provider is connected and operational
    ///
    /// Default implementation delegates to `info()` and returns true if it succeeds.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Async subscription handle for receiving events
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Receive the next message (auto-commit)
    ///
    /// Returns `Ok(None)` once the provider has shut down.
    async fn next(&mut self) -> Result<Option<ReceivedEvent>>;
}

/// Provider status information
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    /// Provider name
    pub provider: String,
    /// Total messages stored
    pub messages: u64,
    /// Total bytes used
    pub bytes: u64,
    /// Number of active consumers/subscribers
    pub consumers: usize,
}
