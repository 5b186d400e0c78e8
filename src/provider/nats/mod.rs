//! NATS JetStream event provider
//!
//! Implements `EventProvider` using NATS JetStream. Cache topics map
//! one-to-one onto subjects (`cache.heartbeat`, `cache.log.warn`, ...) of a
//! single stream; consumer groups map onto durable pull consumers.

mod client;
mod config;
mod subscriber;

pub use client::{NatsClient, StreamInfo};
pub use config::{NatsConfig, StorageType};
pub use subscriber::NatsSubscription;

use crate::error::Result;
use crate::provider::{EventProvider, ProviderInfo, Subscription};
use crate::types::SubscribeOptions;
use async_trait::async_trait;
use bytes::Bytes;

/// NATS JetStream event provider
///
/// Wraps `NatsClient` and implements the `EventProvider` trait.
pub struct NatsProvider {
    client: NatsClient,
}

impl NatsProvider {
    /// Connect to NATS and initialize the JetStream stream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl EventProvider for NatsProvider {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<u64> {
        self.client.publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>> {
        let sub = self.client.subscribe(group, topics, opts).await?;
        Ok(Box::new(sub))
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let info = self.client.stream_info().await?;
        Ok(ProviderInfo {
            provider: "nats".to_string(),
            messages: info.messages,
            bytes: info.bytes,
            consumers: info.consumer_count,
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}
