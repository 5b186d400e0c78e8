//! High-level event bus built on pluggable providers
//!
//! `EventBus` routes typed cache events to their topics and joins
//! consumer groups on any `EventProvider` implementation.

use crate::error::Result;
use crate::provider::{EventProvider, ProviderInfo, Subscription};
use crate::types::{Event, SubscribeOptions, Topic};
use bytes::Bytes;

/// High-level event bus backed by a pluggable provider
pub struct EventBus {
    provider: Box<dyn EventProvider>,
}

impl EventBus {
    /// Create a new event bus from a provider
    pub fn new(provider: impl EventProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
        }
    }

    /// Get the provider name
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Encode an event and publish it to its topic
    pub async fn publish(&self, event: &Event) -> Result<u64> {
        let topic = Topic::for_event(event);
        let payload = serde_json::to_vec(event)?;
        let sequence = self.provider.publish(topic.as_str(), payload.into()).await?;

        tracing::debug!(
            node_id = %event.node_id(),
            topic = %topic,
            sequence,
            "Event emitted"
        );
        Ok(sequence)
    }

    /// Publish an already-encoded payload to a topic
    pub async fn publish_raw(&self, topic: &str, payload: impl Into<Bytes>) -> Result<u64> {
        self.provider.publish(topic, payload.into()).await
    }

    /// Join consumer group `group` on the given topics
    pub async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>> {
        let sub = self.provider.subscribe(group, topics, opts).await?;

        tracing::info!(
            group = %group,
            topics = ?topics,
            provider = %self.provider.name(),
            "Consumer group joined"
        );
        Ok(sub)
    }

    /// Get provider info
    pub async fn info(&self) -> Result<ProviderInfo> {
        self.provider.info().await
    }

    /// Get a reference to the underlying provider
    pub fn provider(&self) -> &dyn EventProvider {
        self.provider.as_ref()
    }
}
