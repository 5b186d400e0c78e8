//! NATS JetStream subscription: pull consumer message stream

use crate::error::{Result, SentinelError};
use crate::provider::Subscription;
use crate::types::ReceivedEvent;
use async_nats::jetstream::consumer::pull;
use async_trait::async_trait;
use futures::StreamExt;

/// Subscription backed by a JetStream pull consumer
///
/// Each message is acked as soon as it is handed out, which commits the
/// consumer group's position.
pub struct NatsSubscription {
    messages: pull::Stream,
    stream: String,
}

impl NatsSubscription {
    pub(crate) fn new(messages: pull::Stream, stream: String) -> Self {
        Self { messages, stream }
    }

    /// Name of the JetStream stream this subscription reads
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<ReceivedEvent>> {
        let msg = match self.messages.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                return Err(SentinelError::Consumer(format!(
                    "Failed to receive message from '{}': {}",
                    self.stream, e
                )))
            }
            None => return Ok(None),
        };

        let (sequence, num_delivered) = match msg.info() {
            Ok(info) => (info.stream_sequence, info.delivered.max(1) as u64),
            Err(_) => (0, 1),
        };

        let received = ReceivedEvent {
            topic: msg.subject.to_string(),
            sequence,
            num_delivered,
            payload: msg.payload.clone(),
        };

        msg.ack()
            .await
            .map_err(|e| SentinelError::Ack(e.to_string()))?;

        Ok(Some(received))
    }
}
