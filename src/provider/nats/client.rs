//! NATS JetStream client: connect, publish, subscribe

use super::config::{NatsConfig, StorageType};
use super::subscriber::NatsSubscription;
use crate::error::{Result, SentinelError};
use crate::types::{DeliverPolicy, SubscribeOptions};
use async_nats::jetstream;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// NATS JetStream client
///
/// Low-level client for publishing and subscribing to cache topics.
/// Manages the connection and JetStream stream lifecycle.
pub struct NatsClient {
    /// NATS client connection
    client: async_nats::Client,

    /// JetStream context
    jetstream: jetstream::Context,

    /// JetStream stream handle (Mutex for methods requiring &mut self)
    stream: Mutex<jetstream::stream::Stream>,

    /// Configuration
    config: Arc<NatsConfig>,
}

impl NatsClient {
    /// Connect to NATS and initialize the JetStream stream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| SentinelError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let jetstream = jetstream::new(client.clone());
        let stream = ensure_stream(&jetstream, &config).await?;

        Ok(Self {
            client,
            jetstream,
            stream: Mutex::new(stream),
            config: Arc::new(config),
        })
    }

    /// Publish a payload, returning the JetStream sequence number
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<u64> {
        let ack = self
            .jetstream
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| SentinelError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        let ack = tokio::time::timeout(
            Duration::from_secs(self.config.request_timeout_secs),
            ack,
        )
        .await
        .map_err(|_| {
            SentinelError::Timeout(format!(
                "Publish ack timed out after {}s for topic '{}'",
                self.config.request_timeout_secs, topic
            ))
        })?
        .map_err(|e| SentinelError::Publish {
            topic: topic.to_string(),
            reason: format!("ack failed: {}", e),
        })?;

        tracing::debug!(topic = %topic, sequence = ack.sequence, "Event published");

        Ok(ack.sequence)
    }

    /// Join a consumer group as a durable pull consumer
    pub async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
        opts: &SubscribeOptions,
    ) -> Result<NatsSubscription> {
        let consumer_name = self.config.consumer_name(group);
        let config = build_consumer_config(&consumer_name, topics, opts);

        let consumer = self
            .stream
            .lock()
            .await
            .get_or_create_consumer(&consumer_name, config)
            .await
            .map_err(|e| {
                SentinelError::Consumer(format!(
                    "Failed to create durable consumer '{}': {}",
                    consumer_name, e
                ))
            })?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| SentinelError::Subscribe {
                topic: topics.join(","),
                reason: e.to_string(),
            })?;

        tracing::info!(
            consumer = %consumer_name,
            topics = ?topics,
            deliver = ?opts.deliver_policy,
            "Durable subscription created"
        );

        Ok(NatsSubscription::new(
            messages,
            self.config.stream_name.clone(),
        ))
    }

    /// Get stream info
    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self.stream.lock().await;
        let info = stream
            .info()
            .await
            .map_err(|e| SentinelError::Stream(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        })
    }

    /// Get the underlying NATS client
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

/// Summary of stream state
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: usize,
}

/// Build a durable pull consumer config for a consumer group
fn build_consumer_config(
    consumer_name: &str,
    topics: &[String],
    opts: &SubscribeOptions,
) -> jetstream::consumer::pull::Config {
    let deliver_policy = match opts.deliver_policy {
        DeliverPolicy::All => jetstream::consumer::DeliverPolicy::All,
        DeliverPolicy::New => jetstream::consumer::DeliverPolicy::New,
    };

    jetstream::consumer::pull::Config {
        durable_name: Some(consumer_name.to_string()),
        filter_subjects: topics.to_vec(),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        deliver_policy,
        ack_wait: opts
            .ack_wait_secs
            .map(Duration::from_secs)
            .unwrap_or_default(),
        ..Default::default()
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

/// Ensure the JetStream stream exists with the correct configuration
async fn ensure_stream(
    js: &jetstream::Context,
    config: &NatsConfig,
) -> Result<jetstream::stream::Stream> {
    let storage = match config.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config.stream_subjects(),
        storage,
        max_messages: config.max_events,
        max_age: Duration::from_secs(config.max_age_secs),
        max_bytes: config.max_bytes,
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    let stream = js
        .get_or_create_stream(stream_config)
        .await
        .map_err(|e| {
            SentinelError::Stream(format!(
                "Failed to create/get stream '{}': {}",
                config.stream_name, e
            ))
        })?;

    tracing::info!(
        stream = %config.stream_name,
        subjects = ?config.stream_subjects(),
        "JetStream stream ready"
    );

    Ok(stream)
}
