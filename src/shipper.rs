//! Log shipper: stream-to-index with drop-and-reconnect
//!
//! Every message is annotated with `source_topic` and `indexed_at` and
//! written as one document. A failure while processing a message is not
//! retried: the message is dropped and the store connection is rebuilt,
//! with bounded retries. Only connection establishment is retried.
//! Exhausting those retries is fatal and ends `run` with
//! `SentinelError::StoreUnavailable`; a stop signal ends the retries early
//! and `run` returns normally.

use crate::bus::EventBus;
use crate::dlq::{DeadLetterEvent, DeadLetterStage, DlqHandler};
use crate::error::{Result, SentinelError};
use crate::index::{IndexResponse, IndexStore, StoreConnector};
use crate::types::{DeliverPolicy, ReceivedEvent, SubscribeOptions, Topic};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Bounded connection retry
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Connection attempts before giving up
    pub max_attempts: u32,
    /// Wait between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Consumer group; its committed position survives restarts
    pub group: String,
    pub deliver_policy: DeliverPolicy,
    pub topics: Vec<String>,
    /// Target collection
    pub index: String,
    pub retry: RetryPolicy,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            group: "elastic-consumer-group".to_string(),
            deliver_policy: DeliverPolicy::All,
            topics: Topic::all().iter().map(|t| t.to_string()).collect(),
            index: "cache-logs".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Running counters, readable while the shipper runs
#[derive(Debug, Default)]
pub struct ShipperStats {
    received: AtomicU64,
    indexed: AtomicU64,
    dropped: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of [`ShipperStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipperStatsSnapshot {
    pub received: u64,
    pub indexed: u64,
    pub dropped: u64,
    /// Reconnects triggered by dropped messages
    pub reconnects: u64,
}

impl ShipperStats {
    pub fn snapshot(&self) -> ShipperStatsSnapshot {
        ShipperStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    pub fn indexed(&self) -> u64 {
        self.indexed.load(Ordering::Relaxed)
    }
}

pub struct LogShipper {
    bus: Arc<EventBus>,
    connector: Arc<dyn StoreConnector>,
    config: ShipperConfig,
    dlq: Option<Arc<dyn DlqHandler>>,
    stats: Arc<ShipperStats>,
}

impl LogShipper {
    pub fn new(bus: Arc<EventBus>, connector: Arc<dyn StoreConnector>, config: ShipperConfig) -> Self {
        Self {
            bus,
            connector,
            config,
            dlq: None,
            stats: Arc::new(ShipperStats::default()),
        }
    }

    /// Record dropped messages in `dlq`
    pub fn with_dlq(mut self, dlq: Arc<dyn DlqHandler>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    pub fn stats(&self) -> Arc<ShipperStats> {
        Arc::clone(&self.stats)
    }

    /// Open a store connection that passes the health probe
    ///
    /// Makes up to `retry.max_attempts` attempts, `retry.delay` apart.
    pub async fn connect_with_retry(&self) -> Result<Box<dyn IndexStore>> {
        let (_stop_tx, mut stop) = watch::channel(false);
        self.connect_until_stopped(&mut stop)
            .await?
            .ok_or_else(|| SentinelError::Connection("connection attempt cancelled".to_string()))
    }

    /// [`connect_with_retry`](Self::connect_with_retry) that gives up
    /// quietly with `None` once `stop` flips
    async fn connect_until_stopped(
        &self,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Option<Box<dyn IndexStore>>> {
        let policy = &self.config.retry;
        let target = self.connector.target();
        let mut last_error = String::from("no connection attempt made");

        for attempt in 1..=policy.max_attempts {
            if *stop.borrow() {
                return Ok(None);
            }
            let probed = tokio::select! {
                probed = self.probe() => probed,
                _ = stopped(stop) => return Ok(None),
            };
            match probed {
                Ok(store) => {
                    tracing::info!(store = %target, attempt, "Connected to index store");
                    return Ok(Some(store));
                }
                Err(e) => {
                    tracing::warn!(
                        store = %target,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Index store connection failed"
                    );
                    last_error = e.to_string();
                }
            }
            if attempt < policy.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay) => {}
                    _ = stopped(stop) => return Ok(None),
                }
            }
        }

        Err(SentinelError::StoreUnavailable {
            attempts: policy.max_attempts,
            reason: last_error,
        })
    }

    async fn probe(&self) -> Result<Box<dyn IndexStore>> {
        let store = self.connector.connect().await?;
        if store.health().await? {
            Ok(store)
        } else {
            Err(SentinelError::Connection(format!(
                "{} health probe failed",
                self.connector.target()
            )))
        }
    }

    /// Annotate one message and index it
    pub async fn ship(&self, store: &dyn IndexStore, received: &ReceivedEvent) -> Result<IndexResponse> {
        let mut document = received.document()?;
        document.insert("source_topic".to_string(), Value::from(received.topic.as_str()));
        document.insert(
            "indexed_at".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        let document = Value::Object(document);

        tracing::info!(
            topic = %received.topic,
            sequence = received.sequence,
            document = %serde_json::to_string_pretty(&document).unwrap_or_default(),
            "Received event"
        );

        let resp = store.index(&self.config.index, &document).await?;
        tracing::info!(
            index = %resp.index,
            id = %resp.id,
            result = %resp.result,
            "Indexed event"
        );
        Ok(resp)
    }

    /// Consume until `stop` flips or the stream ends
    ///
    /// Returns the final counters, or `StoreUnavailable` if the store could
    /// not be reconnected.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<ShipperStatsSnapshot> {
        let mut store = match self.connect_until_stopped(&mut stop).await? {
            Some(store) => store,
            None => return Ok(self.finish()),
        };
        let mut sub = self
            .bus
            .subscribe(
                &self.config.group,
                &self.config.topics,
                &SubscribeOptions::deliver(self.config.deliver_policy),
            )
            .await?;

        loop {
            let next = tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
                next = sub.next() => next,
            };

            let received = match next {
                Ok(Some(received)) => received,
                Ok(None) => {
                    tracing::info!("Event stream closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to receive event");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            self.stats.received.fetch_add(1, Ordering::Relaxed);
            match self.ship(store.as_ref(), &received).await {
                Ok(_) => {
                    self.stats.indexed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        topic = %received.topic,
                        sequence = received.sequence,
                        error = %e,
                        "Error processing event, reconnecting to index store"
                    );
                    self.dead_letter(received, &e).await;

                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    match self.connect_until_stopped(&mut stop).await? {
                        Some(reconnected) => store = reconnected,
                        None => break,
                    }
                }
            }
        }

        Ok(self.finish())
    }

    fn finish(&self) -> ShipperStatsSnapshot {
        let stats = self.stats.snapshot();
        tracing::info!(
            received = stats.received,
            indexed = stats.indexed,
            dropped = stats.dropped,
            reconnects = stats.reconnects,
            "Log shipper stopped"
        );
        stats
    }

    async fn dead_letter(&self, received: ReceivedEvent, error: &SentinelError) {
        if let Some(dlq) = &self.dlq {
            let entry = DeadLetterEvent::new(received, DeadLetterStage::Shipping, error.to_string());
            if let Err(e) = dlq.handle(entry).await {
                tracing::warn!(error = %e, "Failed to record dropped message");
            }
        }
    }
}

/// Resolves once `stop` is set or its sender is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndexStore;
    use crate::provider::memory::MemoryProvider;
    use crate::types::{Event, NodeStatus};
    use bytes::Bytes;

    fn shipper(bus: Arc<EventBus>, store: &MemoryIndexStore) -> LogShipper {
        LogShipper::new(bus, Arc::new(store.clone()), ShipperConfig::default())
    }

    fn received(payload: &'static [u8]) -> ReceivedEvent {
        ReceivedEvent {
            topic: "cache.heartbeat".to_string(),
            sequence: 1,
            num_delivered: 1,
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn test_ship_adds_provenance() {
        let store = MemoryIndexStore::new();
        let s = shipper(Arc::new(EventBus::new(MemoryProvider::default())), &store);

        let resp = s
            .ship(&store, &received(br#"{"node_id":"n1","status":"UP"}"#))
            .await
            .unwrap();
        assert_eq!(resp.index, "cache-logs");

        let doc = &store.documents("cache-logs")[0];
        assert_eq!(doc["node_id"], "n1");
        assert_eq!(doc["source_topic"], "cache.heartbeat");
        assert!(doc["indexed_at"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_ship_rejects_non_object() {
        let store = MemoryIndexStore::new();
        let s = shipper(Arc::new(EventBus::new(MemoryProvider::default())), &store);
        assert!(s.ship(&store, &received(b"[1]")).await.is_err());
        assert!(s.ship(&store, &received(b"oops")).await.is_err());
        assert_eq!(store.count("cache-logs"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_recovers() {
        let store = MemoryIndexStore::new();
        store.fail_next_connects(2);
        let s = shipper(Arc::new(EventBus::new(MemoryProvider::default())), &store);

        let started = tokio::time::Instant::now();
        s.connect_with_retry().await.unwrap();
        assert_eq!(store.connect_attempts().len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_exhausts() {
        let store = MemoryIndexStore::new();
        store.set_healthy(false);
        let s = shipper(Arc::new(EventBus::new(MemoryProvider::default())), &store);

        let err = s.connect_with_retry().await.err().unwrap();
        assert!(matches!(err, SentinelError::StoreUnavailable { attempts: 3, .. }));
        let attempts = store.connect_attempts();
        assert_eq!(attempts.len(), 3);
        for pair in attempts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drops_bad_message_and_reconnects() {
        let provider = MemoryProvider::default();
        let bus = Arc::new(EventBus::new(provider.clone()));
        bus.publish(&Event::heartbeat("n1", NodeStatus::Up)).await.unwrap();
        bus.publish_raw("cache.log.info", "not json").await.unwrap();
        bus.publish(&Event::heartbeat("n1", NodeStatus::Up)).await.unwrap();
        provider.close();

        let store = MemoryIndexStore::new();
        let s = shipper(bus, &store);
        let stats_handle = s.stats();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let stats = s.run(stop_rx).await.unwrap();
        assert_eq!(
            stats,
            ShipperStatsSnapshot {
                received: 3,
                indexed: 2,
                dropped: 1,
                reconnects: 1,
            }
        );
        assert_eq!(stats_handle.indexed(), 2);
        // initial connection plus one reconnect
        assert_eq!(store.connect_attempts().len(), 2);
        assert_eq!(store.count("cache-logs"), 2);
    }

    #[tokio::test]
    async fn test_run_honors_stop_signal() {
        let bus = Arc::new(EventBus::new(MemoryProvider::default()));
        let store = MemoryIndexStore::new();
        let s = shipper(bus, &store);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(s.run(stop_rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats.received, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_reconnect_backoff() {
        let provider = MemoryProvider::default();
        let bus = Arc::new(EventBus::new(provider.clone()));
        let store = MemoryIndexStore::new();
        let s = shipper(bus.clone(), &store);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(s.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.set_healthy(false);
        bus.publish(&Event::heartbeat("n1", NodeStatus::Up)).await.unwrap();

        // first reconnect attempt fails, shipper is now backing off
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.connect_attempts().len(), 2);

        let stopped_at = tokio::time::Instant::now();
        stop_tx.send(true).unwrap();
        let stats = task.await.unwrap().unwrap();

        assert!(stopped_at.elapsed() < Duration::from_secs(1));
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(store.connect_attempts().len(), 2);
    }
}
