//! In-memory event provider
//!
//! Single-process broker for tests and local runs. Keeps one ordered log
//! of all topics and a committed position per (consumer group, topic), so
//! it mirrors the group/offset semantics of a real broker: a group that
//! resubscribes resumes where it left off, and a new group starts at the
//! earliest retained message or at the tail depending on its
//! `DeliverPolicy`.

use crate::error::{Result, SentinelError};
use crate::provider::{EventProvider, ProviderInfo, Subscription};
use crate::types::{DeliverPolicy, ReceivedEvent, SubscribeOptions};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Configuration for the in-memory provider
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum retained messages; the oldest are discarded first
    pub max_events: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
        }
    }
}

/// In-memory broker
///
/// Cheap to clone; clones share the same log.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    config: MemoryConfig,
    state: Mutex<State>,
    notify: Notify,
    closed: AtomicBool,
}

#[derive(Default)]
struct State {
    log: VecDeque<StoredMessage>,
    last_sequence: u64,
    bytes: u64,
    /// (group, topic) → next sequence to deliver
    cursors: HashMap<(String, String), u64>,
    consumers: usize,
}

struct StoredMessage {
    topic: String,
    sequence: u64,
    payload: Bytes,
}

impl MemoryProvider {
    /// Create a provider with the given configuration
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ..Default::default()
            }),
        }
    }

    /// Shut the broker down
    ///
    /// Pending and future `next()` calls return `Ok(None)` once the
    /// messages already committed to each group are drained; publishing
    /// fails.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Committed position of `group` on `topic` (next sequence to deliver)
    pub fn committed(&self, group: &str, topic: &str) -> Option<u64> {
        let state = self.inner.lock().ok()?;
        state
            .cursors
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| SentinelError::Provider(format!("Memory provider lock poisoned: {}", e)))
    }

    fn take_next(&self, group: &str, topics: &[String]) -> Result<Option<ReceivedEvent>> {
        let mut state = self.lock()?;

        let cursors: Vec<u64> = topics
            .iter()
            .map(|t| {
                state
                    .cursors
                    .get(&(group.to_string(), t.clone()))
                    .copied()
                    .unwrap_or(0)
            })
            .collect();
        let min_cursor = match cursors.iter().min() {
            Some(c) => *c,
            None => return Ok(None),
        };

        let start = state.log.partition_point(|m| m.sequence < min_cursor);
        let found = state.log.iter().skip(start).find_map(|m| {
            topics
                .iter()
                .position(|t| *t == m.topic)
                .filter(|&i| m.sequence >= cursors[i])
                .map(|_| ReceivedEvent {
                    topic: m.topic.clone(),
                    sequence: m.sequence,
                    num_delivered: 1,
                    payload: m.payload.clone(),
                })
        });

        if let Some(ref received) = found {
            state.cursors.insert(
                (group.to_string(), received.topic.clone()),
                received.sequence + 1,
            );
        }
        Ok(found)
    }
}

#[async_trait]
impl EventProvider for MemoryProvider {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<u64> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SentinelError::Publish {
                topic: topic.to_string(),
                reason: "provider closed".to_string(),
            });
        }

        let sequence = {
            let mut state = self.inner.lock()?;
            state.last_sequence += 1;
            let sequence = state.last_sequence;
            state.bytes += payload.len() as u64;
            state.log.push_back(StoredMessage {
                topic: topic.to_string(),
                sequence,
                payload,
            });

            let max = self.inner.config.max_events;
            while max > 0 && state.log.len() > max {
                if let Some(evicted) = state.log.pop_front() {
                    state.bytes -= evicted.payload.len() as u64;
                }
            }
            sequence
        };

        self.inner.notify.notify_waiters();
        tracing::trace!(topic = %topic, sequence, "Event stored");
        Ok(sequence)
    }

    async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>> {
        if topics.is_empty() {
            return Err(SentinelError::Subscribe {
                topic: String::new(),
                reason: "at least one topic is required".to_string(),
            });
        }

        {
            let mut state = self.inner.lock()?;
            let start = match opts.deliver_policy {
                DeliverPolicy::All => 0,
                DeliverPolicy::New => state.last_sequence + 1,
            };
            for topic in topics {
                state
                    .cursors
                    .entry((group.to_string(), topic.clone()))
                    .or_insert(start);
            }
            state.consumers += 1;
        }

        tracing::debug!(group = %group, topics = ?topics, "Memory subscription created");

        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            group: group.to_string(),
            topics: topics.to_vec(),
        }))
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let state = self.inner.lock()?;
        Ok(ProviderInfo {
            provider: "memory".to_string(),
            messages: state.log.len() as u64,
            bytes: state.bytes,
            consumers: state.consumers,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Subscription handle of the in-memory provider
pub struct MemorySubscription {
    inner: Arc<Inner>,
    group: String,
    topics: Vec<String>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<ReceivedEvent>> {
        loop {
            let notified = self.inner.notify.notified();

            if let Some(received) = self.inner.take_next(&self.group, &self.topics)? {
                return Ok(Some(received));
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            notified.await;
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.consumers = state.consumers.saturating_sub(1);
        }
    }
}
