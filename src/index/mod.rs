//! Indexing store abstraction for the log shipper
//!
//! An `IndexStore` is one live connection to a search store; a
//! `StoreConnector` builds fresh connections, which is how the shipper
//! recovers from a suspected outage.

use crate::error::{Result, SentinelError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::Instant;

pub mod elastic;

pub use elastic::{ElasticsearchConnector, ElasticsearchStore};

/// Result of indexing one document
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexResponse {
    /// Store-assigned document id
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_index")]
    pub index: String,

    /// e.g. `created`
    pub result: String,
}

/// A live connection to an indexing store
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Index one document into collection `index`
    async fn index(&self, index: &str, document: &Value) -> Result<IndexResponse>;

    /// Health probe; `Ok(false)` means reachable but not serving
    async fn health(&self) -> Result<bool>;

    fn name(&self) -> &str;
}

/// Factory for fresh store connections
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn IndexStore>>;

    /// Human-readable target, for logs
    fn target(&self) -> String;
}

/// In-memory indexing store with failure injection
///
/// Clones share the same documents, so a clone handed out by `connect`
/// sees everything indexed through earlier connections.
#[derive(Clone, Default)]
pub struct MemoryIndexStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    documents: RwLock<HashMap<String, Vec<Value>>>,
    fail_index: AtomicU32,
    fail_connects: AtomicU32,
    unhealthy: AtomicBool,
    connect_attempts: Mutex<Vec<Instant>>,
    next_id: AtomicU64,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` index calls fail
    pub fn fail_next_index(&self, n: u32) {
        self.inner.fail_index.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` connection attempts fail
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.fail_connects.store(n, Ordering::SeqCst);
    }

    /// While unhealthy, index calls fail and the health probe reports `false`
    pub fn set_healthy(&self, healthy: bool) {
        self.inner.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    /// Documents indexed into `index`, in order
    pub fn documents(&self, index: &str) -> Vec<Value> {
        self.inner
            .documents
            .read()
            .map(|docs| docs.get(index).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn count(&self, index: &str) -> usize {
        self.inner
            .documents
            .read()
            .map(|docs| docs.get(index).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// When each connection attempt happened, successful or not
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.inner
            .connect_attempts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn index(&self, index: &str, document: &Value) -> Result<IndexResponse> {
        if self.inner.unhealthy.load(Ordering::SeqCst) || take_one(&self.inner.fail_index) {
            return Err(SentinelError::Index {
                index: index.to_string(),
                reason: "store unavailable".to_string(),
            });
        }

        let mut docs = self.inner.documents.write().map_err(|e| SentinelError::Index {
            index: index.to_string(),
            reason: format!("Memory store lock poisoned: {}", e),
        })?;
        docs.entry(index.to_string())
            .or_default()
            .push(document.clone());

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IndexResponse {
            id: id.to_string(),
            index: index.to_string(),
            result: "created".to_string(),
        })
    }

    async fn health(&self) -> Result<bool> {
        Ok(!self.inner.unhealthy.load(Ordering::SeqCst))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl StoreConnector for MemoryIndexStore {
    async fn connect(&self) -> Result<Box<dyn IndexStore>> {
        if let Ok(mut attempts) = self.inner.connect_attempts.lock() {
            attempts.push(Instant::now());
        }
        if take_one(&self.inner.fail_connects) {
            return Err(SentinelError::Connection(
                "memory store refused connection".to_string(),
            ));
        }
        Ok(Box::new(self.clone()))
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}
