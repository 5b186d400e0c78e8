//! Elasticsearch-compatible indexing store over HTTP

use super::{IndexResponse, IndexStore, StoreConnector};
use crate::error::{Result, SentinelError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One HTTP client bound to an Elasticsearch endpoint
pub struct ElasticsearchStore {
    client: reqwest::Client,
    base_url: String,
}

impl ElasticsearchStore {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SentinelError::Connection(format!("build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl IndexStore for ElasticsearchStore {
    async fn index(&self, index: &str, document: &Value) -> Result<IndexResponse> {
        let url = format!("{}/{}/_doc", self.base_url, index);
        let index_err = |reason: String| SentinelError::Index {
            index: index.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(&url)
            .json(document)
            .send()
            .await
            .map_err(|e| index_err(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(index_err(format!("HTTP {}: {}", status, body)));
        }

        resp.json::<IndexResponse>()
            .await
            .map_err(|e| index_err(format!("parse response: {}", e)))
    }

    async fn health(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map_err(|e| SentinelError::Connection(format!("{}: {}", self.base_url, e)))?;
        Ok(resp.status().is_success())
    }

    fn name(&self) -> &str {
        "elasticsearch"
    }
}

/// Builds a fresh `ElasticsearchStore` per connection attempt
#[derive(Debug, Clone)]
pub struct ElasticsearchConnector {
    base_url: String,
    request_timeout: Duration,
}

impl ElasticsearchConnector {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl StoreConnector for ElasticsearchConnector {
    async fn connect(&self) -> Result<Box<dyn IndexStore>> {
        let store = ElasticsearchStore::new(&self.base_url, self.request_timeout)?;
        Ok(Box::new(store))
    }

    fn target(&self) -> String {
        self.base_url.clone()
    }
}
