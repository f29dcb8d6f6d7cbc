//! Networked key-value cache client and the checkpoint store built on it.
//!
//! The cache is the first persistence tier: it answers faster than the
//! filesystem and is shared between operator machines, but it may be down, so
//! it is always composed with a filesystem fallback
//! (see [`TieredCheckpointStore`](crate::checkpoint::TieredCheckpointStore)).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{CacheError, ResolvaError};

/// Default time-to-live for checkpoint entries: 24 hours.
pub const DEFAULT_CHECKPOINT_TTL: Duration = Duration::from_secs(86_400);

/// Cache key for a task's workflow state.
pub fn state_key(task_id: &str) -> String {
    format!("dispute:state:{task_id}")
}

/// HTTP client for the key-value cache.
///
/// Keys live under `{base_url}/keys/{key}`; `PUT` stores a JSON value with a
/// `ttl_secs` query parameter, `GET` returns it (404 is a miss, not an error).
pub struct KvCacheClient {
    client: Client,
    base_url: String,
}

impl KvCacheClient {
    /// Create a client pointing at the given cache base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/keys/{key}", self.base_url.trim_end_matches('/'))
    }

    pub async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let response = self
            .client
            .put(self.key_url(key))
            .query(&[("ttl_secs", ttl.as_secs().to_string())])
            .json(value)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(CacheError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let response = self.client.get(self.key_url(key)).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(CacheError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let value = response.json::<Value>().await?;
        Ok(Some(value))
    }
}

/// Checkpoint store backed by the cache: one key per task holding the latest
/// checkpoint, refreshed (and its TTL reset) on every save.
pub struct CacheCheckpointStore {
    client: KvCacheClient,
    ttl: Duration,
}

impl CacheCheckpointStore {
    pub fn new(client: KvCacheClient) -> Self {
        Self::with_ttl(client, DEFAULT_CHECKPOINT_TTL)
    }

    pub fn with_ttl(client: KvCacheClient, ttl: Duration) -> Self {
        Self { client, ttl }
    }
}

#[async_trait]
impl CheckpointStore for CacheCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ResolvaError> {
        let key = state_key(&checkpoint.task_id);
        let value = serde_json::to_value(checkpoint)?;
        self.client.put(&key, &value, self.ttl).await?;
        Ok(())
    }

    async fn load_latest(&self, task_id: &str) -> Result<Option<Checkpoint>, ResolvaError> {
        let key = state_key(task_id);
        let Some(value) = self.client.get(&key).await? else {
            return Ok(None);
        };
        let checkpoint: Checkpoint = serde_json::from_value(value)
            .map_err(|e| CacheError::Decode(e.to_string()))?;
        Ok(Some(checkpoint))
    }
}
