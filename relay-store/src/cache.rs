//! The gateway cache surface.
//!
//! A [`CacheClient`] wraps a [`KvBackend`] with a prefixed keyspace, JSON
//! value encoding, and a default TTL. All operations degrade to no-ops when
//! the backend is absent: reads miss, writes succeed silently. That keeps
//! cache outages non-fatal by construction.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use relay_types::{CacheConfig, StoreError};

use crate::kv::KvBackend;

/// Prefixed, JSON-typed cache over a [`KvBackend`].
#[derive(Clone)]
pub struct CacheClient {
    backend: Option<Arc<dyn KvBackend>>,
    prefix: String,
    default_ttl: Duration,
}

impl CacheClient {
    /// Wrap a connected backend.
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>, config: &CacheConfig) -> Self {
        Self {
            backend: Some(backend),
            prefix: config.key_prefix.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
        }
    }

    /// A client with no backend. Every read misses, every write is a no-op.
    #[must_use]
    pub fn disconnected(config: &CacheConfig) -> Self {
        Self {
            backend: None,
            prefix: config.key_prefix.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
        }
    }

    /// Whether a backend is attached and reachable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_connected())
    }

    /// The configured default TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// The backend, for substrates (locks) that need raw primitives.
    #[must_use]
    pub fn backend(&self) -> Option<Arc<dyn KvBackend>> {
        self.backend.clone()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    /// Read and decode a value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        let Some(raw) = backend.get(&self.full_key(key)).await? else {
            return Ok(None);
        };
        let value =
            serde_json::from_str(&raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(value))
    }

    /// Encode and write a value. `ttl = None` uses the default TTL.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let raw =
            serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        backend
            .set(&self.full_key(key), &raw, Some(ttl.unwrap_or(self.default_ttl)))
            .await
    }

    /// Delete a key. Returns whether it existed.
    pub async fn del(&self, key: &str) -> Result<bool, StoreError> {
        match &self.backend {
            Some(backend) => backend.del(&self.full_key(key)).await,
            None => Ok(false),
        }
    }

    /// Whether a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match &self.backend {
            Some(backend) => backend.exists(&self.full_key(key)).await,
            None => Ok(false),
        }
    }

    /// Reset a key's TTL.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        match &self.backend {
            Some(backend) => backend.expire(&self.full_key(key), ttl).await,
            None => Ok(false),
        }
    }

    /// List keys under the prefix matching a glob pattern.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };
        let full = self.full_key(pattern);
        let keys = backend.keys(&full).await?;
        let strip = format!("{}:", self.prefix);
        Ok(keys
            .into_iter()
            .map(|k| k.strip_prefix(&strip).map(str::to_string).unwrap_or(k))
            .collect())
    }

    // ---- Domain helpers --------------------------------------------------

    /// Cache a session record under `session:<id>`.
    pub async fn cache_session<T: Serialize>(
        &self,
        session_id: &str,
        session: &T,
    ) -> Result<(), StoreError> {
        self.set(&format!("session:{session_id}"), session, None).await
    }

    /// Read a cached session record.
    pub async fn get_session<T: DeserializeOwned>(
        &self,
        session_id: &str,
    ) -> Result<Option<T>, StoreError> {
        self.get(&format!("session:{session_id}")).await
    }

    /// Cache a model response under `modelresp:<key>`.
    pub async fn cache_model_response<T: Serialize>(
        &self,
        key: &str,
        response: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.set(&format!("modelresp:{key}"), response, Some(ttl)).await
    }

    /// Cache user data under `user:<id>`.
    pub async fn cache_user_data<T: Serialize>(
        &self,
        user_id: &str,
        data: &T,
    ) -> Result<(), StoreError> {
        self.set(&format!("user:{user_id}"), data, None).await
    }

    /// Cache an MCP result under `mcpresult:<key>`.
    pub async fn cache_mcp_result<T: Serialize>(
        &self,
        key: &str,
        result: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.set(&format!("mcpresult:{key}"), result, Some(ttl)).await
    }
}
