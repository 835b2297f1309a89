//! Credential cache backing the linking flows.
//!
//! The cache is an accelerator, never a dependency: reads degrade to misses
//! and writes are best-effort, so every flow keeps working against the
//! providers when the backend is down.

use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cache key layout. Everything is namespaced by concern, then provider.
pub mod keys {
    use crate::models::Provider;

    pub const GOCARDLESS_ACCESS_TOKEN: &str = "credentials:gocardless:access-token";
    pub const GOCARDLESS_REFRESH_TOKEN: &str = "credentials:gocardless:refresh-token";
    pub const PLUGGY_API_KEY: &str = "credentials:pluggy:api-key";

    /// Agreement reuse key, scoped to the caller-supplied reference.
    pub fn agreement(institution_id: &str, caller_ref: &str) -> String {
        format!("agreement:gocardless:{}:{}", institution_id, caller_ref)
    }

    /// Secondary agreement key, looked up when building a consent link.
    pub fn agreement_by_id(agreement_id: &str) -> String {
        format!("agreement:gocardless:by-id:{}", agreement_id)
    }

    /// Requisition id under the per-attempt reference, resolved at exchange.
    pub fn requisition(reference: &str) -> String {
        format!("requisition:gocardless:{}", reference)
    }

    /// Diagnostic record of a minted link token. No flow reads it back.
    pub fn link_token(provider: Provider, user_id: &str) -> String {
        format!("linktoken:{}:{}", provider.as_str(), user_id)
    }
}

#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Look up a key. Backend failures are logged and reported as a miss.
    async fn get(&self, key: &str) -> Option<String>;
    /// Store a value with a TTL. Best-effort; failures are logged and dropped.
    async fn set(&self, key: &str, value: &str, ttl: Duration);
    /// Remove a key. Best-effort.
    async fn invalidate(&self, key: &str);
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(url: &str) -> Result<Self, redis::RedisError> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url)?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            e
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self { manager })
    }
}

#[async_trait]
impl CredentialCache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.manager.clone();
        let result: Result<Option<String>, redis::RedisError> =
            redis::cmd("GET").arg(key).query_async(&mut conn).await;

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, key, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let expiry_seconds = ttl.as_secs();
        // SET .. EX rejects a zero expiry
        if expiry_seconds == 0 {
            return;
        }

        let mut conn = self.manager.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(expiry_seconds)
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, key, "Cache write failed, continuing without it");
        }
    }

    async fn invalidate(&self, key: &str) {
        let mut conn = self.manager.clone();
        let result: Result<(), redis::RedisError> =
            redis::cmd("DEL").arg(key).query_async(&mut conn).await;

        if let Err(e) = result {
            tracing::warn!(error = %e, key, "Cache invalidation failed");
        }
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// Process-local fallback used when no Redis URL is configured.
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CredentialCache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(error = %e, key, "In-memory cache mutex poisoned, treating as miss");
                return None;
            }
        };

        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        }
    }

    async fn invalidate(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
