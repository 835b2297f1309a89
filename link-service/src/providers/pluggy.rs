//! Pluggy provider client.
//!
//! Pluggy authenticates with an `apiKey` minted from client credentials,
//! valid for two hours; connect tokens minted from it live thirty minutes.
//! The apiKey is cached with a margin so concurrent flows share one.

use super::{PluggyApi, ProviderError, parse_retry_after};
use crate::config::PluggyConfig;
use crate::models::{Environment, LinkToken, Provider};
use crate::services::cache::{CredentialCache, keys};
use crate::services::metrics::record_provider_call;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const API_KEY_VALIDITY_SECS: u64 = 7200;
const API_KEY_TTL_MARGIN_SECS: u64 = 300;
const CONNECT_TOKEN_VALIDITY_MINUTES: i64 = 30;

/// Pluggy client for the connect-token flow.
#[derive(Clone)]
pub struct PluggyClient {
    client: Client,
    config: PluggyConfig,
    cache: Arc<dyn CredentialCache>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    api_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectTokenRequest<'a> {
    options: ConnectTokenOptions<'a>,
    include_sandbox: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectTokenOptions<'a> {
    client_user_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectTokenResponse {
    access_token: String,
}

/// Pluggy error bodies carry `{ code, message }`, with `code` sometimes a
/// number and sometimes a string.
fn parse_error_body(body: &str) -> (String, String) {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let code = match value.get("code") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "UNKNOWN".to_string(),
        };
        let message = value
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or(body)
            .to_string();
        return (code, message);
    }

    ("UNKNOWN".to_string(), body.to_string())
}

impl PluggyClient {
    pub fn new(config: PluggyConfig, cache: Arc<dyn CredentialCache>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            config,
            cache,
            timeout,
        }
    }

    async fn send<T>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = request.timeout(self.timeout).send().await.map_err(|e| {
            let err = ProviderError::from_reqwest(e, self.timeout);
            record_provider_call("pluggy", operation, err.transport_label());
            err
        })?;

        let status = response.status();
        record_provider_call("pluggy", operation, status.as_str());
        let retry_after = parse_retry_after(response.headers());
        let body_text = response
            .text()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        tracing::debug!(status = %status, operation, "Pluggy API response");

        if status.is_success() {
            serde_json::from_str(&body_text)
                .map_err(|e| ProviderError::Malformed(format!("{}: {}", operation, e)))
        } else {
            let (code, message) = parse_error_body(&body_text);
            tracing::error!(status = %status, code = %code, operation, "Pluggy API call failed");

            if status.as_u16() == 429 {
                Err(ProviderError::RateLimited {
                    code,
                    message,
                    retry_after,
                })
            } else {
                Err(ProviderError::Api {
                    status: status.as_u16(),
                    code,
                    message,
                })
            }
        }
    }

    async fn api_key(&self) -> Result<String, ProviderError> {
        if let Some(api_key) = self.cache.get(keys::PLUGGY_API_KEY).await {
            return Ok(api_key);
        }

        let request = AuthRequest {
            client_id: &self.config.client_id,
            client_secret: self.config.client_secret.expose_secret(),
        };
        let url = format!("{}/auth", self.config.api_base_url);
        let response: AuthResponse = self
            .send("auth", self.client.post(&url).json(&request))
            .await?;

        tracing::info!("Pluggy apiKey obtained");
        let ttl = API_KEY_VALIDITY_SECS - API_KEY_TTL_MARGIN_SECS;
        self.cache
            .set(keys::PLUGGY_API_KEY, &response.api_key, Duration::from_secs(ttl))
            .await;

        Ok(response.api_key)
    }
}

#[async_trait]
impl PluggyApi for PluggyClient {
    async fn create_connect_token(
        &self,
        user_id: &str,
        environment: Environment,
    ) -> Result<LinkToken, ProviderError> {
        let api_key = self.api_key().await?;
        let request = ConnectTokenRequest {
            options: ConnectTokenOptions {
                client_user_id: user_id,
            },
            include_sandbox: !environment.is_production(),
        };

        let url = format!("{}/connect_token", self.config.api_base_url);
        let result: Result<ConnectTokenResponse, ProviderError> = self
            .send(
                "connect_token_create",
                self.client.post(&url).header("X-API-KEY", &api_key).json(&request),
            )
            .await;

        // An expired apiKey comes back as 401/403; drop it so the next call re-auths
        if let Err(ProviderError::Api { status: 401 | 403, .. }) = &result {
            self.cache.invalidate(keys::PLUGGY_API_KEY).await;
        }
        let response = result?;

        tracing::info!(user_id, "Pluggy connect token created");

        Ok(LinkToken {
            provider: Provider::Pluggy,
            token: response.access_token,
            expires_at: Utc::now() + chrono::Duration::minutes(CONNECT_TOKEN_VALIDITY_MINUTES),
        })
    }

    fn is_configured(&self) -> bool {
        !self.config.client_id.is_empty() && !self.config.client_secret.expose_secret().is_empty()
    }
}

/// Mock Pluggy client for testing.
pub struct MockPluggyApi {
    connect_count: AtomicU64,
    fail_next: Mutex<Option<ProviderError>>,
}

impl Default for MockPluggyApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPluggyApi {
    pub fn new() -> Self {
        Self {
            connect_count: AtomicU64::new(0),
            fail_next: Mutex::new(None),
        }
    }

    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Make the next call fail with the given error.
    pub fn fail_next(&self, err: ProviderError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(err);
        }
    }
}

#[async_trait]
impl PluggyApi for MockPluggyApi {
    async fn create_connect_token(
        &self,
        user_id: &str,
        _environment: Environment,
    ) -> Result<LinkToken, ProviderError> {
        if let Some(err) = self.fail_next.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(err);
        }

        let n = self.connect_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(user_id, "[MOCK] Pluggy connect token created");

        Ok(LinkToken {
            provider: Provider::Pluggy,
            token: format!("pluggy-connect-{}", n),
            expires_at: Utc::now() + chrono::Duration::minutes(CONNECT_TOKEN_VALIDITY_MINUTES),
        })
    }

    fn is_configured(&self) -> bool {
        true
    }
}
