//! Plaid provider client.
//!
//! Implements the Link token creation and public-token exchange calls.
//! Plaid is the synchronous, token-based provider: the link token minted
//! here is consumed by the Link SDK out of band, and the resulting public
//! token comes back through the exchange step.

use super::{PlaidApi, PlaidLinkParams, ProviderError, parse_retry_after};
use crate::config::PlaidConfig;
use crate::models::{AccessCredential, LinkToken, Provider};
use crate::services::metrics::record_provider_call;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const COUNTRY_CODES: &[&str] = &["US", "CA"];
const DEFAULT_LANGUAGE: &str = "en";

/// Plaid client for the Link token lifecycle.
#[derive(Clone)]
pub struct PlaidClient {
    client: Client,
    config: PlaidConfig,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct LinkTokenCreateRequest<'a> {
    client_name: &'a str,
    language: &'a str,
    country_codes: &'static [&'static str],
    user: LinkTokenUser<'a>,
    /// Omitted in update mode: Plaid rejects `products` when an
    /// `access_token` is supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    products: Option<&'static [&'static str]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct LinkTokenUser<'a> {
    client_user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LinkTokenCreateResponse {
    link_token: String,
    expiration: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct PublicTokenExchangeRequest<'a> {
    public_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct PublicTokenExchangeResponse {
    access_token: String,
    item_id: String,
}

/// Plaid API error body.
#[derive(Debug, Deserialize)]
pub struct PlaidApiError {
    pub error_type: String,
    pub error_code: String,
    pub error_message: String,
}

impl PlaidApiError {
    fn unknown(body: &str) -> Self {
        Self {
            error_type: "UNKNOWN".to_string(),
            error_code: "UNKNOWN".to_string(),
            error_message: body.to_string(),
        }
    }
}

impl PlaidClient {
    pub fn new(config: PlaidConfig, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            config,
            timeout,
        }
    }

    async fn post<B, T>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError>
    where
        B: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.config.api_base_url, path);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("PLAID-CLIENT-ID", &self.config.client_id)
            .header("PLAID-SECRET", self.config.secret.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let err = ProviderError::from_reqwest(e, self.timeout);
                record_provider_call("plaid", operation, err.transport_label());
                err
            })?;

        let status = response.status();
        record_provider_call("plaid", operation, status.as_str());
        let retry_after = parse_retry_after(response.headers());
        let body_text = response
            .text()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        tracing::debug!(status = %status, operation, "Plaid API response");

        if status.is_success() {
            serde_json::from_str(&body_text)
                .map_err(|e| ProviderError::Malformed(format!("{}: {}", operation, e)))
        } else {
            let error: PlaidApiError = serde_json::from_str(&body_text)
                .unwrap_or_else(|_| PlaidApiError::unknown(&body_text));
            tracing::error!(
                status = %status,
                code = %error.error_code,
                error_type = %error.error_type,
                operation,
                "Plaid API call failed"
            );

            if status.as_u16() == 429 || error.error_type == "RATE_LIMIT_EXCEEDED" {
                Err(ProviderError::RateLimited {
                    code: error.error_code,
                    message: error.error_message,
                    retry_after,
                })
            } else {
                Err(ProviderError::Api {
                    status: status.as_u16(),
                    code: error.error_code,
                    message: error.error_message,
                })
            }
        }
    }
}

#[async_trait]
impl PlaidApi for PlaidClient {
    async fn create_link_token(
        &self,
        params: &PlaidLinkParams,
    ) -> Result<LinkToken, ProviderError> {
        let request = LinkTokenCreateRequest {
            client_name: &self.config.client_name,
            language: params.language.as_deref().unwrap_or(DEFAULT_LANGUAGE),
            country_codes: COUNTRY_CODES,
            user: LinkTokenUser {
                client_user_id: &params.user_id,
            },
            products: match params.access_token {
                Some(_) => None,
                None => Some(&["transactions"]),
            },
            access_token: params.access_token.as_deref(),
        };

        let response: LinkTokenCreateResponse = self
            .post("link_token_create", "/link/token/create", &request)
            .await?;

        tracing::info!(user_id = %params.user_id, "Plaid link token created");

        Ok(LinkToken {
            provider: Provider::Plaid,
            token: response.link_token,
            expires_at: response.expiration,
        })
    }

    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<AccessCredential, ProviderError> {
        let request = PublicTokenExchangeRequest { public_token };

        let response: PublicTokenExchangeResponse = self
            .post(
                "public_token_exchange",
                "/item/public_token/exchange",
                &request,
            )
            .await?;

        tracing::info!(item_id = %response.item_id, "Plaid public token exchanged");

        Ok(AccessCredential {
            provider: Provider::Plaid,
            access_token: response.access_token,
            item_or_account_ids: vec![response.item_id],
            obtained_at: Utc::now(),
        })
    }

    fn is_configured(&self) -> bool {
        !self.config.client_id.is_empty() && !self.config.secret.expose_secret().is_empty()
    }
}

/// Mock Plaid client for testing.
///
/// Tracks exchanged tokens so a second exchange of the same public token
/// fails the way Plaid does, with `INVALID_PUBLIC_TOKEN`.
pub struct MockPlaidApi {
    link_count: AtomicU64,
    exchange_count: AtomicU64,
    exchanged: Mutex<HashSet<String>>,
    fail_next: Mutex<Option<ProviderError>>,
}

impl Default for MockPlaidApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlaidApi {
    pub fn new() -> Self {
        Self {
            link_count: AtomicU64::new(0),
            exchange_count: AtomicU64::new(0),
            exchanged: Mutex::new(HashSet::new()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn link_count(&self) -> u64 {
        self.link_count.load(Ordering::SeqCst)
    }

    pub fn exchange_count(&self) -> u64 {
        self.exchange_count.load(Ordering::SeqCst)
    }

    /// Make the next call fail with the given error.
    pub fn fail_next(&self, err: ProviderError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(err);
        }
    }

    fn take_failure(&self) -> Option<ProviderError> {
        self.fail_next.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait]
impl PlaidApi for MockPlaidApi {
    async fn create_link_token(
        &self,
        params: &PlaidLinkParams,
    ) -> Result<LinkToken, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let n = self.link_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(user_id = %params.user_id, "[MOCK] Plaid link token created");

        Ok(LinkToken {
            provider: Provider::Plaid,
            token: format!("link-sandbox-mock-{}", n),
            expires_at: Utc::now() + chrono::Duration::hours(4),
        })
    }

    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<AccessCredential, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        self.exchange_count.fetch_add(1, Ordering::SeqCst);

        let mut exchanged = self
            .exchanged
            .lock()
            .map_err(|_| ProviderError::Connection("mock state mutex poisoned".to_string()))?;

        if !exchanged.insert(public_token.to_string()) {
            return Err(ProviderError::Api {
                status: 400,
                code: "INVALID_PUBLIC_TOKEN".to_string(),
                message: "provided public token was already exchanged".to_string(),
            });
        }

        Ok(AccessCredential {
            provider: Provider::Plaid,
            access_token: format!("access-sandbox-{}", public_token),
            item_or_account_ids: vec![format!("item-{}", public_token)],
            obtained_at: Utc::now(),
        })
    }

    fn is_configured(&self) -> bool {
        true
    }
}
