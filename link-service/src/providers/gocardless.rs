//! GoCardless Bank Account Data provider client.
//!
//! GoCardless is the consent-based provider: an end-user agreement is created
//! first, a requisition turns it into a hosted consent link, and the linked
//! accounts only become available once the requisition reaches `LN`.
//!
//! Unlike the other providers, GoCardless hands out its own short-lived API
//! tokens. The client manages that lifecycle itself: cached access token,
//! then refresh, then a brand-new token pair, with TTLs margined below the
//! provider-declared expiry.

use super::{GoCardLessApi, ProviderError, RequisitionParams, parse_retry_after};
use crate::config::GoCardLessConfig;
use crate::models::{Agreement, Provider, Requisition, RequisitionStatus};
use crate::services::cache::{CredentialCache, keys};
use crate::services::metrics::record_provider_call;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ACCESS_SCOPE: &[&str] = &["balances", "details", "transactions"];
/// Margin subtracted from provider-declared token expiry before caching.
const TOKEN_TTL_MARGIN_SECS: u64 = 60;

/// GoCardless client for agreements, requisitions, and API token upkeep.
#[derive(Clone)]
pub struct GoCardLessClient {
    client: Client,
    config: GoCardLessConfig,
    cache: Arc<dyn CredentialCache>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct NewTokenRequest<'a> {
    secret_id: &'a str,
    secret_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenPair {
    access: String,
    access_expires: u64,
    refresh: String,
    refresh_expires: u64,
}

#[derive(Debug, Serialize)]
struct RefreshTokenRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshedToken {
    access: String,
    access_expires: u64,
}

#[derive(Debug, Serialize)]
struct EndUserAgreementRequest<'a> {
    institution_id: &'a str,
    max_historical_days: u32,
    access_valid_for_days: u32,
    access_scope: &'static [&'static str],
}

#[derive(Debug, Deserialize)]
struct EndUserAgreementResponse {
    id: String,
    created: DateTime<Utc>,
    institution_id: String,
    max_historical_days: u32,
    access_valid_for_days: u32,
}

#[derive(Debug, Serialize)]
struct RequisitionCreateRequest<'a> {
    redirect: &'a str,
    institution_id: &'a str,
    agreement: &'a str,
    reference: &'a str,
}

/// Extract a provider code and message from a GoCardless error body.
///
/// Bodies come in two shapes: a flat `{ summary, detail }` object, or a
/// field-keyed one like `{ "reference": { summary, detail } }` for
/// per-field rejections. The field name becomes the code in the latter.
fn parse_error_body(body: &str) -> (String, String) {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(map) = value.as_object() {
            let summary = map.get("summary").and_then(|v| v.as_str());
            let detail = map.get("detail").and_then(|v| v.as_str());
            if summary.is_some() || detail.is_some() {
                let code = summary.unwrap_or("error").to_string();
                let message = detail.or(summary).unwrap_or_default().to_string();
                return (code, message);
            }

            for (field, entry) in map {
                if field == "status_code" {
                    continue;
                }
                if let Some(obj) = entry.as_object() {
                    let message = obj
                        .get("detail")
                        .or_else(|| obj.get("summary"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    return (field.clone(), message);
                }
                if let Some(arr) = entry.as_array() {
                    let message = arr
                        .iter()
                        .filter_map(|v| v.as_str())
                        .collect::<Vec<_>>()
                        .join("; ");
                    return (field.clone(), message);
                }
            }
        }
    }

    ("UNKNOWN".to_string(), body.to_string())
}

impl GoCardLessClient {
    pub fn new(
        config: GoCardLessConfig,
        cache: Arc<dyn CredentialCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            config,
            cache,
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
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
            record_provider_call("gocardless", operation, err.transport_label());
            err
        })?;

        let status = response.status();
        record_provider_call("gocardless", operation, status.as_str());
        let retry_after = parse_retry_after(response.headers());
        let body_text = response
            .text()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        tracing::debug!(status = %status, operation, "GoCardless API response");

        if status.is_success() {
            serde_json::from_str(&body_text)
                .map_err(|e| ProviderError::Malformed(format!("{}: {}", operation, e)))
        } else {
            let (code, message) = parse_error_body(&body_text);
            tracing::error!(
                status = %status,
                code = %code,
                operation,
                "GoCardless API call failed"
            );

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

    /// Resolve a usable API access token: cached, refreshed, or newly minted.
    async fn api_token(&self) -> Result<String, ProviderError> {
        if let Some(token) = self.cache.get(keys::GOCARDLESS_ACCESS_TOKEN).await {
            return Ok(token);
        }

        if let Some(refresh) = self.cache.get(keys::GOCARDLESS_REFRESH_TOKEN).await {
            match self.refresh_access_token(&refresh).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    tracing::warn!(error = %e, "GoCardless token refresh failed, requesting a new token");
                    self.cache.invalidate(keys::GOCARDLESS_REFRESH_TOKEN).await;
                }
            }
        }

        self.request_new_token().await
    }

    async fn refresh_access_token(&self, refresh: &str) -> Result<String, ProviderError> {
        let request = RefreshTokenRequest { refresh };
        let token: RefreshedToken = self
            .send(
                "token_refresh",
                self.client.post(self.url("/token/refresh/")).json(&request),
            )
            .await?;

        self.cache_token(keys::GOCARDLESS_ACCESS_TOKEN, &token.access, token.access_expires)
            .await;
        Ok(token.access)
    }

    async fn request_new_token(&self) -> Result<String, ProviderError> {
        let request = NewTokenRequest {
            secret_id: &self.config.secret_id,
            secret_key: self.config.secret_key.expose_secret(),
        };
        let token: TokenPair = self
            .send(
                "token_new",
                self.client.post(self.url("/token/new/")).json(&request),
            )
            .await?;

        tracing::info!("GoCardless API token pair obtained");
        self.cache_token(keys::GOCARDLESS_ACCESS_TOKEN, &token.access, token.access_expires)
            .await;
        self.cache_token(
            keys::GOCARDLESS_REFRESH_TOKEN,
            &token.refresh,
            token.refresh_expires,
        )
        .await;
        Ok(token.access)
    }

    async fn cache_token(&self, key: &str, value: &str, expires_in: u64) {
        let ttl = expires_in.saturating_sub(TOKEN_TTL_MARGIN_SECS);
        if ttl > 0 {
            self.cache.set(key, value, Duration::from_secs(ttl)).await;
        }
    }

    async fn post_authed<B, T>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError>
    where
        B: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let token = self.api_token().await?;
        let result = self
            .send(
                operation,
                self.client.post(self.url(path)).bearer_auth(&token).json(body),
            )
            .await;
        self.invalidate_on_auth_failure(&result).await;
        result
    }

    async fn get_authed<T>(&self, operation: &'static str, path: &str) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
    {
        let token = self.api_token().await?;
        let result = self
            .send(operation, self.client.get(self.url(path)).bearer_auth(&token))
            .await;
        self.invalidate_on_auth_failure(&result).await;
        result
    }

    /// A 401 means the cached token outlived its provider-side validity.
    async fn invalidate_on_auth_failure<T>(&self, result: &Result<T, ProviderError>) {
        if let Err(ProviderError::Api { status: 401, .. }) = result {
            self.cache.invalidate(keys::GOCARDLESS_ACCESS_TOKEN).await;
        }
    }
}

#[async_trait]
impl GoCardLessApi for GoCardLessClient {
    async fn create_end_user_agreement(
        &self,
        institution_id: &str,
        transaction_total_days: u32,
    ) -> Result<Agreement, ProviderError> {
        let request = EndUserAgreementRequest {
            institution_id,
            max_historical_days: transaction_total_days,
            access_valid_for_days: transaction_total_days,
            access_scope: ACCESS_SCOPE,
        };

        let response: EndUserAgreementResponse = self
            .post_authed("agreement_create", "/agreements/enduser/", &request)
            .await?;

        tracing::info!(
            agreement_id = %response.id,
            institution_id,
            "GoCardless end user agreement created"
        );

        let expires_at =
            response.created + chrono::Duration::days(i64::from(response.access_valid_for_days));

        Ok(Agreement {
            provider: Provider::GoCardLess,
            agreement_id: response.id,
            institution_id: response.institution_id,
            transaction_total_days: response.max_historical_days,
            access_valid_for_days: response.access_valid_for_days,
            expires_at,
        })
    }

    async fn create_requisition(
        &self,
        params: &RequisitionParams,
    ) -> Result<Requisition, ProviderError> {
        let request = RequisitionCreateRequest {
            redirect: &params.redirect,
            institution_id: &params.institution_id,
            agreement: &params.agreement_id,
            reference: &params.reference,
        };

        let requisition: Requisition = self
            .post_authed("requisition_create", "/requisitions/", &request)
            .await?;

        tracing::info!(
            requisition_id = %requisition.id,
            reference = %requisition.reference,
            "GoCardless requisition created"
        );

        Ok(requisition)
    }

    async fn get_requisition(&self, requisition_id: &str) -> Result<Requisition, ProviderError> {
        self.get_authed("requisition_get", &format!("/requisitions/{}/", requisition_id))
            .await
    }

    fn is_configured(&self) -> bool {
        !self.config.secret_id.is_empty() && !self.config.secret_key.expose_secret().is_empty()
    }
}

/// Mock GoCardless client for testing.
///
/// Requisitions start in `CR` and stay there until a test moves them with
/// [`MockGoCardLessApi::set_requisition_status`], mirroring the out-of-band
/// consent journey. References must be unique, as the provider enforces.
pub struct MockGoCardLessApi {
    agreement_count: AtomicU64,
    requisition_count: AtomicU64,
    requisitions: Mutex<HashMap<String, Requisition>>,
    used_references: Mutex<HashSet<String>>,
    fail_next: Mutex<Option<ProviderError>>,
}

impl Default for MockGoCardLessApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGoCardLessApi {
    pub fn new() -> Self {
        Self {
            agreement_count: AtomicU64::new(0),
            requisition_count: AtomicU64::new(0),
            requisitions: Mutex::new(HashMap::new()),
            used_references: Mutex::new(HashSet::new()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn agreement_count(&self) -> u64 {
        self.agreement_count.load(Ordering::SeqCst)
    }

    pub fn requisition_count(&self) -> u64 {
        self.requisition_count.load(Ordering::SeqCst)
    }

    /// Make the next call fail with the given error.
    pub fn fail_next(&self, err: ProviderError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(err);
        }
    }

    /// Move a requisition along its consent journey.
    pub fn set_requisition_status(
        &self,
        requisition_id: &str,
        status: RequisitionStatus,
        accounts: Vec<String>,
    ) {
        if let Ok(mut requisitions) = self.requisitions.lock() {
            if let Some(requisition) = requisitions.get_mut(requisition_id) {
                requisition.status = status;
                requisition.accounts = accounts;
            }
        }
    }

    fn take_failure(&self) -> Option<ProviderError> {
        self.fail_next.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait]
impl GoCardLessApi for MockGoCardLessApi {
    async fn create_end_user_agreement(
        &self,
        institution_id: &str,
        transaction_total_days: u32,
    ) -> Result<Agreement, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let n = self.agreement_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(institution_id, "[MOCK] GoCardless agreement created");

        Ok(Agreement {
            provider: Provider::GoCardLess,
            agreement_id: format!("AG-{}", n),
            institution_id: institution_id.to_string(),
            transaction_total_days,
            access_valid_for_days: transaction_total_days,
            expires_at: Utc::now() + chrono::Duration::days(i64::from(transaction_total_days)),
        })
    }

    async fn create_requisition(
        &self,
        params: &RequisitionParams,
    ) -> Result<Requisition, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let mut used = self
            .used_references
            .lock()
            .map_err(|_| ProviderError::Connection("mock state mutex poisoned".to_string()))?;
        if !used.insert(params.reference.clone()) {
            return Err(ProviderError::Api {
                status: 400,
                code: "reference".to_string(),
                message: "Requisition's reference must be unique".to_string(),
            });
        }
        drop(used);

        let n = self.requisition_count.fetch_add(1, Ordering::SeqCst) + 1;
        let requisition = Requisition {
            id: format!("REQ-{}", n),
            status: RequisitionStatus::Created,
            link: format!("https://ob.example.com/psd2/start/REQ-{}", n),
            accounts: Vec::new(),
            reference: params.reference.clone(),
        };

        self.requisitions
            .lock()
            .map_err(|_| ProviderError::Connection("mock state mutex poisoned".to_string()))?
            .insert(requisition.id.clone(), requisition.clone());

        Ok(requisition)
    }

    async fn get_requisition(&self, requisition_id: &str) -> Result<Requisition, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        self.requisitions
            .lock()
            .map_err(|_| ProviderError::Connection("mock state mutex poisoned".to_string()))?
            .get(requisition_id)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                code: "Not found.".to_string(),
                message: "Not found.".to_string(),
            })
    }

    fn is_configured(&self) -> bool {
        true
    }
}
