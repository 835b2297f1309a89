//! Provider protocol adapters.
//!
//! Each client encapsulates one aggregator's wire protocol: auth, endpoint
//! URLs, payload shapes. Clients surface raw failures without classifying
//! them (that is the normalizer's job) and never sleep or retry internally;
//! retry policy belongs to the caller.

pub mod gocardless;
pub mod plaid;
pub mod pluggy;

use crate::models::{AccessCredential, Agreement, Environment, LinkToken, Requisition};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use gocardless::{GoCardLessClient, MockGoCardLessApi};
pub use plaid::{MockPlaidApi, PlaidClient};
pub use pluggy::{MockPluggyApi, PluggyClient};

/// Raw provider failure, uninterpreted.
///
/// Carries enough structure for the normalizer to classify without the rest
/// of the system depending on any provider's wire format.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider ({code}): {message}")]
    RateLimited {
        code: String,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("provider returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(timeout)
        } else {
            ProviderError::Connection(err.to_string())
        }
    }

    /// Metric label for calls that never produced an HTTP status.
    pub(crate) fn transport_label(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "timeout",
            _ => "connection_error",
        }
    }
}

/// Parse a `Retry-After` seconds value from provider response headers.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Parameters for Plaid's link-token creation.
#[derive(Debug, Clone)]
pub struct PlaidLinkParams {
    pub user_id: String,
    pub language: Option<String>,
    /// Present when re-linking an existing item (update mode).
    pub access_token: Option<String>,
}

/// Parameters for GoCardless requisition creation.
#[derive(Debug, Clone)]
pub struct RequisitionParams {
    pub institution_id: String,
    pub agreement_id: String,
    pub redirect: String,
    pub reference: String,
}

#[async_trait]
pub trait PlaidApi: Send + Sync {
    async fn create_link_token(&self, params: &PlaidLinkParams)
        -> Result<LinkToken, ProviderError>;
    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<AccessCredential, ProviderError>;
    fn is_configured(&self) -> bool;
}

#[async_trait]
pub trait GoCardLessApi: Send + Sync {
    async fn create_end_user_agreement(
        &self,
        institution_id: &str,
        transaction_total_days: u32,
    ) -> Result<Agreement, ProviderError>;
    async fn create_requisition(
        &self,
        params: &RequisitionParams,
    ) -> Result<Requisition, ProviderError>;
    async fn get_requisition(&self, requisition_id: &str) -> Result<Requisition, ProviderError>;
    fn is_configured(&self) -> bool;
}

#[async_trait]
pub trait PluggyApi: Send + Sync {
    async fn create_connect_token(
        &self,
        user_id: &str,
        environment: Environment,
    ) -> Result<LinkToken, ProviderError>;
    fn is_configured(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));
    }

    #[test]
    fn retry_after_ignores_http_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
