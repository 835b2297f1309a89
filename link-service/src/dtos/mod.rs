//! Request and response shapes for the gateway endpoints.
//!
//! Request bodies keep the established camelCase field names; response
//! bodies are snake_case and wrapped in a `data` envelope, except the
//! Plaid exchange which returns the credential fields bare.

use crate::models::Environment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Standard success envelope.
#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaidLinkRequest {
    #[validate(length(min = 1, message = "userId must not be empty"))]
    pub user_id: String,
    pub language: Option<String>,
    /// Present when re-linking an existing item (update mode).
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlaidExchangeRequest {
    #[validate(length(min = 1, message = "token must not be empty"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PluggyLinkRequest {
    #[validate(length(min = 1, message = "userId must not be empty"))]
    pub user_id: String,
    pub environment: Environment,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GoCardLessAgreementRequest {
    #[validate(length(min = 1, message = "institutionId must not be empty"))]
    pub institution_id: String,
    #[validate(range(
        min = 1,
        max = 730,
        message = "transactionTotalDays must be between 1 and 730"
    ))]
    pub transaction_total_days: u32,
    /// Caller-scoped identifier that makes agreement creation idempotent.
    #[validate(length(min = 1, message = "reference must not be empty"))]
    pub reference: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GoCardLessLinkRequest {
    #[validate(length(min = 1, message = "institutionId must not be empty"))]
    pub institution_id: String,
    #[validate(length(min = 1, message = "agreement must not be empty"))]
    pub agreement: String,
    #[validate(length(min = 1, message = "redirect must not be empty"))]
    pub redirect: String,
    /// Per-attempt correlation string, unique on the provider side.
    #[validate(length(min = 1, message = "reference must not be empty"))]
    pub reference: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GoCardLessExchangeRequest {
    #[validate(length(min = 1, message = "reference must not be empty"))]
    pub reference: String,
}

/// Body of the Pluggy link response.
#[derive(Debug, Serialize)]
pub struct PluggyLinkData {
    pub access_token: String,
}
