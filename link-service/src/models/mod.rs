//! Core data model for the link gateway.
//!
//! These are the normalized shapes shared by all providers; anything
//! provider-specific stays behind the client in `providers/`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregator providers the gateway fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Plaid,
    GoCardLess,
    Pluggy,
}

impl Provider {
    /// Lowercase name used in cache keys and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Plaid => "plaid",
            Provider::GoCardLess => "gocardless",
            Provider::Pluggy => "pluggy",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider environment selected by the caller or configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Short-lived token minted by a provider's "create link" call.
///
/// Consumed exactly once by the SDK/redirect step outside this service;
/// the gateway only issues it and, for the exchange step, accepts it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkToken {
    pub provider: Provider,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// PSD2 end-user agreement (GoCardless only).
///
/// Must exist before a consent link can be built; interchangeable with any
/// other agreement for the same institution within its validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agreement {
    pub provider: Provider,
    pub agreement_id: String,
    pub institution_id: String,
    /// Days of transaction history the agreement grants access to.
    pub transaction_total_days: u32,
    /// Days the agreement itself stays valid.
    pub access_valid_for_days: u32,
    pub expires_at: DateTime<Utc>,
}

impl Agreement {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Redirect URL the end user follows to authorize data sharing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentLink {
    pub provider: Provider,
    pub institution_id: String,
    pub redirect_url: String,
    /// Caller-supplied correlation string, unique per linking attempt.
    pub reference: String,
}

/// The end state of a successful flow: the durable retrieval credential.
///
/// Ownership transfers to the caller immediately; the gateway never stores
/// it beyond the response it returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCredential {
    pub provider: Provider,
    pub access_token: String,
    pub item_or_account_ids: Vec<String>,
    pub obtained_at: DateTime<Utc>,
}

/// GoCardless requisition lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequisitionStatus {
    #[serde(rename = "CR")]
    Created,
    #[serde(rename = "GC")]
    GivingConsent,
    #[serde(rename = "UA")]
    UndergoingAuthentication,
    #[serde(rename = "SA")]
    SelectingAccounts,
    #[serde(rename = "GA")]
    GrantingAccess,
    #[serde(rename = "LN")]
    Linked,
    #[serde(rename = "RJ")]
    Rejected,
    #[serde(rename = "SU")]
    Suspended,
    #[serde(rename = "EX")]
    Expired,
}

impl RequisitionStatus {
    pub fn as_code(&self) -> &'static str {
        match self {
            RequisitionStatus::Created => "CR",
            RequisitionStatus::GivingConsent => "GC",
            RequisitionStatus::UndergoingAuthentication => "UA",
            RequisitionStatus::SelectingAccounts => "SA",
            RequisitionStatus::GrantingAccess => "GA",
            RequisitionStatus::Linked => "LN",
            RequisitionStatus::Rejected => "RJ",
            RequisitionStatus::Suspended => "SU",
            RequisitionStatus::Expired => "EX",
        }
    }

    /// The end user has not finished the consent journey yet.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            RequisitionStatus::Created
                | RequisitionStatus::GivingConsent
                | RequisitionStatus::UndergoingAuthentication
                | RequisitionStatus::SelectingAccounts
                | RequisitionStatus::GrantingAccess
        )
    }
}

/// A GoCardless requisition: the provider-side record of one consent attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requisition {
    pub id: String,
    pub status: RequisitionStatus,
    /// Hosted consent page for the end user.
    pub link: String,
    /// Account ids populated once the requisition reaches `LN`.
    #[serde(default)]
    pub accounts: Vec<String>,
    pub reference: String,
}
