//! Flow orchestration across providers.
//!
//! The orchestrator owns flow ordering and the cache contract; provider
//! clients speak wire protocols and nothing else. Cache writes happen only
//! after a complete, successful provider response, so an aborted or failed
//! call leaves no state behind. All failures leave here as [`LinkError`].

use crate::error::{ErrorKind, LinkError, codes};
use crate::models::{
    AccessCredential, Agreement, ConsentLink, Environment, LinkToken, Provider, RequisitionStatus,
};
use crate::providers::{
    GoCardLessApi, PlaidApi, PlaidLinkParams, PluggyApi, ProviderError, RequisitionParams,
};
use crate::services::cache::{CredentialCache, keys};
use crate::services::metrics::record_flow_step;
use crate::services::normalizer::{FlowStep, normalize};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Caller inputs for minting a link token.
#[derive(Debug, Clone)]
pub struct LinkParams {
    pub user_id: String,
    pub environment: Option<Environment>,
    pub language: Option<String>,
    /// Present when re-linking an existing Plaid item (update mode).
    pub access_token: Option<String>,
}

pub struct LinkOrchestrator {
    plaid: Arc<dyn PlaidApi>,
    gocardless: Arc<dyn GoCardLessApi>,
    pluggy: Arc<dyn PluggyApi>,
    cache: Arc<dyn CredentialCache>,
}

impl LinkOrchestrator {
    pub fn new(
        plaid: Arc<dyn PlaidApi>,
        gocardless: Arc<dyn GoCardLessApi>,
        pluggy: Arc<dyn PluggyApi>,
        cache: Arc<dyn CredentialCache>,
    ) -> Self {
        Self {
            plaid,
            gocardless,
            pluggy,
            cache,
        }
    }

    /// Mint a link token for the token-based providers.
    ///
    /// GoCardless has no standalone link token: callers are redirected to
    /// the agreement and consent-link steps instead.
    pub async fn create_link(
        &self,
        provider: Provider,
        params: LinkParams,
    ) -> Result<LinkToken, LinkError> {
        let result = match provider {
            Provider::Plaid => {
                self.plaid
                    .create_link_token(&PlaidLinkParams {
                        user_id: params.user_id.clone(),
                        language: params.language,
                        access_token: params.access_token,
                    })
                    .await
            }
            Provider::Pluggy => {
                let environment = params.environment.unwrap_or(Environment::Sandbox);
                self.pluggy
                    .create_connect_token(&params.user_id, environment)
                    .await
            }
            Provider::GoCardLess => {
                record_flow_step(
                    provider.as_str(),
                    FlowStep::CreateLink.as_str(),
                    ErrorKind::Precondition.as_str(),
                );
                return Err(LinkError::precondition(
                    codes::AGREEMENT_REQUIRED,
                    "gocardless linking starts with an end-user agreement and a consent link",
                ));
            }
        };

        match result {
            Ok(token) => {
                self.cache_link_token(&token, &params.user_id).await;
                record_flow_step(provider.as_str(), FlowStep::CreateLink.as_str(), "success");
                Ok(token)
            }
            Err(e) => Err(self.classify(provider, FlowStep::CreateLink, e)),
        }
    }

    /// Create (or reuse) a GoCardless end-user agreement.
    ///
    /// Repeat calls with the same institution and caller reference return
    /// the cached agreement without touching the provider, as long as it
    /// has not expired.
    pub async fn create_agreement(
        &self,
        institution_id: &str,
        transaction_total_days: u32,
        caller_ref: &str,
    ) -> Result<Agreement, LinkError> {
        let key = keys::agreement(institution_id, caller_ref);
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<Agreement>(&cached) {
                Ok(agreement) if !agreement.is_expired(Utc::now()) => {
                    tracing::debug!(
                        agreement_id = %agreement.agreement_id,
                        institution_id,
                        "Reusing cached agreement"
                    );
                    record_flow_step(
                        Provider::GoCardLess.as_str(),
                        FlowStep::CreateAgreement.as_str(),
                        "cache_hit",
                    );
                    return Ok(agreement);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, key, "Discarding undecodable cached agreement");
                }
            }
        }

        let agreement = self
            .gocardless
            .create_end_user_agreement(institution_id, transaction_total_days)
            .await
            .map_err(|e| self.classify(Provider::GoCardLess, FlowStep::CreateAgreement, e))?;

        self.cache_agreement(&agreement, caller_ref).await;
        record_flow_step(
            Provider::GoCardLess.as_str(),
            FlowStep::CreateAgreement.as_str(),
            "success",
        );
        Ok(agreement)
    }

    /// Turn a valid agreement into a hosted consent link.
    ///
    /// The provider-assigned requisition id is stashed under the caller's
    /// reference so the exchange step can resolve it once the end user
    /// finishes the out-of-band consent journey.
    pub async fn build_consent_link(
        &self,
        institution_id: &str,
        agreement_id: &str,
        redirect: &str,
        reference: &str,
    ) -> Result<ConsentLink, LinkError> {
        let agreement = self.require_valid_agreement(institution_id, agreement_id).await?;

        let requisition = self
            .gocardless
            .create_requisition(&RequisitionParams {
                institution_id: institution_id.to_string(),
                agreement_id: agreement.agreement_id.clone(),
                redirect: redirect.to_string(),
                reference: reference.to_string(),
            })
            .await
            .map_err(|e| self.classify(Provider::GoCardLess, FlowStep::BuildConsentLink, e))?;

        let ttl = (agreement.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.cache
            .set(&keys::requisition(reference), &requisition.id, ttl)
            .await;

        record_flow_step(
            Provider::GoCardLess.as_str(),
            FlowStep::BuildConsentLink.as_str(),
            "success",
        );
        Ok(ConsentLink {
            provider: Provider::GoCardLess,
            institution_id: institution_id.to_string(),
            redirect_url: requisition.link,
            reference: requisition.reference,
        })
    }

    /// Exchange a consumable handle for a durable access credential.
    ///
    /// Plaid exchanges the public token; GoCardless resolves the caller's
    /// reference to a requisition and reads its consent status; Pluggy has
    /// no exchange step at all.
    pub async fn exchange_token(
        &self,
        provider: Provider,
        token: &str,
    ) -> Result<AccessCredential, LinkError> {
        match provider {
            Provider::Plaid => {
                let credential = self
                    .plaid
                    .exchange_public_token(token)
                    .await
                    .map_err(|e| self.classify(provider, FlowStep::Exchange, e))?;
                record_flow_step(provider.as_str(), FlowStep::Exchange.as_str(), "success");
                Ok(credential)
            }
            Provider::GoCardLess => self.exchange_requisition(token).await,
            Provider::Pluggy => {
                record_flow_step(
                    provider.as_str(),
                    FlowStep::Exchange.as_str(),
                    ErrorKind::Precondition.as_str(),
                );
                Err(LinkError::precondition(
                    codes::NO_EXCHANGE_STEP,
                    "pluggy issues item credentials through its widget; there is nothing to exchange",
                ))
            }
        }
    }

    async fn exchange_requisition(&self, reference: &str) -> Result<AccessCredential, LinkError> {
        let requisition_id = match self.cache.get(&keys::requisition(reference)).await {
            Some(id) => id,
            None => {
                record_flow_step(
                    Provider::GoCardLess.as_str(),
                    FlowStep::Exchange.as_str(),
                    ErrorKind::Precondition.as_str(),
                );
                return Err(LinkError::precondition(
                    codes::UNKNOWN_REFERENCE,
                    format!("reference {} does not match any consent link issued here", reference),
                ));
            }
        };

        let requisition = self
            .gocardless
            .get_requisition(&requisition_id)
            .await
            .map_err(|e| self.classify(Provider::GoCardLess, FlowStep::Exchange, e))?;

        match requisition.status {
            RequisitionStatus::Linked => {
                record_flow_step(
                    Provider::GoCardLess.as_str(),
                    FlowStep::Exchange.as_str(),
                    "success",
                );
                Ok(AccessCredential {
                    provider: Provider::GoCardLess,
                    access_token: requisition.id,
                    item_or_account_ids: requisition.accounts,
                    obtained_at: Utc::now(),
                })
            }
            status if status.is_pending() => {
                record_flow_step(
                    Provider::GoCardLess.as_str(),
                    FlowStep::Exchange.as_str(),
                    ErrorKind::Pending.as_str(),
                );
                Err(LinkError::new(
                    ErrorKind::Pending,
                    status.as_code(),
                    200,
                    format!("consent for reference {} is still in progress", reference),
                ))
            }
            status => {
                // RJ, SU, EX: the journey ended without a usable consent
                record_flow_step(
                    Provider::GoCardLess.as_str(),
                    FlowStep::Exchange.as_str(),
                    ErrorKind::InvalidToken.as_str(),
                );
                Err(LinkError::new(
                    ErrorKind::InvalidToken,
                    status.as_code(),
                    200,
                    format!("consent for reference {} ended as {}", reference, status.as_code()),
                ))
            }
        }
    }

    async fn require_valid_agreement(
        &self,
        institution_id: &str,
        agreement_id: &str,
    ) -> Result<Agreement, LinkError> {
        let agreement = self
            .cache
            .get(&keys::agreement_by_id(agreement_id))
            .await
            .and_then(|json| serde_json::from_str::<Agreement>(&json).ok())
            .filter(|agreement| !agreement.is_expired(Utc::now()))
            .filter(|agreement| agreement.institution_id == institution_id);

        match agreement {
            Some(agreement) => Ok(agreement),
            None => {
                record_flow_step(
                    Provider::GoCardLess.as_str(),
                    FlowStep::BuildConsentLink.as_str(),
                    ErrorKind::Precondition.as_str(),
                );
                Err(LinkError::precondition(
                    codes::AGREEMENT_REQUIRED,
                    format!(
                        "no valid agreement {} for institution {}; create one first",
                        agreement_id, institution_id
                    ),
                ))
            }
        }
    }

    async fn cache_agreement(&self, agreement: &Agreement, caller_ref: &str) {
        let ttl = agreement.expires_at - Utc::now();
        if let (Ok(ttl), Ok(json)) = (ttl.to_std(), serde_json::to_string(agreement)) {
            self.cache
                .set(&keys::agreement(&agreement.institution_id, caller_ref), &json, ttl)
                .await;
            self.cache
                .set(&keys::agreement_by_id(&agreement.agreement_id), &json, ttl)
                .await;
        }
    }

    async fn cache_link_token(&self, token: &LinkToken, user_id: &str) {
        let ttl = token.expires_at - Utc::now();
        if let (Ok(ttl), Ok(json)) = (ttl.to_std(), serde_json::to_string(token)) {
            self.cache
                .set(&keys::link_token(token.provider, user_id), &json, ttl)
                .await;
        }
    }

    fn classify(&self, provider: Provider, step: FlowStep, err: ProviderError) -> LinkError {
        let error = normalize(provider, step, err);
        record_flow_step(provider.as_str(), step.as_str(), error.kind.as_str());
        tracing::warn!(
            provider = %provider,
            step = step.as_str(),
            kind = error.kind.as_str(),
            code = %error.provider_code,
            "Flow step failed"
        );
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MockGoCardLessApi, MockPlaidApi, MockPluggyApi};
    use crate::services::cache::InMemoryCache;

    fn orchestrator() -> (
        LinkOrchestrator,
        Arc<MockPlaidApi>,
        Arc<MockGoCardLessApi>,
        Arc<MockPluggyApi>,
        Arc<InMemoryCache>,
    ) {
        let plaid = Arc::new(MockPlaidApi::new());
        let gocardless = Arc::new(MockGoCardLessApi::new());
        let pluggy = Arc::new(MockPluggyApi::new());
        let cache = Arc::new(InMemoryCache::new());
        let orchestrator = LinkOrchestrator::new(
            plaid.clone(),
            gocardless.clone(),
            pluggy.clone(),
            cache.clone(),
        );
        (orchestrator, plaid, gocardless, pluggy, cache)
    }

    fn link_params(user_id: &str) -> LinkParams {
        LinkParams {
            user_id: user_id.to_string(),
            environment: None,
            language: None,
            access_token: None,
        }
    }

    #[tokio::test]
    async fn plaid_link_token_is_minted_and_cached() {
        let (orchestrator, plaid, _, _, cache) = orchestrator();

        let token = orchestrator
            .create_link(Provider::Plaid, link_params("user-1"))
            .await
            .unwrap();

        assert_eq!(token.provider, Provider::Plaid);
        assert!(token.expires_at > Utc::now());
        assert_eq!(plaid.link_count(), 1);
        assert!(cache.get("linktoken:plaid:user-1").await.is_some());
    }

    #[tokio::test]
    async fn gocardless_has_no_standalone_link() {
        let (orchestrator, _, _, _, _) = orchestrator();

        let err = orchestrator
            .create_link(Provider::GoCardLess, link_params("user-1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Precondition);
        assert_eq!(err.provider_code, codes::AGREEMENT_REQUIRED);
    }

    #[tokio::test]
    async fn pluggy_has_no_exchange_step() {
        let (orchestrator, _, _, _, _) = orchestrator();

        let err = orchestrator
            .exchange_token(Provider::Pluggy, "anything")
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Precondition);
        assert_eq!(err.provider_code, codes::NO_EXCHANGE_STEP);
    }

    #[tokio::test]
    async fn agreement_creation_is_idempotent_per_caller_ref() {
        let (orchestrator, _, gocardless, _, _) = orchestrator();

        let first = orchestrator.create_agreement("INST1", 90, "org-7").await.unwrap();
        let second = orchestrator.create_agreement("INST1", 90, "org-7").await.unwrap();

        assert_eq!(first.agreement_id, second.agreement_id);
        assert_eq!(gocardless.agreement_count(), 1);

        // A different caller reference is a different agreement
        orchestrator.create_agreement("INST1", 90, "org-8").await.unwrap();
        assert_eq!(gocardless.agreement_count(), 2);
    }

    #[tokio::test]
    async fn consent_link_requires_a_known_valid_agreement() {
        let (orchestrator, _, _, _, _) = orchestrator();

        let err = orchestrator
            .build_consent_link("INST1", "AG-1", "https://app.example.com/done", "ref-1")
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Precondition);
        assert_eq!(err.provider_code, codes::AGREEMENT_REQUIRED);
    }

    #[tokio::test]
    async fn consent_link_rejects_institution_mismatch() {
        let (orchestrator, _, _, _, _) = orchestrator();

        let agreement = orchestrator.create_agreement("INST1", 90, "org-7").await.unwrap();
        let err = orchestrator
            .build_consent_link(
                "INST2",
                &agreement.agreement_id,
                "https://app.example.com/done",
                "ref-1",
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Precondition);
        assert_eq!(err.provider_code, codes::AGREEMENT_REQUIRED);
    }

    #[tokio::test]
    async fn gocardless_journey_pends_then_links() {
        let (orchestrator, _, gocardless, _, _) = orchestrator();

        let agreement = orchestrator.create_agreement("INST1", 90, "org-7").await.unwrap();
        let consent = orchestrator
            .build_consent_link(
                "INST1",
                &agreement.agreement_id,
                "https://app.example.com/done",
                "ref-42",
            )
            .await
            .unwrap();
        assert_eq!(consent.reference, "ref-42");
        assert!(consent.redirect_url.starts_with("https://"));

        // Consent journey not finished yet
        let err = orchestrator
            .exchange_token(Provider::GoCardLess, "ref-42")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Pending);
        assert!(err.is_retryable());

        gocardless.set_requisition_status(
            "REQ-1",
            RequisitionStatus::Linked,
            vec!["acct-1".to_string(), "acct-2".to_string()],
        );

        let credential = orchestrator
            .exchange_token(Provider::GoCardLess, "ref-42")
            .await
            .unwrap();
        assert_eq!(credential.provider, Provider::GoCardLess);
        assert_eq!(credential.access_token, "REQ-1");
        assert_eq!(credential.item_or_account_ids.len(), 2);
    }

    #[tokio::test]
    async fn rejected_consent_is_invalid_token() {
        let (orchestrator, _, gocardless, _, _) = orchestrator();

        let agreement = orchestrator.create_agreement("INST1", 90, "org-7").await.unwrap();
        orchestrator
            .build_consent_link(
                "INST1",
                &agreement.agreement_id,
                "https://app.example.com/done",
                "ref-9",
            )
            .await
            .unwrap();

        gocardless.set_requisition_status("REQ-1", RequisitionStatus::Rejected, Vec::new());

        let err = orchestrator
            .exchange_token(Provider::GoCardLess, "ref-9")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidToken);
        assert_eq!(err.provider_code, "RJ");
    }

    #[tokio::test]
    async fn unknown_reference_never_reaches_the_provider() {
        let (orchestrator, _, gocardless, _, _) = orchestrator();

        let err = orchestrator
            .exchange_token(Provider::GoCardLess, "ref-nowhere")
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Precondition);
        assert_eq!(err.provider_code, codes::UNKNOWN_REFERENCE);
        assert_eq!(gocardless.requisition_count(), 0);
    }

    #[tokio::test]
    async fn plaid_double_exchange_is_invalid_token() {
        let (orchestrator, _, _, _, _) = orchestrator();

        orchestrator.exchange_token(Provider::Plaid, "tok-1").await.unwrap();
        let err = orchestrator
            .exchange_token(Provider::Plaid, "tok-1")
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidToken);
        assert_eq!(err.provider_code, "INVALID_PUBLIC_TOKEN");
        assert_eq!(err.http_status, 400);
    }

    #[tokio::test]
    async fn provider_timeout_leaves_no_cache_residue() {
        let (orchestrator, plaid, _, _, cache) = orchestrator();

        plaid.fail_next(ProviderError::Timeout(Duration::from_secs(30)));
        let err = orchestrator
            .create_link(Provider::Plaid, link_params("user-1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
        assert_eq!(err.http_status, 0);
        assert!(cache.get("linktoken:plaid:user-1").await.is_none());
    }

    #[tokio::test]
    async fn expired_cached_agreement_is_replaced() {
        let (orchestrator, _, gocardless, _, cache) = orchestrator();

        let mut stale = orchestrator.create_agreement("INST1", 90, "org-7").await.unwrap();
        stale.expires_at = Utc::now() - chrono::Duration::days(1);
        let json = serde_json::to_string(&stale).unwrap();
        cache
            .set("agreement:gocardless:INST1:org-7", &json, Duration::from_secs(600))
            .await;

        let fresh = orchestrator.create_agreement("INST1", 90, "org-7").await.unwrap();
        assert_ne!(fresh.agreement_id, stale.agreement_id);
        assert_eq!(gocardless.agreement_count(), 2);
    }
}
