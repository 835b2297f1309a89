//! Provider error classification.
//!
//! Every raw provider failure passes through here exactly once on its way
//! to the caller-facing response. Classification is deterministic: HTTP
//! status and provider error code in, [`ErrorKind`] out. Nothing here
//! retries, rephrases provider codes, or guesses beyond the tables below.

use crate::error::{ErrorKind, LinkError};
use crate::models::Provider;
use crate::providers::ProviderError;

/// The orchestrated step a provider error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    CreateLink,
    CreateAgreement,
    BuildConsentLink,
    Exchange,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStep::CreateLink => "create_link",
            FlowStep::CreateAgreement => "create_agreement",
            FlowStep::BuildConsentLink => "build_consent_link",
            FlowStep::Exchange => "exchange",
        }
    }
}

/// Map a raw provider failure to its normalized classification.
///
/// Transport failures never saw a provider response, so they report
/// `http_status: 0`; the same convention covers success bodies that failed
/// to parse.
pub fn normalize(provider: Provider, step: FlowStep, err: ProviderError) -> LinkError {
    match err {
        ProviderError::Timeout(timeout) => LinkError::new(
            ErrorKind::ProviderUnavailable,
            "timeout",
            0,
            format!(
                "{} did not respond within {}s during {}",
                provider,
                timeout.as_secs(),
                step.as_str()
            ),
        ),
        ProviderError::Connection(message) => LinkError::new(
            ErrorKind::ProviderUnavailable,
            "connection",
            0,
            format!("{} unreachable during {}: {}", provider, step.as_str(), message),
        ),
        ProviderError::Malformed(message) => LinkError::new(
            ErrorKind::Unknown,
            "malformed_response",
            0,
            format!("{} returned an unreadable body: {}", provider, message),
        ),
        ProviderError::RateLimited {
            code,
            message,
            retry_after,
        } => {
            let error = LinkError::new(ErrorKind::RateLimited, code, 429, message);
            match retry_after {
                Some(delay) => error.with_retry_after(delay),
                None => error,
            }
        }
        ProviderError::Api {
            status,
            code,
            message,
        } => {
            let kind = classify_api_error(provider, status, &code);
            LinkError::new(kind, code, status, message)
        }
    }
}

fn classify_api_error(provider: Provider, status: u16, code: &str) -> ErrorKind {
    if (500..=599).contains(&status) {
        return ErrorKind::ProviderUnavailable;
    }

    match provider {
        Provider::Plaid => match (status, code) {
            (_, "INVALID_PUBLIC_TOKEN" | "INVALID_ACCESS_TOKEN") => ErrorKind::InvalidToken,
            // Rejected gateway credentials, not a caller problem
            (401 | 403, _) => ErrorKind::ProviderUnavailable,
            (400 | 422, _) => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        },
        Provider::GoCardLess => match (status, code) {
            (401 | 403, _) => ErrorKind::ProviderUnavailable,
            (404, _) => ErrorKind::InvalidToken,
            (400, "reference") => ErrorKind::Conflict,
            (409, _) => ErrorKind::Conflict,
            (400, _) => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        },
        Provider::Pluggy => match status {
            401 | 403 => ErrorKind::ProviderUnavailable,
            400 => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn api(status: u16, code: &str) -> ProviderError {
        ProviderError::Api {
            status,
            code: code.to_string(),
            message: "details from provider".to_string(),
        }
    }

    #[test]
    fn used_plaid_token_classifies_as_invalid_token() {
        let err = normalize(
            Provider::Plaid,
            FlowStep::Exchange,
            api(400, "INVALID_PUBLIC_TOKEN"),
        );
        assert_eq!(err.kind, ErrorKind::InvalidToken);
        assert_eq!(err.provider_code, "INVALID_PUBLIC_TOKEN");
        assert_eq!(err.http_status, 400);
        assert!(!err.is_retryable());
    }

    #[test]
    fn plaid_bad_request_is_validation_but_own_credentials_are_not() {
        let err = normalize(Provider::Plaid, FlowStep::CreateLink, api(400, "INVALID_FIELD"));
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = normalize(Provider::Plaid, FlowStep::CreateLink, api(401, "UNAUTHORIZED"));
        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
    }

    #[test]
    fn gocardless_duplicate_reference_is_conflict() {
        let err = normalize(
            Provider::GoCardLess,
            FlowStep::BuildConsentLink,
            api(400, "reference"),
        );
        assert_eq!(err.kind, ErrorKind::Conflict);

        let err = normalize(
            Provider::GoCardLess,
            FlowStep::BuildConsentLink,
            api(400, "institution_id"),
        );
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn gocardless_missing_requisition_is_invalid_token() {
        let err = normalize(Provider::GoCardLess, FlowStep::Exchange, api(404, "Not found."));
        assert_eq!(err.kind, ErrorKind::InvalidToken);
    }

    #[test]
    fn server_errors_are_provider_unavailable_for_every_provider() {
        for provider in [Provider::Plaid, Provider::GoCardLess, Provider::Pluggy] {
            let err = normalize(provider, FlowStep::CreateLink, api(503, "whatever"));
            assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn transport_failures_report_zero_status() {
        let err = normalize(
            Provider::Plaid,
            FlowStep::CreateLink,
            ProviderError::Timeout(Duration::from_secs(30)),
        );
        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
        assert_eq!(err.provider_code, "timeout");
        assert_eq!(err.http_status, 0);

        let err = normalize(
            Provider::Pluggy,
            FlowStep::CreateLink,
            ProviderError::Connection("dns failure".to_string()),
        );
        assert_eq!(err.provider_code, "connection");
        assert_eq!(err.http_status, 0);
    }

    #[test]
    fn rate_limit_keeps_the_provider_hint() {
        let err = normalize(
            Provider::GoCardLess,
            FlowStep::CreateAgreement,
            ProviderError::RateLimited {
                code: "rate_limit".to_string(),
                message: "too many requests".to_string(),
                retry_after: Some(Duration::from_secs(30)),
            },
        );
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.http_status, 429);
        assert_eq!(err.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn malformed_body_is_unknown() {
        let err = normalize(
            Provider::Pluggy,
            FlowStep::CreateLink,
            ProviderError::Malformed("connect_token_create: missing field".to_string()),
        );
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.provider_code, "malformed_response");
    }
}
