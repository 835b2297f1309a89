//! The closed error taxonomy every provider failure is normalized into.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Stable `provider_code` values for errors the gateway raises itself,
/// so the field is populated even when no provider was consulted.
pub mod codes {
    pub const REQUEST_INVALID: &str = "request.invalid";
    pub const AGREEMENT_REQUIRED: &str = "flow.agreement_required";
    pub const UNKNOWN_REFERENCE: &str = "flow.unknown_reference";
    pub const NO_EXCHANGE_STEP: &str = "flow.no_exchange_step";
}

/// Classification of a flow failure.
///
/// `Pending`, `RateLimited`, and `ProviderUnavailable` are retryable; the
/// rest require the caller to correct something before trying again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Precondition,
    InvalidToken,
    Conflict,
    Pending,
    RateLimited,
    ProviderUnavailable,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Precondition => "precondition",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Pending => "pending",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized flow error.
///
/// `provider_code` preserves the original provider error code for
/// diagnostics; `http_status` is the status the provider answered with,
/// `0` when no response was received (timeout, connect failure) or when
/// the gateway raised the error without calling a provider.
#[derive(Debug, Clone, Error)]
#[error("{kind} ({provider_code}): {message}")]
pub struct LinkError {
    pub kind: ErrorKind,
    pub provider_code: String,
    pub http_status: u16,
    pub message: String,
    /// Provider-suggested delay, surfaced as a `Retry-After` header.
    pub retry_after: Option<Duration>,
}

impl LinkError {
    pub fn new(
        kind: ErrorKind,
        provider_code: impl Into<String>,
        http_status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            provider_code: provider_code.into(),
            http_status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Bad caller input detected before any provider call.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, codes::REQUEST_INVALID, 0, message)
    }

    /// Flow step invoked out of order.
    pub fn precondition(provider_code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, provider_code, 0, message)
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Whether the caller may retry the identical request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Pending | ErrorKind::RateLimited | ErrorKind::ProviderUnavailable
        )
    }
}

/// A [`LinkError`] paired with the request correlation id, rendered as the
/// caller-facing error body. All classified flow errors map to HTTP 400;
/// the caller distinguishes retryable from terminal via `kind`.
#[derive(Debug)]
pub struct ErrorResponse {
    pub error: LinkError,
    pub request_id: String,
}

impl ErrorResponse {
    pub fn new(error: LinkError, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body<'a> {
            kind: ErrorKind,
            provider_code: &'a str,
            http_status: u16,
            message: &'a str,
            request_id: &'a str,
        }

        let retry_after = self.error.retry_after;

        let mut res = (
            StatusCode::BAD_REQUEST,
            Json(Body {
                kind: self.error.kind,
                provider_code: &self.error.provider_code,
                http_status: self.error.http_status,
                message: &self.error.message,
                request_id: &self.request_id,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.as_secs().into());
        }

        res
    }
}
