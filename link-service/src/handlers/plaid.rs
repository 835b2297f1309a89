use axum::{Json, extract::State, response::IntoResponse};
use service_core::middleware::tracing::RequestId;

use crate::AppState;
use crate::dtos::{DataEnvelope, PlaidExchangeRequest, PlaidLinkRequest};
use crate::error::ErrorResponse;
use crate::models::Provider;
use crate::services::orchestrator::LinkParams;
use crate::utils::validation::ValidatedJson;

/// POST /plaid/link
pub async fn create_link(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ValidatedJson(payload): ValidatedJson<PlaidLinkRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let token = state
        .orchestrator
        .create_link(
            Provider::Plaid,
            LinkParams {
                user_id: payload.user_id,
                environment: None,
                language: payload.language,
                access_token: payload.access_token,
            },
        )
        .await
        .map_err(|e| ErrorResponse::new(e, request_id))?;

    Ok(Json(DataEnvelope { data: token }))
}

/// POST /plaid/exchange
///
/// Returns the credential fields bare, without the `data` envelope. The
/// external contract has always shaped this one endpoint differently and
/// callers depend on it.
pub async fn exchange_token(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ValidatedJson(payload): ValidatedJson<PlaidExchangeRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let credential = state
        .orchestrator
        .exchange_token(Provider::Plaid, &payload.token)
        .await
        .map_err(|e| ErrorResponse::new(e, request_id))?;

    Ok(Json(credential))
}
