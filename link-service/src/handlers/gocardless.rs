use axum::{Json, extract::State, response::IntoResponse};
use service_core::middleware::tracing::RequestId;

use crate::AppState;
use crate::dtos::{
    DataEnvelope, GoCardLessAgreementRequest, GoCardLessExchangeRequest, GoCardLessLinkRequest,
};
use crate::error::ErrorResponse;
use crate::models::Provider;
use crate::utils::validation::ValidatedJson;

/// POST /gocardless/agreement
pub async fn create_agreement(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ValidatedJson(payload): ValidatedJson<GoCardLessAgreementRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let agreement = state
        .orchestrator
        .create_agreement(
            &payload.institution_id,
            payload.transaction_total_days,
            &payload.reference,
        )
        .await
        .map_err(|e| ErrorResponse::new(e, request_id))?;

    Ok(Json(DataEnvelope { data: agreement }))
}

/// POST /gocardless/link
pub async fn build_link(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ValidatedJson(payload): ValidatedJson<GoCardLessLinkRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let consent_link = state
        .orchestrator
        .build_consent_link(
            &payload.institution_id,
            &payload.agreement,
            &payload.redirect,
            &payload.reference,
        )
        .await
        .map_err(|e| ErrorResponse::new(e, request_id))?;

    Ok(Json(DataEnvelope { data: consent_link }))
}

/// POST /gocardless/exchange
pub async fn exchange_token(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ValidatedJson(payload): ValidatedJson<GoCardLessExchangeRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let credential = state
        .orchestrator
        .exchange_token(Provider::GoCardLess, &payload.reference)
        .await
        .map_err(|e| ErrorResponse::new(e, request_id))?;

    Ok(Json(DataEnvelope { data: credential }))
}
